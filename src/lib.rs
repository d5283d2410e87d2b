// Copyright 2025 Rowmap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Rowmap - A compiled-plan micro-ORM
//!
//! Rowmap maps SQL parameters and result rows to Rust types over any driver
//! implementing a small set of capability traits. For every distinct
//! combination of SQL text, command kind, connection, parameter shape and
//! result shape it compiles a plan once (a parameter binder and a row
//! deserializer) and caches it, so repeated calls only pay for the database
//! round trip.
//!
//! ## Key Features
//!
//! - **Compiled binders** - Record members bind by name, unused members are
//!   skipped, collections expand into `IN` lists, `{=name}` literals are
//!   inlined
//! - **Compiled deserializers** - Columns map to members case-insensitively,
//!   through constructors or setters, with schema drift detection
//! - **Multi-mapping** - Split one joined row into 2 to 7 shapes
//! - **Grid reads** - Walk several result sets of one command in order
//! - **Dynamic rows** - Loosely-typed rows sharing one column table
//! - **Type handlers** - Custom conversions for opaque types
//!
//! ## Quick Start
//!
//! ```rust
//! use rowmap::driver::{MemoryConnection, ResultSet};
//! use rowmap::{impl_record, SqlMapper, Value};
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//! impl_record!(User { id, name });
//!
//! let mut conn = MemoryConnection::returning(vec![ResultSet::new(["Id", "Name"])
//!     .with_row(vec![Value::Integer(1), Value::text("Ann")])]);
//!
//! let mapper = SqlMapper::default();
//! let users: Vec<User> = mapper.query(&mut conn, "select Id, Name from users", &()).unwrap();
//! assert_eq!(users, vec![User { id: 1, name: "Ann".to_string() }]);
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Entry points ([`SqlMapper`], [`ConnectionExt`], [`DynamicParameters`])
//! - [`core`] - Core types ([`Value`], [`DbType`], [`TypeKey`], [`Error`])
//! - [`driver`] - Driver traits and the in-memory scripted driver
//! - [`mapper`] - Plan compilation and caching

pub mod api;
pub mod core;
pub mod driver;
pub mod mapper;

// Re-export main types for convenience
pub use core::{
    CommandKind, ConnectionState, DbType, Error, ParameterDirection, Result, TypeKey, Value,
};

// Re-export driver traits
pub use driver::{Command, Connection, DataReader, DbParameter, ParameterSet};

// Re-export mapping engine types
pub use mapper::{
    AnyTypeHandler, BindContext, BinderOptions, CacheStats, CachedSql, ColumnMap, Constructor,
    CtorArgs, CustomColumnMap, CustomParameter, DbString, DynamicRow, FieldKind, GridReader,
    GridRows, MapperConfig, Member, MultiMapShapes, ParamBinder, PlanCache, PlanKey, Record,
    ResultShape, RowDeserializer, RowTable, Shape, SqlField, TypeHandler, TypeRegistry,
};

// Re-export API types
pub use api::{
    CommandDefinition, CommandFlags, ConnectionExt, DynamicParameters, IntoCommand, MappedReader,
    QueryRows, SqlMapper, SqlParams,
};
