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

//! Mapping engine
//!
//! This module contains the plan-compiling core:
//!
//! - [`TypeRegistry`] - Coercion table, type handlers and column maps
//! - [`PlanKey`] / [`PlanCache`] - Plan identity and the self-pruning cache
//! - [`binder`] - Parameter binder compiler
//! - [`deserializer`] - Row deserializer compiler
//! - [`DynamicRow`] - Loosely-typed rows over a shared table
//! - [`multi_map`] - Column splitting for multi-shape reads
//! - [`GridReader`] - Ordered access to multiple result sets

pub mod binder;
pub mod config;
pub mod deserializer;
pub mod dynamic_row;
pub mod field;
pub mod grid;
pub mod identity;
pub mod literal;
pub mod multi_map;
pub mod plan_cache;
pub mod shape;
pub mod type_map;

pub use binder::{BindContext, BinderOptions, ParamBinder};
pub use config::{MapperConfig, DEFAULT_STRING_SIZE};
pub use deserializer::{ResultShape, RowDeserializer};
pub use dynamic_row::{DynamicRow, RowTable};
pub use field::{CustomParameter, DbString, FieldKind, SqlField};
pub use grid::{GridReader, GridRows};
pub use identity::{column_hash, PlanKey};
pub use literal::LiteralToken;
pub use multi_map::{MultiMapDeserializer, MultiMapShapes};
pub use plan_cache::{CacheStats, CachedSql, CompiledPlan, PlanCache};
pub use shape::{Constructor, CtorArgs, Member, Record, Shape};
pub use type_map::{AnyTypeHandler, ColumnMap, CustomColumnMap, Lookup, TypeHandler, TypeRegistry};
