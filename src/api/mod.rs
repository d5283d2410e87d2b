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

//! Top-level mapper API
//!
//! # Quick Start
//!
//! ```ignore
//! use rowmap::{impl_record, ConnectionExt, DynamicParameters};
//!
//! #[derive(Debug, Default)]
//! struct Order { id: i64, total: f64 }
//! impl_record!(Order { id, total });
//!
//! // Record parameters bind by member name
//! conn.execute("insert into orders values (@id, @total)", &Order { id: 1, total: 9.5 })?;
//!
//! // Results map by column name
//! let orders: Vec<Order> = conn.query("select id, total from orders", &())?;
//!
//! // Collections expand into IN lists
//! let mut params = DynamicParameters::new();
//! params.add("ids", rowmap::Value::array(vec![1.into(), 2.into()]));
//! let some: Vec<Order> = conn.query("select * from orders where id in @ids", &params)?;
//!
//! // Several result sets from one command
//! let mut grid = conn.query_multiple("select * from orders; select count(*) from orders", &())?;
//! let orders: Vec<Order> = grid.read()?;
//! let count: Vec<i64> = grid.read()?;
//! ```

pub mod command;
pub mod ext;
pub mod mapper;
pub mod params;
pub mod rows;

pub use command::{CommandDefinition, CommandFlags, IntoCommand};
pub use ext::ConnectionExt;
pub use mapper::SqlMapper;
pub use params::{DynamicParameters, SqlParams};
pub use rows::{MappedReader, QueryRows};
