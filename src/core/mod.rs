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

//! Core types and definitions for Rowmap
//!
//! This module contains the fundamental types used throughout the mapper:
//!
//! - [`DbType`] - Wire-level parameter kinds (Int32, String, Guid, etc.)
//! - [`Value`] - Wire values exchanged with the driver
//! - [`TypeKey`] - Runtime identity of mapped Rust types
//! - [`CommandKind`], [`ConnectionState`], [`ParameterDirection`]
//! - [`Error`] - Error types for all mapper operations

pub mod error;
pub mod types;
pub mod value;

// Re-export main types for convenience
pub use error::{Error, Result, MULTI_MAP_SPLIT_MESSAGE};
pub use types::{CommandKind, ConnectionState, DbType, ParameterDirection, TypeKey};
pub use value::{parse_timestamp, Value};
