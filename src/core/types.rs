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

//! Core type definitions for Rowmap
//!
//! This module defines the fundamental types: DbType, CommandKind,
//! ConnectionState, ParameterDirection and TypeKey

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Wire-level parameter kinds understood by drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
    /// Unsigned 8-bit integer
    Byte,
    /// Signed 8-bit integer
    SByte,
    /// Signed 16-bit integer
    Int16,
    /// Unsigned 16-bit integer
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 32-bit integer
    UInt32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 64-bit integer
    UInt64,
    /// 32-bit floating point
    Single,
    /// 64-bit floating point
    Double,
    /// Exact numeric
    Decimal,
    /// Boolean
    Boolean,
    /// Unicode variable-length text
    String,
    /// Non-unicode variable-length text
    AnsiString,
    /// Unicode fixed-length text
    StringFixedLength,
    /// Non-unicode fixed-length text
    AnsiStringFixedLength,
    /// Globally unique identifier
    Guid,
    /// Date and time
    DateTime,
    /// Date and time with offset
    DateTimeOffset,
    /// Time of day
    Time,
    /// Binary data
    Binary,
    /// Untyped value, resolved by the driver
    Object,
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DbType::Byte => "Byte",
            DbType::SByte => "SByte",
            DbType::Int16 => "Int16",
            DbType::UInt16 => "UInt16",
            DbType::Int32 => "Int32",
            DbType::UInt32 => "UInt32",
            DbType::Int64 => "Int64",
            DbType::UInt64 => "UInt64",
            DbType::Single => "Single",
            DbType::Double => "Double",
            DbType::Decimal => "Decimal",
            DbType::Boolean => "Boolean",
            DbType::String => "String",
            DbType::AnsiString => "AnsiString",
            DbType::StringFixedLength => "StringFixedLength",
            DbType::AnsiStringFixedLength => "AnsiStringFixedLength",
            DbType::Guid => "Guid",
            DbType::DateTime => "DateTime",
            DbType::DateTimeOffset => "DateTimeOffset",
            DbType::Time => "Time",
            DbType::Binary => "Binary",
            DbType::Object => "Object",
        };
        f.write_str(name)
    }
}

/// How a command's text is interpreted by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandKind {
    /// Plain SQL text
    #[default]
    Text,
    /// Name of a stored procedure
    StoredProcedure,
}

/// Connection lifecycle state as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Closed,
    /// Connected and idle
    Open,
}

/// Direction of a bound parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParameterDirection {
    /// Value flows to the database
    #[default]
    Input,
    /// Value flows back from the database
    Output,
    /// Value flows both ways
    InputOutput,
    /// Procedure return value
    ReturnValue,
}

/// Runtime identity of a Rust type taking part in mapping
///
/// Equality and hashing only consider the `TypeId`; the name is kept for
/// diagnostics and error messages.
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// The key of `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying TypeId
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The fully qualified type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The type name without its module path
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(pos) => &self.name[pos + 2..],
            None => self.name,
        }
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
