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

//! Error types for Rowmap
//!
//! This module defines all error types raised by the mapper. None of them are
//! retried internally; every error surfaces to the caller of the entry point
//! after the command, reader and connection have been restored.

use thiserror::Error;

/// Result type alias for Rowmap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Message used whenever a multi-mapping split point cannot be located
pub const MULTI_MAP_SPLIT_MESSAGE: &str =
    "When using the multi-mapping APIs ensure you set the split_on param if you have keys other than Id";

/// Main error type for mapper operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // =========================================================================
    // Configuration errors
    // =========================================================================
    /// No coercion, handler or collection rule exists for a member type
    #[error("the member {member} of type {type_name} cannot be used as a parameter value")]
    UnsupportedType { member: String, type_name: String },

    /// A record shape has neither a default constructor nor a matching one
    #[error("a parameterless default constructor or one matching signature {signature} is required for {type_name} materialization")]
    MissingConstructor {
        type_name: String,
        signature: String,
    },

    /// Multi-mapping boundary column not found
    #[error("{message} (split_on: {split_on})")]
    AmbiguousSplit { split_on: String, message: String },

    /// The combining closure arity does not match the declared shapes
    #[error("multi-mapping supports between 2 and 7 shapes, got {0}")]
    MultiMapArity(usize),

    // =========================================================================
    // Conversion errors
    // =========================================================================
    /// A single column could not be converted to its target member
    #[error("Error parsing column {ordinal} ({column}={value})")]
    ColumnConversion {
        ordinal: usize,
        column: String,
        value: String,
        source: Box<Error>,
    },

    /// Raw value coercion failure
    #[error("type conversion error: cannot convert {from} to {to}")]
    TypeConversion { from: String, to: String },

    /// Single-character coercion given a string that is not one character long
    #[error("a single-character was expected, got {0:?}")]
    Format(String),

    // =========================================================================
    // Usage errors
    // =========================================================================
    /// Grid result sets consumed out of order or twice
    #[error("query results must be consumed in the correct order, and each result can only be consumed once")]
    Sequence,

    /// Grid reader used after every result set was consumed
    #[error("the reader has been disposed; this can happen after all data has been consumed")]
    ReaderDisposed,

    /// Dynamic row add of an already present field
    #[error("an item with the same key has already been added: {0}")]
    DuplicateKey(String),

    /// A scalar read returned no rows
    #[error("query returned no rows")]
    NoRows,

    /// Column index out of bounds
    #[error("column index {index} out of bounds")]
    ColumnIndexOutOfBounds { index: usize },

    /// Parameter lookup by name failed
    #[error("parameter '{0}' not found")]
    ParameterNotFound(String),

    /// Operation not supported
    #[error("not supported: {0}")]
    NotSupported(String),

    // =========================================================================
    // Driver errors
    // =========================================================================
    /// Error reported by the underlying database driver
    #[error("driver error: {0}")]
    Driver(String),

    /// Internal error for unexpected conditions
    #[error("{message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new UnsupportedType error
    pub fn unsupported_type(member: impl Into<String>, type_name: impl Into<String>) -> Self {
        Error::UnsupportedType {
            member: member.into(),
            type_name: type_name.into(),
        }
    }

    /// Create a new AmbiguousSplit error
    pub fn ambiguous_split(split_on: impl Into<String>) -> Self {
        Error::AmbiguousSplit {
            split_on: split_on.into(),
            message: MULTI_MAP_SPLIT_MESSAGE.to_string(),
        }
    }

    /// Wrap a conversion failure with the column that produced it
    pub fn column_conversion(
        ordinal: usize,
        column: impl Into<String>,
        value: impl Into<String>,
        source: Error,
    ) -> Self {
        Error::ColumnConversion {
            ordinal,
            column: column.into(),
            value: value.into(),
            source: Box::new(source),
        }
    }

    /// Create a new TypeConversion error
    pub fn type_conversion(from: impl Into<String>, to: impl Into<String>) -> Self {
        Error::TypeConversion {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create a new Driver error
    pub fn driver(message: impl Into<String>) -> Self {
        Error::Driver(message.into())
    }

    /// Create a new Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// The innermost error, looking through column conversion wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::ColumnConversion { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a non-retryable configuration error
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedType { .. }
                | Error::MissingConstructor { .. }
                | Error::AmbiguousSplit { .. }
                | Error::MultiMapArity(_)
        )
    }

    /// Check if this error was raised while converting a value
    pub fn is_conversion(&self) -> bool {
        matches!(
            self,
            Error::ColumnConversion { .. } | Error::TypeConversion { .. } | Error::Format(_)
        )
    }
}
