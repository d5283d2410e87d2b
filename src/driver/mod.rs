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

//! Driver capability traits
//!
//! The mapper never speaks a wire protocol itself. Callers plug in a driver
//! by implementing [`Connection`], [`Command`] and [`DataReader`]. Parameters
//! are carried in the concrete [`ParameterSet`] so that every driver sees the
//! same parameter model.
//!
//! # Example
//!
//! ```ignore
//! let mut cmd = conn.create_command()?;
//! cmd.set_text("SELECT id, name FROM users WHERE id = @id");
//! cmd.parameters_mut().add(DbParameter::new("id", Value::Integer(1)));
//! let mut reader = cmd.execute_reader()?;
//! while reader.read()? {
//!     println!("{}", reader.get_value(1)?);
//! }
//! reader.close();
//! cmd.dispose();
//! ```

pub mod memory;

use std::time::Duration;

use crate::core::{CommandKind, ConnectionState, DbType, ParameterDirection, Result, Value};

pub use memory::{ExecutedCommand, MemoryConnection, MemoryStats, ResultSet};

/// A connection-like object the mapper can open, close and create commands on
pub trait Connection: Send {
    /// Current lifecycle state
    fn state(&self) -> ConnectionState;

    /// Opens the connection
    fn open(&mut self) -> Result<()>;

    /// Closes the connection
    fn close(&mut self) -> Result<()>;

    /// Creates a new command bound to this connection
    fn create_command(&self) -> Result<Box<dyn Command>>;

    /// Connection identity, part of every plan key
    fn connection_string(&self) -> &str;

    /// Whether collection parameters can be sent as a single array value
    fn supports_arrays(&self) -> bool {
        false
    }
}

/// A command-like object carrying SQL text and bound parameters
pub trait Command: Send {
    /// The command text
    fn text(&self) -> &str;

    /// Replaces the command text
    fn set_text(&mut self, text: &str);

    /// How the text is interpreted
    fn kind(&self) -> CommandKind;

    /// Sets how the text is interpreted
    fn set_kind(&mut self, kind: CommandKind);

    /// Sets the command timeout, enforced by the driver
    fn set_timeout(&mut self, timeout: Option<Duration>);

    /// Bound parameters
    fn parameters(&self) -> &ParameterSet;

    /// Bound parameters, mutable
    fn parameters_mut(&mut self) -> &mut ParameterSet;

    /// Executes and returns a reader over one or more result sets
    fn execute_reader(&mut self) -> Result<Box<dyn DataReader>>;

    /// Executes and returns the first column of the first row
    fn execute_scalar(&mut self) -> Result<Value>;

    /// Executes and returns the number of affected rows
    fn execute_non_query(&mut self) -> Result<u64>;

    /// Requests cancellation of the in-flight execution
    fn cancel(&mut self) -> Result<()>;

    /// Releases driver resources held by the command
    fn dispose(&mut self);
}

/// A forward-only row reader over one or more result sets
pub trait DataReader: Send {
    /// Advances to the next row, returning false when the set is exhausted
    fn read(&mut self) -> Result<bool>;

    /// Number of columns in the current result set
    fn field_count(&self) -> usize;

    /// Column name at `index`
    fn name(&self, index: usize) -> &str;

    /// Declared wire kind of the column at `index`
    fn field_type(&self, index: usize) -> DbType;

    /// Value of the column at `index` for the current row
    fn get_value(&self, index: usize) -> Result<Value>;

    /// Advances to the next result set
    fn next_result(&mut self) -> Result<bool>;

    /// Whether the reader has been closed
    fn is_closed(&self) -> bool;

    /// Closes the reader, releasing the result sets
    fn close(&mut self);

    /// Column names of the current result set
    fn column_names(&self) -> Vec<String> {
        (0..self.field_count())
            .map(|i| self.name(i).to_string())
            .collect()
    }
}

/// A single driver parameter
#[derive(Debug, Clone, PartialEq)]
pub struct DbParameter {
    /// Parameter name without a placeholder prefix
    pub name: String,
    /// Bound value, `Value::Null` for database null
    pub value: Value,
    /// Explicit wire kind, `None` lets the driver infer it
    pub db_type: Option<DbType>,
    /// Direction of the value
    pub direction: ParameterDirection,
    /// Size hint, `-1` for unbounded
    pub size: Option<i32>,
}

impl DbParameter {
    /// Creates an input parameter
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            db_type: None,
            direction: ParameterDirection::Input,
            size: None,
        }
    }

    /// Sets the explicit wire kind
    pub fn with_db_type(mut self, db_type: DbType) -> Self {
        self.db_type = Some(db_type);
        self
    }

    /// Sets the size hint
    pub fn with_size(mut self, size: i32) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets the direction
    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }
}

/// The parameter collection of a command
///
/// Names compare case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    params: Vec<DbParameter>,
}

impl ParameterSet {
    /// Creates an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter
    pub fn add(&mut self, param: DbParameter) {
        self.params.push(param);
    }

    /// Whether a parameter with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Position of the parameter with this name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.params
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Parameter by name
    pub fn get(&self, name: &str) -> Option<&DbParameter> {
        self.index_of(name).map(|i| &self.params[i])
    }

    /// Parameter by name, mutable
    pub fn get_mut(&mut self, name: &str) -> Option<&mut DbParameter> {
        match self.index_of(name) {
            Some(i) => Some(&mut self.params[i]),
            None => None,
        }
    }

    /// Returns the existing parameter with this name, or appends a new one
    /// holding a null value
    pub fn find_or_add(&mut self, name: &str) -> &mut DbParameter {
        let index = match self.index_of(name) {
            Some(i) => i,
            None => {
                self.params.push(DbParameter::new(name, Value::Null));
                self.params.len() - 1
            }
        };
        &mut self.params[index]
    }

    /// Removes every parameter
    pub fn clear(&mut self) {
        self.params.clear();
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Iterates in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, DbParameter> {
        self.params.iter()
    }

    /// Parameter names in insertion order
    pub fn names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type Item = &'a DbParameter;
    type IntoIter = std::slice::Iter<'a, DbParameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_set_lookup_is_case_insensitive() {
        let mut set = ParameterSet::new();
        set.add(DbParameter::new("UserId", Value::Integer(5)));

        assert!(set.contains("userid"));
        assert!(set.contains("USERID"));
        assert_eq!(set.get("userId").unwrap().value, Value::Integer(5));
        assert!(!set.contains("Name"));
    }

    #[test]
    fn test_find_or_add() {
        let mut set = ParameterSet::new();
        set.find_or_add("a").value = Value::Integer(1);
        set.find_or_add("A").value = Value::Integer(2);
        set.find_or_add("b");

        assert_eq!(set.len(), 2);
        assert_eq!(set.get("a").unwrap().value, Value::Integer(2));
        assert_eq!(set.get("b").unwrap().value, Value::Null);
        assert_eq!(set.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_parameter_builder() {
        let p = DbParameter::new("Name", Value::text("x"))
            .with_db_type(DbType::AnsiString)
            .with_size(50)
            .with_direction(ParameterDirection::InputOutput);

        assert_eq!(p.db_type, Some(DbType::AnsiString));
        assert_eq!(p.size, Some(50));
        assert_eq!(p.direction, ParameterDirection::InputOutput);
    }

    #[test]
    fn test_clear() {
        let mut set = ParameterSet::new();
        set.add(DbParameter::new("a", Value::Null));
        set.clear();
        assert!(set.is_empty());
    }
}
