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

//! In-memory scripted driver (useful for testing and benchmarks)
//!
//! A [`MemoryConnection`] answers every executed command by calling a
//! script closure with the final command text and bound parameters. The
//! closure returns the result sets to stream back. Every lifecycle event
//! (open, close, dispose, cancel, reader close) is counted in
//! [`MemoryStats`] so tests can assert the mapper's cleanup discipline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::{CommandKind, ConnectionState, DbType, Error, ParameterDirection, Result, Value};

use super::{Command, Connection, DataReader, DbParameter, ParameterSet};

/// Script answering executed commands
pub type Script = Arc<dyn Fn(&ExecutedCommand) -> Result<Vec<ResultSet>> + Send + Sync>;

/// One result set returned by the scripted driver
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    columns: Vec<String>,
    types: Vec<DbType>,
    rows: Vec<Vec<Value>>,
    rows_affected: u64,
    outputs: Vec<(String, Value)>,
}

impl ResultSet {
    /// Creates an empty result set with the given columns
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Creates a column-less result reporting affected rows
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    /// Appends a row
    pub fn with_row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    /// Appends several rows
    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Declares column wire kinds instead of inferring them from the rows
    pub fn with_types(mut self, types: Vec<DbType>) -> Self {
        self.types = types;
        self
    }

    /// Sets an output parameter value applied after execution
    pub fn with_output(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outputs.push((name.into(), value));
        self
    }

    /// Column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn column_type(&self, index: usize) -> DbType {
        if let Some(t) = self.types.get(index) {
            return *t;
        }
        self.rows
            .iter()
            .filter_map(|r| r.get(index))
            .find(|v| !v.is_null())
            .map(Value::db_type)
            .unwrap_or(DbType::Object)
    }
}

/// Snapshot of a command at execution time
#[derive(Debug, Clone)]
pub struct ExecutedCommand {
    /// Final command text, after any rewriting by the binder
    pub text: String,
    /// Command kind
    pub kind: CommandKind,
    /// Bound parameters in binding order
    pub parameters: Vec<DbParameter>,
    /// Timeout requested by the caller
    pub timeout: Option<Duration>,
}

impl ExecutedCommand {
    /// Value of the named parameter
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| &p.value)
    }

    /// Parameter names in binding order
    pub fn param_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Lifecycle counters shared by a connection and everything it creates
#[derive(Debug, Default)]
pub struct MemoryStats {
    opens: AtomicUsize,
    closes: AtomicUsize,
    commands_created: AtomicUsize,
    commands_disposed: AtomicUsize,
    readers_closed: AtomicUsize,
    cancels: AtomicUsize,
    executed: Mutex<Vec<ExecutedCommand>>,
}

impl MemoryStats {
    /// Number of successful opens
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    /// Number of closes of an open connection
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }

    /// Number of commands created
    pub fn commands_created(&self) -> usize {
        self.commands_created.load(Ordering::Relaxed)
    }

    /// Number of commands disposed (each command counts once)
    pub fn commands_disposed(&self) -> usize {
        self.commands_disposed.load(Ordering::Relaxed)
    }

    /// Number of readers closed (each reader counts once)
    pub fn readers_closed(&self) -> usize {
        self.readers_closed.load(Ordering::Relaxed)
    }

    /// Number of cancel requests
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::Relaxed)
    }

    /// Every executed command, oldest first
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.executed.lock().clone()
    }

    /// The most recently executed command
    pub fn last_executed(&self) -> Option<ExecutedCommand> {
        self.executed.lock().last().cloned()
    }
}

/// A scripted in-memory connection
pub struct MemoryConnection {
    open: Arc<AtomicBool>,
    connection_string: String,
    script: Script,
    stats: Arc<MemoryStats>,
    supports_arrays: bool,
    fail_cancel: bool,
}

impl MemoryConnection {
    /// Creates a closed connection answering commands with `script`
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&ExecutedCommand) -> Result<Vec<ResultSet>> + Send + Sync + 'static,
    {
        Self {
            open: Arc::new(AtomicBool::new(false)),
            connection_string: "memory://".to_string(),
            script: Arc::new(script),
            stats: Arc::new(MemoryStats::default()),
            supports_arrays: false,
            fail_cancel: false,
        }
    }

    /// Creates a connection that answers every command with the same sets
    pub fn returning(sets: Vec<ResultSet>) -> Self {
        Self::new(move |_| Ok(sets.clone()))
    }

    /// Sets the connection identity
    pub fn with_connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = connection_string.into();
        self
    }

    /// Reports array parameter support
    pub fn with_array_support(mut self) -> Self {
        self.supports_arrays = true;
        self
    }

    /// Makes every cancel request fail
    pub fn with_failing_cancel(mut self) -> Self {
        self.fail_cancel = true;
        self
    }

    /// Shared lifecycle counters
    pub fn stats(&self) -> Arc<MemoryStats> {
        Arc::clone(&self.stats)
    }
}

impl Connection for MemoryConnection {
    fn state(&self) -> ConnectionState {
        if self.open.load(Ordering::Acquire) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.open.swap(true, Ordering::AcqRel) {
            return Err(Error::driver("connection is already open"));
        }
        self.stats.opens.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.open.swap(false, Ordering::AcqRel) {
            self.stats.closes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn create_command(&self) -> Result<Box<dyn Command>> {
        self.stats.commands_created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryCommand {
            text: String::new(),
            kind: CommandKind::Text,
            timeout: None,
            params: ParameterSet::new(),
            open: Arc::clone(&self.open),
            script: Arc::clone(&self.script),
            stats: Arc::clone(&self.stats),
            fail_cancel: self.fail_cancel,
            disposed: false,
        }))
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn supports_arrays(&self) -> bool {
        self.supports_arrays
    }
}

struct MemoryCommand {
    text: String,
    kind: CommandKind,
    timeout: Option<Duration>,
    params: ParameterSet,
    open: Arc<AtomicBool>,
    script: Script,
    stats: Arc<MemoryStats>,
    fail_cancel: bool,
    disposed: bool,
}

impl MemoryCommand {
    fn run(&mut self) -> Result<Vec<ResultSet>> {
        if self.disposed {
            return Err(Error::driver("command has been disposed"));
        }
        if !self.open.load(Ordering::Acquire) {
            return Err(Error::driver("connection is not open"));
        }
        let executed = ExecutedCommand {
            text: self.text.clone(),
            kind: self.kind,
            parameters: self.params.iter().cloned().collect(),
            timeout: self.timeout,
        };
        self.stats.executed.lock().push(executed.clone());

        let sets = (self.script)(&executed)?;
        for set in &sets {
            for (name, value) in &set.outputs {
                if let Some(param) = self.params.get_mut(name) {
                    if param.direction != ParameterDirection::Input {
                        param.value = value.clone();
                    }
                }
            }
        }
        Ok(sets)
    }
}

impl Command for MemoryCommand {
    fn text(&self) -> &str {
        &self.text
    }

    fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
    }

    fn kind(&self) -> CommandKind {
        self.kind
    }

    fn set_kind(&mut self, kind: CommandKind) {
        self.kind = kind;
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn execute_reader(&mut self) -> Result<Box<dyn DataReader>> {
        let sets = self.run()?;
        Ok(Box::new(MemoryReader {
            sets,
            set_index: 0,
            row: None,
            closed: false,
            stats: Arc::clone(&self.stats),
        }))
    }

    fn execute_scalar(&mut self) -> Result<Value> {
        let sets = self.run()?;
        Ok(sets
            .first()
            .and_then(|s| s.rows.first())
            .and_then(|r| r.first())
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn execute_non_query(&mut self) -> Result<u64> {
        let sets = self.run()?;
        Ok(sets.iter().map(|s| s.rows_affected).sum())
    }

    fn cancel(&mut self) -> Result<()> {
        self.stats.cancels.fetch_add(1, Ordering::Relaxed);
        if self.fail_cancel {
            return Err(Error::driver("cancel failed: command is broken"));
        }
        Ok(())
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.stats.commands_disposed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

struct MemoryReader {
    sets: Vec<ResultSet>,
    set_index: usize,
    row: Option<usize>,
    closed: bool,
    stats: Arc<MemoryStats>,
}

impl MemoryReader {
    fn current_set(&self) -> Option<&ResultSet> {
        if self.closed {
            return None;
        }
        self.sets.get(self.set_index)
    }
}

impl DataReader for MemoryReader {
    fn read(&mut self) -> Result<bool> {
        let len = match self.current_set() {
            Some(set) => set.rows.len(),
            None => return Ok(false),
        };
        let next = self.row.map_or(0, |r| r + 1);
        if next < len {
            self.row = Some(next);
            Ok(true)
        } else {
            self.row = Some(len);
            Ok(false)
        }
    }

    fn field_count(&self) -> usize {
        self.current_set().map_or(0, |s| s.columns.len())
    }

    fn name(&self, index: usize) -> &str {
        self.current_set()
            .and_then(|s| s.columns.get(index))
            .map_or("", String::as_str)
    }

    fn field_type(&self, index: usize) -> DbType {
        self.current_set()
            .map_or(DbType::Object, |s| s.column_type(index))
    }

    fn get_value(&self, index: usize) -> Result<Value> {
        let set = self
            .current_set()
            .ok_or_else(|| Error::driver("reader is closed"))?;
        let row = self
            .row
            .and_then(|r| set.rows.get(r))
            .ok_or_else(|| Error::driver("no current row"))?;
        row.get(index)
            .cloned()
            .ok_or(Error::ColumnIndexOutOfBounds { index })
    }

    fn next_result(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.row = None;
        if self.set_index + 1 < self.sets.len() {
            self.set_index += 1;
            Ok(true)
        } else {
            self.set_index = self.sets.len();
            Ok(false)
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.readers_closed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> ResultSet {
        ResultSet::new(["id", "name"])
            .with_row(vec![Value::Integer(1), Value::text("Alice")])
            .with_row(vec![Value::Integer(2), Value::text("Bob")])
    }

    #[test]
    fn test_reader_iterates_rows_and_sets() {
        let mut conn =
            MemoryConnection::returning(vec![users(), ResultSet::new(["n"]).with_row(vec![Value::Integer(9)])]);
        conn.open().unwrap();
        let mut cmd = conn.create_command().unwrap();
        cmd.set_text("select");
        let mut reader = cmd.execute_reader().unwrap();

        assert_eq!(reader.field_count(), 2);
        assert_eq!(reader.name(1), "name");
        assert_eq!(reader.field_type(0), DbType::Int64);
        assert!(reader.read().unwrap());
        assert_eq!(reader.get_value(1).unwrap(), Value::text("Alice"));
        assert!(reader.read().unwrap());
        assert!(!reader.read().unwrap());

        assert!(reader.next_result().unwrap());
        assert_eq!(reader.column_names(), vec!["n".to_string()]);
        assert!(reader.read().unwrap());
        assert_eq!(reader.get_value(0).unwrap(), Value::Integer(9));
        assert!(!reader.next_result().unwrap());
        assert_eq!(reader.field_count(), 0);

        reader.close();
        reader.close();
        assert_eq!(conn.stats().readers_closed(), 1);
    }

    #[test]
    fn test_execution_requires_open_connection() {
        let conn = MemoryConnection::returning(vec![users()]);
        let mut cmd = conn.create_command().unwrap();
        assert!(cmd.execute_non_query().is_err());
    }

    #[test]
    fn test_output_parameters_are_applied() {
        let mut conn = MemoryConnection::new(|_| {
            Ok(vec![ResultSet::affected(1).with_output("total", Value::Integer(10))])
        });
        conn.open().unwrap();
        let mut cmd = conn.create_command().unwrap();
        cmd.parameters_mut().add(
            DbParameter::new("total", Value::Null).with_direction(ParameterDirection::Output),
        );
        assert_eq!(cmd.execute_non_query().unwrap(), 1);
        assert_eq!(cmd.parameters().get("total").unwrap().value, Value::Integer(10));
    }

    #[test]
    fn test_lifecycle_counters() {
        let mut conn = MemoryConnection::returning(vec![]).with_failing_cancel();
        conn.open().unwrap();
        assert!(conn.open().is_err());
        let mut cmd = conn.create_command().unwrap();
        assert!(cmd.cancel().is_err());
        cmd.dispose();
        cmd.dispose();
        conn.close().unwrap();
        conn.close().unwrap();

        let stats = conn.stats();
        assert_eq!(stats.opens(), 1);
        assert_eq!(stats.closes(), 1);
        assert_eq!(stats.cancels(), 1);
        assert_eq!(stats.commands_disposed(), 1);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_scalar_and_log() {
        let mut conn = MemoryConnection::new(|cmd| {
            let v = cmd.param("x").cloned().unwrap_or(Value::Null);
            Ok(vec![ResultSet::new(["v"]).with_row(vec![v])])
        });
        conn.open().unwrap();
        let mut cmd = conn.create_command().unwrap();
        cmd.set_text("select @x");
        cmd.parameters_mut().add(DbParameter::new("x", Value::Integer(4)));
        assert_eq!(cmd.execute_scalar().unwrap(), Value::Integer(4));

        let last = conn.stats().last_executed().unwrap();
        assert_eq!(last.text, "select @x");
        assert_eq!(last.param_names(), vec!["x"]);
    }
}
