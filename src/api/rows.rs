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

//! Query results
//!
//! # Example
//!
//! ```ignore
//! // Buffered (the default): the reader is already released
//! let users: Vec<User> = mapper.query(&mut conn, "SELECT id, name FROM users", &())?;
//!
//! // Streaming: rows are materialized as the iterator advances
//! let def = CommandDefinition::new("SELECT id, name FROM users").unbuffered();
//! for user in mapper.query_rows::<User, _>(&mut conn, def, &())? {
//!     let user = user?;
//!     println!("{}: {}", user.id, user.name);
//! }
//! ```

use std::fmt;

use crate::core::{DbType, Error, Result, Value};
use crate::driver::{Command, Connection, DataReader};
use crate::mapper::RowDeserializer;

type Completion<'c> = Box<dyn FnOnce(&dyn Command) + Send + 'c>;

/// An executing reader with the resources it keeps alive
///
/// Normal completion drains the remaining result sets and runs the
/// completion callback. Abandoning the session cancels the command first.
/// Either way the reader is closed, the command disposed and an owned
/// connection closed, exactly once.
pub(crate) struct ReaderSession<'c> {
    reader: Box<dyn DataReader>,
    command: Box<dyn Command>,
    connection: Option<&'c mut dyn Connection>,
    on_completed: Option<Completion<'c>>,
    released: bool,
}

impl<'c> ReaderSession<'c> {
    pub(crate) fn new(
        reader: Box<dyn DataReader>,
        command: Box<dyn Command>,
        connection: Option<&'c mut dyn Connection>,
    ) -> Self {
        Self {
            reader,
            command,
            connection,
            on_completed: None,
            released: false,
        }
    }

    pub(crate) fn on_completed<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&dyn Command) + Send + 'c,
    {
        self.on_completed = Some(Box::new(callback));
        self
    }

    pub(crate) fn reader(&self) -> &dyn DataReader {
        &*self.reader
    }

    pub(crate) fn reader_mut(&mut self) -> Result<&mut dyn DataReader> {
        if self.released {
            return Err(Error::ReaderDisposed);
        }
        Ok(&mut *self.reader)
    }

    /// Drains the remaining result sets, runs the completion callback and
    /// releases everything
    pub(crate) fn finish(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let drained = (|| -> Result<()> {
            while self.reader.next_result()? {}
            Ok(())
        })();
        if drained.is_ok() {
            self.reader.close();
            if let Some(callback) = self.on_completed.take() {
                callback(&*self.command);
            }
        }
        self.release();
        drained
    }

    /// Releases the reader, the command and an owned connection, cancelling
    /// the command first when the reader is still open
    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if !self.reader.is_closed() {
            if let Err(e) = self.command.cancel() {
                tracing::warn!(error = %e, "cancel during reader teardown failed");
            }
            self.reader.close();
        }
        self.command.dispose();
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close() {
                tracing::warn!(error = %e, "closing connection after read failed");
            }
        }
    }
}

impl Drop for ReaderSession<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

enum RowSource<'c, T> {
    Buffered(std::vec::IntoIter<T>),
    Streaming {
        session: ReaderSession<'c>,
        deserializer: Option<RowDeserializer<T>>,
        done: bool,
    },
}

/// Rows returned by a query
///
/// A buffered result holds the already-materialized rows; a streaming
/// result reads from the open reader as it is iterated, and releases the
/// reader (and a connection the call opened) when exhausted, on the first
/// error, or when dropped.
pub struct QueryRows<'c, T> {
    source: RowSource<'c, T>,
}

impl<'c, T> QueryRows<'c, T> {
    pub(crate) fn buffered(rows: Vec<T>) -> Self {
        Self {
            source: RowSource::Buffered(rows.into_iter()),
        }
    }

    /// Streams from `session`; without a deserializer (a result with no
    /// columns) nothing is yielded
    pub(crate) fn streaming(
        session: ReaderSession<'c>,
        deserializer: Option<RowDeserializer<T>>,
    ) -> Self {
        Self {
            source: RowSource::Streaming {
                session,
                deserializer,
                done: false,
            },
        }
    }

    /// Whether the rows were materialized before being returned
    pub fn is_buffered(&self) -> bool {
        matches!(self.source, RowSource::Buffered(_))
    }

    /// Releases the underlying reader without reading further rows
    pub fn close(&mut self) {
        if let RowSource::Streaming { session, done, .. } = &mut self.source {
            *done = true;
            session.release();
        }
    }
}

impl<T> Iterator for QueryRows<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let (session, deserializer, done) = match &mut self.source {
            RowSource::Buffered(rows) => return rows.next().map(Ok),
            RowSource::Streaming {
                session,
                deserializer,
                done,
            } => (session, deserializer, done),
        };
        if *done {
            return None;
        }
        let Some(deserializer) = deserializer.as_ref() else {
            *done = true;
            session.release();
            return None;
        };

        let row = (|| -> Result<Option<T>> {
            let reader = session.reader_mut()?;
            if !reader.read()? {
                return Ok(None);
            }
            match deserializer(&*reader)? {
                Some(row) => Ok(Some(row)),
                None => Err(Error::internal("row read as null")),
            }
        })();

        match row {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                *done = true;
                session.finish().err().map(Err)
            }
            Err(e) => {
                *done = true;
                session.release();
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.source {
            RowSource::Buffered(rows) => rows.size_hint(),
            RowSource::Streaming { done: true, .. } => (0, Some(0)),
            RowSource::Streaming { .. } => (0, None),
        }
    }
}

impl<T> fmt::Debug for QueryRows<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            RowSource::Buffered(rows) => f
                .debug_struct("QueryRows")
                .field("buffered", &true)
                .field("remaining", &rows.len())
                .finish(),
            RowSource::Streaming { done, .. } => f
                .debug_struct("QueryRows")
                .field("buffered", &false)
                .field("done", done)
                .finish(),
        }
    }
}

/// A raw reader handed out by `execute_reader`
///
/// Closing it (or dropping it) disposes the command and closes the
/// connection when the call opened it.
pub struct MappedReader<'c> {
    session: ReaderSession<'c>,
}

impl<'c> MappedReader<'c> {
    pub(crate) fn new(session: ReaderSession<'c>) -> Self {
        Self { session }
    }
}

impl DataReader for MappedReader<'_> {
    fn read(&mut self) -> Result<bool> {
        self.session.reader_mut()?.read()
    }

    fn field_count(&self) -> usize {
        self.session.reader().field_count()
    }

    fn name(&self, index: usize) -> &str {
        self.session.reader().name(index)
    }

    fn field_type(&self, index: usize) -> DbType {
        self.session.reader().field_type(index)
    }

    fn get_value(&self, index: usize) -> Result<Value> {
        if self.session.released {
            return Err(Error::ReaderDisposed);
        }
        self.session.reader().get_value(index)
    }

    fn next_result(&mut self) -> Result<bool> {
        self.session.reader_mut()?.next_result()
    }

    fn is_closed(&self) -> bool {
        self.session.released || self.session.reader().is_closed()
    }

    fn close(&mut self) {
        self.session.reader.close();
        self.session.release();
    }
}

impl fmt::Debug for MappedReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedReader")
            .field("fields", &self.field_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MemoryConnection, ResultSet};
    use std::sync::Arc;

    fn session(conn: &mut MemoryConnection) -> ReaderSession<'_> {
        conn.open().unwrap();
        let mut command = conn.create_command().unwrap();
        command.set_text("select id from t");
        let reader = command.execute_reader().unwrap();
        ReaderSession::new(reader, command, Some(conn as &mut dyn Connection))
    }

    fn ids() -> Vec<ResultSet> {
        vec![ResultSet::new(["id"]).with_rows(vec![
            vec![Value::Integer(1)],
            vec![Value::Integer(2)],
        ])]
    }

    fn int_deserializer() -> RowDeserializer<i64> {
        Arc::new(|reader: &dyn DataReader| -> Result<Option<i64>> {
            Ok(reader.get_value(0)?.as_int64())
        })
    }

    #[test]
    fn test_buffered_rows() {
        let rows = QueryRows::buffered(vec![1, 2, 3]);
        assert!(rows.is_buffered());
        assert_eq!(rows.size_hint(), (3, Some(3)));
        let values: Vec<i32> = rows.map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_streaming_releases_on_exhaustion() {
        let mut conn = MemoryConnection::returning(ids());
        let stats = conn.stats();
        let rows = QueryRows::streaming(session(&mut conn), Some(int_deserializer()));
        let values: Vec<i64> = rows.collect::<Result<_>>().unwrap();
        assert_eq!(values, vec![1, 2]);
        assert_eq!(stats.cancels(), 0);
        assert_eq!(stats.commands_disposed(), 1);
        assert_eq!(stats.closes(), 1);
    }

    #[test]
    fn test_streaming_drop_cancels() {
        let mut conn = MemoryConnection::returning(ids()).with_failing_cancel();
        let stats = conn.stats();
        {
            let mut rows = QueryRows::streaming(session(&mut conn), Some(int_deserializer()));
            assert_eq!(rows.next().unwrap().unwrap(), 1);
        }
        assert_eq!(stats.cancels(), 1);
        assert_eq!(stats.readers_closed(), 1);
        assert_eq!(stats.commands_disposed(), 1);
        assert_eq!(stats.closes(), 1);
    }

    #[test]
    fn test_no_columns_yields_nothing() {
        let mut conn = MemoryConnection::returning(vec![ResultSet::affected(3)]);
        let stats = conn.stats();
        let mut rows: QueryRows<'_, i64> = QueryRows::streaming(session(&mut conn), None);
        assert!(rows.next().is_none());
        assert!(rows.next().is_none());
        assert_eq!(stats.commands_disposed(), 1);
    }

    #[test]
    fn test_completion_runs_after_last_row() {
        let mut conn = MemoryConnection::returning(ids());
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&seen);
        let session = session(&mut conn).on_completed(move |cmd| {
            *sink.lock() = Some(cmd.text().to_string());
        });
        let rows = QueryRows::streaming(session, Some(int_deserializer()));
        assert_eq!(rows.count(), 2);
        assert_eq!(seen.lock().as_deref(), Some("select id from t"));
    }

    #[test]
    fn test_mapped_reader_close() {
        let mut conn = MemoryConnection::returning(ids());
        let stats = conn.stats();
        let mut reader = MappedReader::new(session(&mut conn));
        assert!(reader.read().unwrap());
        assert_eq!(reader.get_value(0).unwrap(), Value::Integer(1));
        reader.close();
        assert!(reader.is_closed());
        assert_eq!(reader.read().unwrap_err(), Error::ReaderDisposed);
        assert_eq!(stats.cancels(), 0);
        drop(reader);
        assert_eq!(stats.commands_disposed(), 1);
        assert_eq!(stats.closes(), 1);
    }
}
