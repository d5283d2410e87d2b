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

//! Grid reader over a multi-result-set execution
//!
//! Result sets are read strictly in order, each exactly once. Reading the
//! last set (or abandoning a partially read one) advances the grid; when no
//! set remains the reader, the command and, when the grid opened it, the
//! connection are released. Disposal is idempotent and also runs on drop.

use std::fmt;

use crate::core::{Error, Result, TypeKey};
use crate::driver::{Command, Connection, DataReader};

use super::deserializer::{ResultShape, RowDeserializer};
use super::identity::{column_hash, PlanKey};
use super::multi_map::{multi_map_hash, MultiMapShapes};
use super::plan_cache::{CompiledPlan, PlanCache};
use super::type_map::TypeRegistry;

type Completion<'a> = Box<dyn FnOnce(&dyn Command) + 'a>;

/// Sequential reader over the result sets of one command
pub struct GridReader<'a> {
    reader: Option<Box<dyn DataReader>>,
    command: Option<Box<dyn Command>>,
    connection: Option<&'a mut dyn Connection>,
    on_completed: Option<Completion<'a>>,
    registry: &'a TypeRegistry,
    cache: &'a PlanCache,
    key: PlanKey,
    add_to_cache: bool,
    grid_index: usize,
    consumed: bool,
}

impl<'a> GridReader<'a> {
    pub(crate) fn new(
        reader: Box<dyn DataReader>,
        command: Box<dyn Command>,
        registry: &'a TypeRegistry,
        cache: &'a PlanCache,
        key: PlanKey,
        add_to_cache: bool,
    ) -> Self {
        Self {
            reader: Some(reader),
            command: Some(command),
            connection: None,
            on_completed: None,
            registry,
            cache,
            key,
            add_to_cache,
            grid_index: 0,
            consumed: false,
        }
    }

    /// Closes `connection` when the grid is disposed
    pub(crate) fn closing_connection(mut self, connection: &'a mut dyn Connection) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Runs `callback` with the command once the last set has been read
    pub(crate) fn on_completed<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&dyn Command) + 'a,
    {
        self.on_completed = Some(Box::new(callback));
        self
    }

    /// Index of the current result set
    pub fn result_index(&self) -> usize {
        self.grid_index
    }

    /// Whether the current result set has been handed out
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Whether the grid has released its reader
    pub fn is_disposed(&self) -> bool {
        self.reader.is_none()
    }

    /// Reads the current result set into a list and advances
    pub fn read<T: ResultShape>(&mut self) -> Result<Vec<T>> {
        self.read_lazy::<T>()?.collect()
    }

    /// Streams the current result set
    ///
    /// The grid advances once the rows are exhausted, when a row fails, or
    /// when the iterator is dropped after yielding at least one row. An
    /// iterator dropped before its first row leaves the set consumed.
    pub fn read_lazy<T: ResultShape>(&mut self) -> Result<GridRows<'_, 'a, T>> {
        self.ensure_readable()?;
        let key = self.key.for_grid(TypeKey::of::<T>(), self.grid_index);
        let deserializer = {
            let reader = self.current_reader()?;
            let plan = self.plan(&key)?;
            plan.deserializer_for(column_hash(reader), || {
                T::compile_deserializer(self.registry, reader, 0, None, false)
            })?
        };
        self.consumed = true;
        Ok(GridRows {
            grid_index: self.grid_index,
            grid: self,
            deserializer,
            started: false,
            finished: false,
        })
    }

    /// Reads the current result set through a multi-map split and advances
    pub fn read_multi<S, R, F>(&mut self, split_on: &str, mut combiner: F) -> Result<Vec<R>>
    where
        S: MultiMapShapes,
        F: FnMut(S::Row) -> R,
    {
        self.ensure_readable()?;
        let key = self
            .key
            .for_grid_multi(TypeKey::of::<S>(), &S::type_keys(), self.grid_index);
        let deserializer = {
            let reader = self.current_reader()?;
            let plan = self.plan(&key)?;
            plan.deserializer_for(multi_map_hash(reader, split_on), || {
                S::compile(self.registry, reader, split_on)
            })?
        };
        self.consumed = true;

        let mut rows = Vec::new();
        let outcome = (|| -> Result<()> {
            let reader = self
                .reader
                .as_mut()
                .ok_or(Error::ReaderDisposed)?;
            while reader.read()? {
                rows.push(combiner(deserializer(&**reader)?));
            }
            Ok(())
        })();
        let advanced = self.next_result();
        outcome?;
        advanced?;
        Ok(rows)
    }

    /// Releases the reader, the command and an owned connection
    ///
    /// An in-flight reader is cancelled first; a failing cancel is logged
    /// and ignored. Calling this again has no effect.
    pub fn dispose(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            if !reader.is_closed() {
                if let Some(command) = self.command.as_mut() {
                    if let Err(e) = command.cancel() {
                        tracing::warn!(error = %e, "cancel during grid disposal failed");
                    }
                }
            }
            reader.close();
        }
        if let Some(mut command) = self.command.take() {
            command.dispose();
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close() {
                tracing::warn!(error = %e, "closing grid connection failed");
            }
        }
    }

    fn ensure_readable(&self) -> Result<()> {
        if self.reader.is_none() {
            return Err(Error::ReaderDisposed);
        }
        if self.consumed {
            return Err(Error::Sequence);
        }
        Ok(())
    }

    fn current_reader(&self) -> Result<&dyn DataReader> {
        self.reader.as_deref().ok_or(Error::ReaderDisposed)
    }

    fn plan(&self, key: &PlanKey) -> Result<std::sync::Arc<CompiledPlan>> {
        self.cache
            .resolve(key, self.add_to_cache, || Ok(CompiledPlan::new(None)))
    }

    fn next_result(&mut self) -> Result<()> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(());
        };
        if reader.next_result()? {
            self.grid_index += 1;
            self.consumed = false;
            return Ok(());
        }
        reader.close();
        if let Some(callback) = self.on_completed.take() {
            if let Some(command) = self.command.as_deref() {
                callback(command);
            }
        }
        tracing::trace!(sets = self.grid_index + 1, "grid exhausted");
        self.dispose();
        Ok(())
    }
}

impl Drop for GridReader<'_> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for GridReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridReader")
            .field("sql", &self.key.sql())
            .field("grid_index", &self.grid_index)
            .field("consumed", &self.consumed)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Rows of one grid result set
pub struct GridRows<'g, 'a, T> {
    grid: &'g mut GridReader<'a>,
    deserializer: RowDeserializer<T>,
    grid_index: usize,
    started: bool,
    finished: bool,
}

impl<T> GridRows<'_, '_, T> {
    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        if self.grid.grid_index == self.grid_index {
            self.grid.next_result()?;
        }
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<T>> {
        let reader = self.grid.reader.as_mut().ok_or(Error::ReaderDisposed)?;
        if !reader.read()? {
            return Ok(None);
        }
        match (self.deserializer)(&**reader)? {
            Some(row) => Ok(Some(row)),
            None => Err(Error::internal("grid row read as null")),
        }
    }
}

impl<T> Iterator for GridRows<'_, '_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.grid.grid_index != self.grid_index {
            return None;
        }
        self.started = true;
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => self.finish().err().map(Err),
            Err(e) => {
                if let Err(advance) = self.finish() {
                    tracing::debug!(error = %advance, "advancing grid after a failed row");
                }
                Some(Err(e))
            }
        }
    }
}

impl<T> Drop for GridRows<'_, '_, T> {
    fn drop(&mut self) {
        if self.started && !self.finished {
            if let Err(e) = self.finish() {
                tracing::debug!(error = %e, "advancing grid on drop");
            }
        }
    }
}
