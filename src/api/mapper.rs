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

//! Mapper entry points
//!
//! A [`SqlMapper`] owns one coercion/handler registry and one plan cache.
//! Create isolated instances with [`SqlMapper::new`], or use the shared
//! process-wide instance from [`SqlMapper::global`] (which is what the
//! [`ConnectionExt`](super::ConnectionExt) methods do).
//!
//! Every call follows the same discipline: a connection that arrives closed
//! is opened for the call and closed again on every exit path; a connection
//! that arrives open is left open.
//!
//! # Example
//!
//! ```ignore
//! use rowmap::{impl_record, MapperConfig, SqlMapper};
//!
//! #[derive(Debug, Default)]
//! struct User { id: i64, name: String }
//! impl_record!(User { id, name });
//!
//! let mapper = SqlMapper::new(MapperConfig::default());
//! mapper.execute(&mut conn, "insert into users (id, name) values (@id, @name)",
//!     &User { id: 1, name: "ann".into() })?;
//!
//! let users: Vec<User> = mapper.query(&mut conn, "select id, name from users", &())?;
//! let count: i64 = mapper.execute_scalar(&mut conn, "select count(*) from users", &())?;
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::core::{ConnectionState, DbType, Result, TypeKey, Value};
use crate::driver::{Command, Connection, DataReader};
use crate::mapper::multi_map::multi_map_hash;
use crate::mapper::{
    column_hash, BindContext, BinderOptions, CacheStats, CachedSql, ColumnMap, CompiledPlan,
    GridReader, MapperConfig, MultiMapShapes, PlanCache, PlanKey, ResultShape, SqlField,
    TypeHandler, TypeRegistry,
};

use super::command::{CommandDefinition, IntoCommand};
use super::params::SqlParams;
use super::rows::{MappedReader, QueryRows, ReaderSession};

static GLOBAL: OnceLock<SqlMapper> = OnceLock::new();

/// A command resolved against its plan
struct Prepared {
    def: CommandDefinition,
    key: PlanKey,
    options: BinderOptions,
    plan: Arc<CompiledPlan>,
}

/// Registry, plan cache and the query/execute entry points
pub struct SqlMapper {
    config: MapperConfig,
    registry: TypeRegistry,
    cache: PlanCache,
}

impl SqlMapper {
    /// Creates a mapper with its own registry and cache
    pub fn new(config: MapperConfig) -> Self {
        Self {
            cache: PlanCache::new(&config),
            registry: TypeRegistry::new(),
            config,
        }
    }

    /// The process-wide mapper, created with the default configuration on
    /// first use
    pub fn global() -> &'static SqlMapper {
        GLOBAL.get_or_init(|| SqlMapper::new(MapperConfig::default()))
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Maps `T` to a wire kind and purges the plan cache
    pub fn add_type_map<T: 'static>(&self, db_type: DbType) {
        self.registry.add_type_map::<T>(db_type);
        self.cache.purge();
    }

    /// Registers a handler for `T` and purges the plan cache
    pub fn add_type_handler<T, H>(&self, handler: H)
    where
        T: Send + 'static,
        H: TypeHandler<T>,
    {
        self.registry.add_type_handler::<T, H>(handler);
        self.cache.purge();
    }

    /// Removes the handler for `T` and purges the plan cache
    pub fn remove_type_handler<T: 'static>(&self) {
        self.registry.remove_type_handler::<T>();
        self.cache.purge();
    }

    /// Removes every handler and purges the plan cache
    pub fn reset_type_handlers(&self) {
        self.registry.reset_type_handlers();
        self.cache.purge();
    }

    /// Installs (or with `None`, removes) the column map of record type `T`
    ///
    /// Only plans reading `T` are purged.
    pub fn set_type_map<T: 'static>(&self, map: Option<Arc<dyn ColumnMap>>) {
        let key = TypeKey::of::<T>();
        self.registry.set_column_map(key, map);
        self.cache.purge_by_result_type(key);
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// Drops every cached plan
    pub fn purge_query_cache(&self) {
        self.cache.purge();
    }

    /// Registers a callback fired after each purge of the whole cache
    pub fn on_cache_purged<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.cache.on_purged(listener);
    }

    pub fn cached_sql_count(&self) -> usize {
        self.cache.len()
    }

    /// Cached SQL with at most `ignore_hit_count_above` hits
    pub fn cached_sql(&self, ignore_hit_count_above: u64) -> Vec<CachedSql> {
        self.cache.cached_sql(ignore_hit_count_above)
    }

    pub fn hash_collisions(&self) -> Vec<(u64, usize)> {
        self.cache.hash_collisions()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // =========================================================================
    // Execute
    // =========================================================================

    /// Runs a command and returns the number of affected rows
    pub fn execute<P: SqlParams>(
        &self,
        conn: &mut dyn Connection,
        command: impl IntoCommand,
        params: &P,
    ) -> Result<u64> {
        let prepared = self.prepare::<P>(&*conn, command, None, &[])?;
        with_open(conn, |conn| {
            let mut cmd = self.create_command(conn, &prepared, params)?;
            let outcome = cmd.execute_non_query();
            if outcome.is_ok() {
                params.on_completed(cmd.as_ref());
            }
            cmd.dispose();
            outcome
        })
    }

    /// Runs a command once per parameter bag and returns the summed
    /// affected rows
    ///
    /// One driver command is reused: before each bag after the first its
    /// text is restored and its parameters cleared.
    pub fn execute_many<P: SqlParams>(
        &self,
        conn: &mut dyn Connection,
        command: impl IntoCommand,
        items: &[P],
    ) -> Result<u64> {
        let prepared = self.prepare::<P>(&*conn, command, None, &[])?;
        with_open(conn, |conn| {
            let mut cmd = prepared.def.setup(conn)?;
            let outcome = (|| -> Result<u64> {
                let mut total = 0;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        cmd.set_text(&prepared.def.text);
                        cmd.parameters_mut().clear();
                    }
                    self.bind(&prepared, cmd.as_mut(), item)?;
                    total += cmd.execute_non_query()?;
                }
                Ok(total)
            })();
            cmd.dispose();
            tracing::trace!(items = items.len(), "multi-execution finished");
            outcome
        })
    }

    /// Runs a command and returns the first column of the first row
    ///
    /// A null (or missing) value yields `T::default()`.
    pub fn execute_scalar<T: SqlField, P: SqlParams>(
        &self,
        conn: &mut dyn Connection,
        command: impl IntoCommand,
        params: &P,
    ) -> Result<T> {
        let prepared = self.prepare::<P>(&*conn, command, None, &[])?;
        let value = with_open(conn, |conn| {
            let mut cmd = self.create_command(conn, &prepared, params)?;
            let outcome = cmd.execute_scalar();
            if outcome.is_ok() {
                params.on_completed(cmd.as_ref());
            }
            cmd.dispose();
            outcome
        })?;
        self.parse_scalar(value)
    }

    /// Runs a command and hands back its reader
    ///
    /// Closing or dropping the reader disposes the command, and closes the
    /// connection when this call opened it.
    pub fn execute_reader<'c, P: SqlParams>(
        &self,
        conn: &'c mut dyn Connection,
        command: impl IntoCommand,
        params: &P,
    ) -> Result<MappedReader<'c>> {
        let prepared = self.prepare::<P>(&*conn, command, None, &[])?;
        Ok(MappedReader::new(self.open_session(conn, &prepared, params)?))
    }

    // =========================================================================
    // Query
    // =========================================================================

    /// Reads every row of the first result set into a list
    pub fn query<T: ResultShape, P: SqlParams>(
        &self,
        conn: &mut dyn Connection,
        command: impl IntoCommand,
        params: &P,
    ) -> Result<Vec<T>> {
        self.query_rows::<T, P>(conn, command, params)?.collect()
    }

    /// Reads the rows of the first result set
    ///
    /// Buffered commands (the default) are read to the end before this
    /// returns. Unbuffered commands stream: the reader stays open, holding
    /// the connection, until the rows are exhausted or dropped.
    pub fn query_rows<'c, T: ResultShape, P: SqlParams>(
        &self,
        conn: &'c mut dyn Connection,
        command: impl IntoCommand,
        params: &'c P,
    ) -> Result<QueryRows<'c, T>> {
        let prepared = self.prepare::<P>(&*conn, command, Some(TypeKey::of::<T>()), &[])?;
        let session = self
            .open_session(conn, &prepared, params)?
            .on_completed(move |cmd| params.on_completed(cmd));

        let deserializer = if session.reader().field_count() == 0 {
            None
        } else {
            let reader = session.reader();
            Some(prepared.plan.deserializer_for(column_hash(reader), || {
                T::compile_deserializer(&self.registry, reader, 0, None, false)
            })?)
        };

        let rows = QueryRows::streaming(session, deserializer);
        if prepared.def.buffered() {
            Ok(QueryRows::buffered(rows.collect::<Result<Vec<T>>>()?))
        } else {
            Ok(rows)
        }
    }

    /// Reads rows split across 2 to 7 shapes and combines each row
    ///
    /// `split_on` names the first column of every shape after the first
    /// (comma-separated when they differ, `*` for one column per shape).
    /// Joined shapes whose lead column is null arrive as `None`.
    pub fn query_multi_map<S, R, P, F>(
        &self,
        conn: &mut dyn Connection,
        command: impl IntoCommand,
        params: &P,
        split_on: &str,
        mut combiner: F,
    ) -> Result<Vec<R>>
    where
        S: MultiMapShapes,
        P: SqlParams,
        F: FnMut(S::Row) -> R,
    {
        let prepared = self.prepare::<P>(
            &*conn,
            command,
            Some(TypeKey::of::<S>()),
            &S::type_keys(),
        )?;
        let mut session = self
            .open_session(conn, &prepared, params)?
            .on_completed(move |cmd| params.on_completed(cmd));
        if session.reader().field_count() == 0 {
            session.release();
            return Ok(Vec::new());
        }

        let deserializer = {
            let reader = session.reader();
            prepared
                .plan
                .deserializer_for(multi_map_hash(reader, split_on), || {
                    S::compile(&self.registry, reader, split_on)
                })?
        };

        let mut rows = Vec::new();
        loop {
            let reader = session.reader_mut()?;
            if !reader.read()? {
                break;
            }
            rows.push(combiner(deserializer(&*reader)?));
        }
        session.finish()?;
        Ok(rows)
    }

    /// Runs a multi-statement command and returns a reader over its result
    /// sets
    ///
    /// The grid owns the command (and the connection, when this call opened
    /// it) until it is exhausted or dropped.
    pub fn query_multiple<'c, P: SqlParams>(
        &'c self,
        conn: &'c mut dyn Connection,
        command: impl IntoCommand,
        params: &'c P,
    ) -> Result<GridReader<'c>> {
        let prepared = self.prepare::<P>(
            &*conn,
            command,
            Some(TypeKey::of::<GridReader<'static>>()),
            &[],
        )?;
        let (reader, cmd, was_closed) = self.start_reader(&mut *conn, &prepared, params)?;
        let add_to_cache = prepared.def.add_to_cache();
        let grid = GridReader::new(
            reader,
            cmd,
            &self.registry,
            &self.cache,
            prepared.key,
            add_to_cache,
        )
        .on_completed(move |cmd| params.on_completed(cmd));
        Ok(if was_closed {
            grid.closing_connection(conn)
        } else {
            grid
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn binder_options(&self, def: &CommandDefinition, conn: &dyn Connection) -> BinderOptions {
        let mut options = BinderOptions::new(def.text.as_str(), def.kind);
        options.supports_arrays = conn.supports_arrays();
        options.remove_unused = self.config.remove_unused_parameters;
        options.default_string_size = self.config.default_string_size;
        options
    }

    /// Resolves the plan of a command, compiling the parameter binder on a
    /// miss
    fn prepare<P: SqlParams>(
        &self,
        conn: &dyn Connection,
        command: impl IntoCommand,
        result: Option<TypeKey>,
        others: &[TypeKey],
    ) -> Result<Prepared> {
        let def = command.into_command(&self.config);
        let mut key = PlanKey::new(
            &def.text,
            def.kind,
            conn.connection_string(),
            result,
            P::param_key(),
        );
        if !others.is_empty() {
            key = key.with_others(others);
        }
        let options = self.binder_options(&def, conn);
        let plan = self.cache.resolve(&key, def.add_to_cache(), || {
            let binder = match P::param_key() {
                Some(params) => {
                    tracing::debug!(
                        key = key.hash_code(),
                        params = params.short_name(),
                        result = result.map(|r| r.short_name()),
                        "compiling command plan"
                    );
                    Some(P::compile_binder(&self.registry, &options)?)
                }
                None => None,
            };
            Ok(CompiledPlan::new(binder))
        })?;
        Ok(Prepared {
            def,
            key,
            options,
            plan,
        })
    }

    fn bind<P: SqlParams>(
        &self,
        prepared: &Prepared,
        command: &mut dyn Command,
        params: &P,
    ) -> Result<()> {
        if let Some(binder) = prepared.plan.binder() {
            let ctx = BindContext {
                registry: &self.registry,
                cache: &self.cache,
                key: &prepared.key,
                options: &prepared.options,
            };
            binder(command, params, &ctx)?;
        }
        Ok(())
    }

    /// Creates and binds a driver command; the command is disposed when
    /// binding fails
    fn create_command<P: SqlParams>(
        &self,
        conn: &dyn Connection,
        prepared: &Prepared,
        params: &P,
    ) -> Result<Box<dyn Command>> {
        let mut command = prepared.def.setup(conn)?;
        if let Err(e) = self.bind(prepared, command.as_mut(), params) {
            command.dispose();
            return Err(e);
        }
        Ok(command)
    }

    /// Opens the connection when closed, then creates, binds and executes
    /// the command. On failure everything acquired here is released.
    fn start_reader<P: SqlParams>(
        &self,
        conn: &mut dyn Connection,
        prepared: &Prepared,
        params: &P,
    ) -> Result<(Box<dyn DataReader>, Box<dyn Command>, bool)> {
        let was_closed = conn.state() == ConnectionState::Closed;
        if was_closed {
            conn.open()?;
        }
        let started = self
            .create_command(&*conn, prepared, params)
            .and_then(|mut command| match command.execute_reader() {
                Ok(reader) => Ok((reader, command)),
                Err(e) => {
                    command.dispose();
                    Err(e)
                }
            });
        match started {
            Ok((reader, command)) => Ok((reader, command, was_closed)),
            Err(e) => {
                if was_closed {
                    close_quietly(conn);
                }
                Err(e)
            }
        }
    }

    fn open_session<'c, P: SqlParams>(
        &self,
        conn: &'c mut dyn Connection,
        prepared: &Prepared,
        params: &P,
    ) -> Result<ReaderSession<'c>> {
        let (reader, command, was_closed) = self.start_reader(&mut *conn, prepared, params)?;
        Ok(ReaderSession::new(reader, command, was_closed.then_some(conn)))
    }

    fn parse_scalar<T: SqlField>(&self, value: Value) -> Result<T> {
        if value.is_null() {
            return Ok(T::default());
        }
        match self.registry.read_handler(T::type_key(), T::field_kind()) {
            Some(handler) => T::from_handler(handler.parse(&value)?),
            None => T::from_value(&value),
        }
    }
}

impl Default for SqlMapper {
    fn default() -> Self {
        Self::new(MapperConfig::default())
    }
}

impl fmt::Debug for SqlMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlMapper")
            .field("config", &self.config)
            .field("cached_plans", &self.cache.len())
            .finish()
    }
}

/// Runs `f` with the connection open, restoring its prior state afterwards
fn with_open<R>(
    conn: &mut dyn Connection,
    f: impl FnOnce(&dyn Connection) -> Result<R>,
) -> Result<R> {
    let was_closed = conn.state() == ConnectionState::Closed;
    if was_closed {
        conn.open()?;
    }
    let outcome = f(&*conn);
    if was_closed {
        if let Err(e) = conn.close() {
            if outcome.is_ok() {
                return Err(e);
            }
            tracing::warn!(error = %e, "closing connection after a failed call");
        }
    }
    outcome
}

fn close_quietly(conn: &mut dyn Connection) {
    if let Err(e) = conn.close() {
        tracing::warn!(error = %e, "closing connection after a failed call");
    }
}
