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

//! Mapper calls as connection methods, backed by [`SqlMapper::global`]

use crate::core::Result;
use crate::driver::Connection;
use crate::mapper::{GridReader, MultiMapShapes, ResultShape, SqlField};

use super::command::IntoCommand;
use super::mapper::SqlMapper;
use super::params::SqlParams;
use super::rows::{MappedReader, QueryRows};

/// Extension methods on every [`Connection`]
///
/// # Example
///
/// ```ignore
/// use rowmap::ConnectionExt;
///
/// let names: Vec<String> = conn.query("select name from users", &())?;
/// let updated = conn.execute("update users set active = 1", &())?;
/// ```
pub trait ConnectionExt: Connection + Sized {
    fn execute<P: SqlParams>(&mut self, command: impl IntoCommand, params: &P) -> Result<u64> {
        SqlMapper::global().execute(self, command, params)
    }

    fn execute_many<P: SqlParams>(
        &mut self,
        command: impl IntoCommand,
        items: &[P],
    ) -> Result<u64> {
        SqlMapper::global().execute_many(self, command, items)
    }

    fn execute_scalar<T: SqlField, P: SqlParams>(
        &mut self,
        command: impl IntoCommand,
        params: &P,
    ) -> Result<T> {
        SqlMapper::global().execute_scalar(self, command, params)
    }

    fn execute_reader<'c, P: SqlParams>(
        &'c mut self,
        command: impl IntoCommand,
        params: &P,
    ) -> Result<MappedReader<'c>> {
        SqlMapper::global().execute_reader(self, command, params)
    }

    fn query<T: ResultShape, P: SqlParams>(
        &mut self,
        command: impl IntoCommand,
        params: &P,
    ) -> Result<Vec<T>> {
        SqlMapper::global().query(self, command, params)
    }

    fn query_rows<'c, T: ResultShape, P: SqlParams>(
        &'c mut self,
        command: impl IntoCommand,
        params: &'c P,
    ) -> Result<QueryRows<'c, T>> {
        SqlMapper::global().query_rows(self, command, params)
    }

    fn query_multi_map<S, R, P, F>(
        &mut self,
        command: impl IntoCommand,
        params: &P,
        split_on: &str,
        combiner: F,
    ) -> Result<Vec<R>>
    where
        S: MultiMapShapes,
        P: SqlParams,
        F: FnMut(S::Row) -> R,
    {
        SqlMapper::global()
            .query_multi_map::<S, R, P, F>(self, command, params, split_on, combiner)
    }

    fn query_multiple<'c, P: SqlParams>(
        &'c mut self,
        command: impl IntoCommand,
        params: &'c P,
    ) -> Result<GridReader<'c>> {
        SqlMapper::global().query_multiple(self, command, params)
    }
}

impl<C: Connection> ConnectionExt for C {}
