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

//! Plan keys and column hashes
//!
//! A [`PlanKey`] identifies one compiled plan: normalized SQL text, command
//! kind, connection identity, result shape, parameter shape, the extra
//! shapes of a multi-map read and the result-set index of a grid read.
//! The hash is computed once at construction.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::core::{CommandKind, TypeKey};
use crate::driver::DataReader;

/// Immutable cache key for a compiled plan
#[derive(Clone)]
pub struct PlanKey {
    sql: Arc<str>,
    kind: CommandKind,
    connection: Arc<str>,
    result: Option<TypeKey>,
    params: Option<TypeKey>,
    others: SmallVec<[TypeKey; 6]>,
    grid_index: usize,
    hash: u64,
}

impl PlanKey {
    /// Builds a key for a single-shape read or an execute
    pub fn new(
        sql: &str,
        kind: CommandKind,
        connection: &str,
        result: Option<TypeKey>,
        params: Option<TypeKey>,
    ) -> Self {
        Self::build(
            Arc::from(normalize_sql(sql).as_ref()),
            kind,
            Arc::from(connection),
            result,
            params,
            SmallVec::new(),
            0,
        )
    }

    /// Adds the extra shapes of a multi-map read
    pub fn with_others(self, others: &[TypeKey]) -> Self {
        Self::build(
            self.sql,
            self.kind,
            self.connection,
            self.result,
            self.params,
            SmallVec::from_slice(others),
            self.grid_index,
        )
    }

    /// Derives the key of result set `grid_index` read as `result`
    pub fn for_grid(&self, result: TypeKey, grid_index: usize) -> Self {
        Self::build(
            Arc::clone(&self.sql),
            self.kind,
            Arc::clone(&self.connection),
            Some(result),
            self.params,
            SmallVec::new(),
            grid_index,
        )
    }

    /// Derives a multi-map key for result set `grid_index`
    pub fn for_grid_multi(&self, result: TypeKey, others: &[TypeKey], grid_index: usize) -> Self {
        Self::build(
            Arc::clone(&self.sql),
            self.kind,
            Arc::clone(&self.connection),
            Some(result),
            self.params,
            SmallVec::from_slice(others),
            grid_index,
        )
    }

    /// Derives the key used to cache a parameter template's binder
    pub fn for_parameter_template(&self, params: TypeKey) -> Self {
        Self::build(
            Arc::clone(&self.sql),
            self.kind,
            Arc::clone(&self.connection),
            None,
            Some(params),
            SmallVec::new(),
            0,
        )
    }

    fn build(
        sql: Arc<str>,
        kind: CommandKind,
        connection: Arc<str>,
        result: Option<TypeKey>,
        params: Option<TypeKey>,
        others: SmallVec<[TypeKey; 6]>,
        grid_index: usize,
    ) -> Self {
        let mut hasher = FxHasher::default();
        sql.hash(&mut hasher);
        kind.hash(&mut hasher);
        connection.hash(&mut hasher);
        result.hash(&mut hasher);
        params.hash(&mut hasher);
        others.hash(&mut hasher);
        grid_index.hash(&mut hasher);
        Self {
            sql,
            kind,
            connection,
            result,
            params,
            others,
            grid_index,
            hash: hasher.finish(),
        }
    }

    /// Normalized SQL text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Command kind
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Connection identity
    pub fn connection(&self) -> &str {
        &self.connection
    }

    /// Declared result shape
    pub fn result(&self) -> Option<TypeKey> {
        self.result
    }

    /// Declared parameter shape
    pub fn params(&self) -> Option<TypeKey> {
        self.params
    }

    /// Extra multi-map shapes
    pub fn others(&self) -> &[TypeKey] {
        &self.others
    }

    /// Result-set index of a grid read
    pub fn grid_index(&self) -> usize {
        self.grid_index
    }

    /// The precomputed hash
    pub fn hash_code(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for PlanKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.grid_index == other.grid_index
            && self.kind == other.kind
            && self.result == other.result
            && self.params == other.params
            && self.others == other.others
            && self.sql == other.sql
            && self.connection == other.connection
    }
}

impl Eq for PlanKey {}

impl Hash for PlanKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanKey")
            .field("sql", &self.sql)
            .field("kind", &self.kind)
            .field("result", &self.result.map(|t| t.name()))
            .field("params", &self.params.map(|t| t.name()))
            .field("grid_index", &self.grid_index)
            .finish()
    }
}

/// Order-sensitive fingerprint of a reader's column names
///
/// Seeded with the column count, then folded as `hash * 31 + name_hash`.
pub fn column_hash(reader: &dyn DataReader) -> u64 {
    let count = reader.field_count();
    let mut hash = count as u64;
    for i in 0..count {
        let mut hasher = FxHasher::default();
        reader.name(i).hash(&mut hasher);
        hash = hash.wrapping_mul(31).wrapping_add(hasher.finish());
    }
    hash
}

/// Trims the text and collapses runs of whitespace into a single space
pub fn normalize_sql(sql: &str) -> Cow<'_, str> {
    let trimmed = sql.trim();
    let mut prev_ws = false;
    let needs_normalization = trimmed.chars().any(|c| {
        let is_ws = c.is_whitespace();
        let collapse = is_ws && (prev_ws || c != ' ');
        prev_ws = is_ws;
        collapse
    });
    if !needs_normalization {
        return Cow::Borrowed(trimmed);
    }

    let mut out = String::with_capacity(trimmed.len());
    let mut prev_ws = false;
    for c in trimmed.chars() {
        if c.is_whitespace() {
            if !prev_ws {
                out.push(' ');
            }
            prev_ws = true;
        } else {
            out.push(c);
            prev_ws = false;
        }
    }
    Cow::Owned(out)
}
