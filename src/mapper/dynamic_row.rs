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

//! Loosely-typed rows
//!
//! A [`DynamicRow`] is a value array read against a [`RowTable`] shared by
//! every row of the same deserializer. Writing an unknown field widens the
//! shared table; rows created before the widening pad lazily, so their
//! arrays stay valid. Removal leaves a tombstone in place.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::core::{Error, Result, Value};
use crate::driver::DataReader;

use super::deserializer::{ResultShape, RowDeserializer};
use super::field::SqlField;
use super::type_map::TypeRegistry;

static NULL: Value = Value::Null;

#[derive(Default)]
struct TableInner {
    names: Vec<Arc<str>>,
    lookup: FxHashMap<Arc<str>, usize>,
}

/// Ordered field names with a case-sensitive name index
///
/// Cloning shares the table. When a name repeats, the first occurrence
/// wins lookups.
#[derive(Clone, Default)]
pub struct RowTable {
    inner: Arc<RwLock<TableInner>>,
}

impl RowTable {
    /// Creates a table over `names`
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let mut inner = TableInner::default();
        for name in names {
            let name: Arc<str> = name.into();
            let index = inner.names.len();
            inner.lookup.entry(Arc::clone(&name)).or_insert(index);
            inner.names.push(name);
        }
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Index of the field named `name`
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.inner.read().lookup.get(name).copied()
    }

    /// Number of fields
    pub fn field_count(&self) -> usize {
        self.inner.read().names.len()
    }

    /// Field names in order
    pub fn field_names(&self) -> Vec<Arc<str>> {
        self.inner.read().names.clone()
    }

    /// Appends a field, failing when the name already exists
    pub fn add_field(&self, name: &str) -> Result<usize> {
        let mut inner = self.inner.write();
        if inner.lookup.contains_key(name) {
            return Err(Error::DuplicateKey(name.to_string()));
        }
        let index = inner.names.len();
        let name: Arc<str> = Arc::from(name);
        inner.lookup.insert(Arc::clone(&name), index);
        inner.names.push(name);
        Ok(index)
    }

    fn index_or_add(&self, name: &str) -> usize {
        if let Some(index) = self.index_of(name) {
            return index;
        }
        let mut inner = self.inner.write();
        if let Some(&index) = inner.lookup.get(name) {
            return index;
        }
        let index = inner.names.len();
        let name: Arc<str> = Arc::from(name);
        inner.lookup.insert(Arc::clone(&name), index);
        inner.names.push(name);
        index
    }

    fn ptr_eq(&self, other: &RowTable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RowTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.field_names()).finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Value(Value),
    Removed,
}

/// A row with runtime field names
#[derive(Clone)]
pub struct DynamicRow {
    table: RowTable,
    values: Vec<Slot>,
}

impl DynamicRow {
    /// Creates a row over `table` with positional `values`
    pub fn new(table: RowTable, values: Vec<Value>) -> Self {
        Self {
            table,
            values: values.into_iter().map(Slot::Value).collect(),
        }
    }

    /// The shared table
    pub fn table(&self) -> &RowTable {
        &self.table
    }

    /// Value of `name`
    ///
    /// A field the table knows but this row never stored reads as null.
    /// Unknown and removed fields return `None`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let index = self.table.index_of(name)?;
        match self.values.get(index) {
            Some(Slot::Value(v)) => Some(v),
            Some(Slot::Removed) => None,
            None => Some(&NULL),
        }
    }

    /// Converts the value of `name`
    pub fn get_as<T: SqlField>(&self, name: &str) -> Result<T> {
        let value = self
            .get(name)
            .ok_or_else(|| Error::ParameterNotFound(name.to_string()))?;
        T::from_value(value)
    }

    /// Whether `name` is present and not removed
    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets `name`, adding the field to the shared table when unknown
    pub fn set(&mut self, name: &str, value: Value) {
        let index = self.table.index_or_add(name);
        self.store(index, value);
    }

    /// Adds `name`, failing when this row already stores a value for it
    ///
    /// A field another row added to the shared table is not stored here
    /// yet, so adding it succeeds.
    pub fn add(&mut self, name: &str, value: Value) -> Result<()> {
        let stored = self
            .table
            .index_of(name)
            .is_some_and(|index| matches!(self.values.get(index), Some(Slot::Value(_))));
        if stored {
            return Err(Error::DuplicateKey(name.to_string()));
        }
        self.set(name, value);
        Ok(())
    }

    /// Removes `name`, returning whether it was present
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(index) = self.table.index_of(name) else {
            return false;
        };
        match self.values.get_mut(index) {
            Some(slot @ Slot::Value(_)) => {
                *slot = Slot::Removed;
                true
            }
            _ => false,
        }
    }

    /// Number of fields present
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether no field is present
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Present fields in table order
    pub fn iter(&self) -> impl Iterator<Item = (Arc<str>, &Value)> + '_ {
        self.table
            .field_names()
            .into_iter()
            .enumerate()
            .filter_map(move |(i, name)| match self.values.get(i) {
                Some(Slot::Value(v)) => Some((name, v)),
                Some(Slot::Removed) => None,
                None => Some((name, &NULL)),
            })
    }

    fn store(&mut self, index: usize, value: Value) {
        if self.values.len() <= index {
            let width = self.table.field_count().max(index + 1);
            self.values.resize(width, Slot::Removed);
        }
        self.values[index] = Slot::Value(value);
    }
}

impl PartialEq for DynamicRow {
    fn eq(&self, other: &Self) -> bool {
        if self.table.ptr_eq(&other.table) && self.values == other.values {
            return true;
        }
        self.iter().eq(other.iter())
    }
}

impl fmt::Display for DynamicRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{DynamicRow")?;
        for (name, value) in self.iter() {
            if value.is_null() {
                write!(f, ", {} = NULL", name)?;
            } else {
                write!(f, ", {} = '{}'", name, value)?;
            }
        }
        f.write_str("}")
    }
}

impl fmt::Debug for DynamicRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ResultShape for DynamicRow {
    const IS_DYNAMIC: bool = true;

    fn compile_deserializer(
        _registry: &TypeRegistry,
        reader: &dyn DataReader,
        start: usize,
        length: Option<usize>,
        return_null_if_first_missing: bool,
    ) -> Result<RowDeserializer<Self>> {
        let field_count = reader.field_count();
        if field_count <= start {
            return Err(Error::ambiguous_split(format!("column {}", start)));
        }
        let width = length
            .unwrap_or(field_count - start)
            .min(field_count - start);
        let table = RowTable::new((start..start + width).map(|i| reader.name(i).to_string()));
        tracing::debug!(start, width, "compiled dynamic row deserializer");

        Ok(Arc::new(move |reader: &dyn DataReader| -> Result<Option<Self>> {
            let mut values = Vec::with_capacity(width);
            for ordinal in start..start + width {
                let value = reader.get_value(ordinal)?;
                if ordinal == start && return_null_if_first_missing && value.is_null() {
                    return Ok(None);
                }
                values.push(value);
            }
            Ok(Some(DynamicRow::new(table.clone(), values)))
        }))
    }
}
