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

//! Row deserializer compiler
//!
//! A deserializer is compiled against a reader's column layout and a
//! column span (`start`, `length`). Scalars read the single column at
//! `start`. Records resolve each column of the span to a member once, at
//! compile time, and then only walk the resolved bindings per row.
//!
//! A deserializer returns `Ok(None)` for a typed null: the first bound
//! column was null and `return_null_if_first_missing` was requested, which
//! is how a multi-map read detects an absent joined row.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::core::{Error, Result, TypeKey, Value};
use crate::driver::DataReader;

use super::field::SqlField;
use super::shape::{CtorArgs, Member, Record, Shape};
use super::type_map::{AnyTypeHandler, TypeRegistry};

/// A compiled row deserializer
pub type RowDeserializer<T> = Arc<dyn Fn(&dyn DataReader) -> Result<Option<T>> + Send + Sync>;

/// Anything a row (or a column span of a row) can materialize into
pub trait ResultShape: Sized + Send + 'static {
    /// Whether this is the loosely-typed row shape
    const IS_DYNAMIC: bool = false;

    /// Compiles a deserializer for the columns `start..start + length` of
    /// the reader's current result set; `None` spans to the last column
    fn compile_deserializer(
        registry: &TypeRegistry,
        reader: &dyn DataReader,
        start: usize,
        length: Option<usize>,
        return_null_if_first_missing: bool,
    ) -> Result<RowDeserializer<Self>>;
}

/// Compiles a single-column deserializer for a scalar, enum or handled type
///
/// Types in the coercion table and enums convert natively; other types go
/// through their registered handler. A null column yields a typed null when
/// requested, and otherwise converts through the type itself (so `Option`
/// becomes `None` and non-nullable types fail).
pub fn scalar_deserializer<T: SqlField>(
    registry: &TypeRegistry,
    reader: &dyn DataReader,
    start: usize,
    return_null_if_first_missing: bool,
) -> Result<RowDeserializer<T>> {
    if reader.field_count() <= start {
        return Err(Error::ColumnIndexOutOfBounds { index: start });
    }
    let handler = registry.read_handler(T::type_key(), T::field_kind());
    tracing::debug!(
        result = std::any::type_name::<T>(),
        column = start,
        handled = handler.is_some(),
        "compiled scalar deserializer"
    );

    Ok(Arc::new(move |reader: &dyn DataReader| -> Result<Option<T>> {
        let value = reader.get_value(start)?;
        if value.is_null() {
            if return_null_if_first_missing {
                return Ok(None);
            }
            return T::from_value(&value).map(Some);
        }
        match &handler {
            Some(handler) => T::from_handler(handler.parse(&value)?).map(Some),
            None => T::from_value(&value).map(Some),
        }
    }))
}

fn names_match(member: &str, column: &str) -> bool {
    member == column || member.eq_ignore_ascii_case(column)
}

/// Whether the positional constructor accounts for exactly these columns
fn constructor_matches<T: 'static>(shape: &Shape<T>, columns: &[String]) -> bool {
    shape.constructor().is_some()
        && shape.members().len() == columns.len()
        && shape
            .members()
            .iter()
            .zip(columns)
            .all(|(m, c)| names_match(m.name(), c))
}

fn member_handler<T>(registry: &TypeRegistry, member: &Member<T>) -> Option<Arc<dyn AnyTypeHandler>> {
    registry.read_handler(member.type_key(), member.field_kind())
}

fn wrap_conversion(ordinal: usize, column: &str, value: &Value, err: Error) -> Error {
    Error::column_conversion(ordinal, column, value.describe(), err)
}

struct ColumnBinding {
    ordinal: usize,
    column: String,
    member: usize,
    handler: Option<Arc<dyn AnyTypeHandler>>,
}

/// Compiles a deserializer for a record type
///
/// Binds through the positional constructor when its members account for
/// every column of the span, in order. Otherwise creates a default instance
/// and assigns members by column name, honoring a custom column map. Fails
/// with [`Error::MissingConstructor`] when neither is possible.
pub fn record_deserializer<T: Record>(
    registry: &TypeRegistry,
    reader: &dyn DataReader,
    start: usize,
    length: Option<usize>,
    return_null_if_first_missing: bool,
) -> Result<RowDeserializer<T>> {
    let field_count = reader.field_count();
    if field_count <= start {
        return Err(Error::ambiguous_split(format!("column {}", start)));
    }
    let length = length.unwrap_or(field_count - start).min(field_count - start);
    let columns: Vec<String> = (start..start + length)
        .map(|i| reader.name(i).to_string())
        .collect();
    let shape = T::shape();

    if constructor_matches(&shape, &columns) {
        return constructor_deserializer(registry, shape, columns, start, return_null_if_first_missing);
    }

    let Some(create) = shape.default_constructor() else {
        let signature = columns
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{} {}", reader.field_type(start + i), name))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::MissingConstructor {
            type_name: std::any::type_name::<T>().to_string(),
            signature: format!("({})", signature),
        });
    };

    let column_map = registry.column_map(TypeKey::of::<T>());
    let bindings: Vec<ColumnBinding> = columns
        .into_iter()
        .enumerate()
        .filter_map(|(offset, column)| {
            let member = match &column_map {
                Some(map) => map
                    .member_for(&column)
                    .and_then(|name| shape.find_member(&name)),
                None => shape.find_member(&column),
            }?;
            Some(ColumnBinding {
                ordinal: start + offset,
                handler: member_handler(registry, &shape.members()[member]),
                column,
                member,
            })
        })
        .collect();

    tracing::debug!(
        result = std::any::type_name::<T>(),
        start,
        length,
        bound = bindings.len(),
        "compiled record deserializer"
    );

    Ok(Arc::new(move |reader: &dyn DataReader| -> Result<Option<T>> {
        let mut target = create();
        for (i, binding) in bindings.iter().enumerate() {
            let value = reader.get_value(binding.ordinal)?;
            if value.is_null() {
                if i == 0 && return_null_if_first_missing {
                    return Ok(None);
                }
                continue;
            }
            shape.members()[binding.member]
                .access()
                .assign(&mut target, &value, binding.handler.as_deref())
                .map_err(|e| wrap_conversion(binding.ordinal, &binding.column, &value, e))?;
        }
        Ok(Some(target))
    }))
}

fn constructor_deserializer<T: Record>(
    registry: &TypeRegistry,
    shape: Shape<T>,
    columns: Vec<String>,
    start: usize,
    return_null_if_first_missing: bool,
) -> Result<RowDeserializer<T>> {
    let Some(ctor) = shape.constructor() else {
        return Err(Error::internal("constructor binding without a constructor"));
    };
    let handlers: Vec<Option<Arc<dyn AnyTypeHandler>>> = shape
        .members()
        .iter()
        .map(|m| member_handler(registry, m))
        .collect();

    tracing::debug!(
        result = std::any::type_name::<T>(),
        start,
        arity = columns.len(),
        "compiled constructor deserializer"
    );

    Ok(Arc::new(move |reader: &dyn DataReader| -> Result<Option<T>> {
        let mut args = Vec::with_capacity(columns.len());
        for (offset, member) in shape.members().iter().enumerate() {
            let ordinal = start + offset;
            let value = reader.get_value(ordinal)?;
            if value.is_null() {
                if offset == 0 && return_null_if_first_missing {
                    return Ok(None);
                }
                args.push(member.access().default_arg());
                continue;
            }
            let arg = member
                .access()
                .read_arg(&value, handlers[offset].as_deref())
                .map_err(|e| wrap_conversion(ordinal, &columns[offset], &value, e))?;
            args.push(arg);
        }
        ctor(&mut CtorArgs::new(args)).map(Some)
    }))
}

/// Implements [`ResultShape`] for types that read as a single column
#[macro_export]
macro_rules! impl_scalar_shape {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::ResultShape for $ty {
                fn compile_deserializer(
                    registry: &$crate::TypeRegistry,
                    reader: &dyn $crate::DataReader,
                    start: usize,
                    _length: ::std::option::Option<usize>,
                    return_null_if_first_missing: bool,
                ) -> $crate::Result<$crate::RowDeserializer<Self>> {
                    $crate::mapper::deserializer::scalar_deserializer::<Self>(
                        registry,
                        reader,
                        start,
                        return_null_if_first_missing,
                    )
                }
            }
        )+
    };
}

impl_scalar_shape!(
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    bool,
    char,
    String,
    Uuid,
    DateTime<Utc>,
    DateTime<FixedOffset>,
    NaiveDateTime,
    NaiveDate,
    NaiveTime,
    Value,
    Vec<u8>,
);

impl<T: SqlField> ResultShape for Option<T> {
    fn compile_deserializer(
        registry: &TypeRegistry,
        reader: &dyn DataReader,
        start: usize,
        _length: Option<usize>,
        return_null_if_first_missing: bool,
    ) -> Result<RowDeserializer<Self>> {
        scalar_deserializer::<Self>(registry, reader, start, return_null_if_first_missing)
    }
}
