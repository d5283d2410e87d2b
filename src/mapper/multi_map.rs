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

//! Multi-mapping splitter
//!
//! Splits one row's columns into consecutive spans, one per declared shape,
//! at the boundary columns named by `split_on`. Every shape after the first
//! is compiled to return a typed null when its lead column is null, which
//! is how an absent left-joined row shows up.
//!
//! Typed first shapes are split right to left so that a child's key column
//! stays anchored to the start of the child's span even when an earlier
//! shape has a member of the same name. A dynamic first shape is split left
//! to right.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::core::{Error, Result, TypeKey};
use crate::driver::DataReader;

use super::deserializer::ResultShape;
use super::identity::column_hash;
use super::type_map::TypeRegistry;

/// Fewest shapes a multi-map read accepts
pub const MIN_SHAPES: usize = 2;

/// Most shapes a multi-map read accepts
pub const MAX_SHAPES: usize = 7;

/// A compiled multi-map row reader producing one value per shape
pub type MultiMapDeserializer<S> =
    Arc<dyn Fn(&dyn DataReader) -> Result<<S as MultiMapShapes>::Row> + Send + Sync>;

fn split_names(split_on: &str) -> Vec<&str> {
    split_on.split(',').map(str::trim).collect()
}

fn next_split_forward(start: usize, split: &str, columns: &[String]) -> Result<usize> {
    if start == columns.len() {
        return Err(Error::ambiguous_split(split));
    }
    if split == "*" {
        return Ok(start + 1);
    }
    Ok((start + 1..columns.len())
        .find(|&i| columns[i].eq_ignore_ascii_case(split))
        .unwrap_or(columns.len()))
}

fn next_split_backward(end: usize, split: &str, columns: &[String]) -> Result<usize> {
    if split == "*" {
        return end.checked_sub(1).ok_or_else(|| Error::ambiguous_split(split));
    }
    (1..end)
        .rev()
        .find(|&i| columns[i].eq_ignore_ascii_case(split))
        .ok_or_else(|| Error::ambiguous_split(split))
}

/// Column spans `(start, length)` for `shape_count` shapes, in declaration
/// order
///
/// `split_on` is a comma-separated list of boundary column names (or `*`
/// for every column boundary), matched case-insensitively.
pub fn split_spans(
    columns: &[String],
    first_is_dynamic: bool,
    split_on: &str,
    shape_count: usize,
) -> Result<Vec<(usize, usize)>> {
    if !(MIN_SHAPES..=MAX_SHAPES).contains(&shape_count) {
        return Err(Error::MultiMapArity(shape_count));
    }
    let splits = split_names(split_on);
    let multi_split = splits.len() > 1;
    let mut spans = Vec::with_capacity(shape_count);

    if first_is_dynamic {
        let mut position = 0;
        let mut split_index = 0;
        for _ in 0..shape_count {
            let split_point = next_split_forward(position, splits[split_index], columns)?;
            if multi_split && split_index < splits.len() - 1 {
                split_index += 1;
            }
            spans.push((position, split_point - position));
            position = split_point;
        }
        return Ok(spans);
    }

    let mut position = columns.len();
    let mut split_index = splits.len() - 1;
    for shape in (0..shape_count).rev() {
        let mut split_point = 0;
        if shape > 0 {
            split_point = next_split_backward(position, splits[split_index], columns)?;
            if multi_split && split_index > 0 {
                split_index -= 1;
            }
        }
        spans.push((split_point, position - split_point));
        position = split_point;
    }
    spans.reverse();
    Ok(spans)
}

/// Fingerprint of a multi-map layout: the column hash mixed with the
/// boundary names, so a different `split_on` never reuses a deserializer
pub fn multi_map_hash(reader: &dyn DataReader, split_on: &str) -> u64 {
    let mut hasher = FxHasher::default();
    column_hash(reader).hash(&mut hasher);
    split_on.hash(&mut hasher);
    hasher.finish()
}

/// A tuple of 2 to 7 result shapes read from one row
pub trait MultiMapShapes: Sized + 'static {
    /// What the combining closure receives: the first shape, then an
    /// optional value per joined shape
    type Row: Send + 'static;

    /// Number of shapes
    const ARITY: usize;

    /// Type identity of every shape, in declaration order
    fn type_keys() -> Vec<TypeKey>;

    /// Compiles a row reader for the reader's current column layout
    fn compile(
        registry: &TypeRegistry,
        reader: &dyn DataReader,
        split_on: &str,
    ) -> Result<MultiMapDeserializer<Self>>;
}

macro_rules! impl_multi_map_shapes {
    ($arity:expr; $first:ident; $($rest:ident $span:tt $slot:tt),+) => {
        impl<$first: ResultShape, $($rest: ResultShape),+> MultiMapShapes for ($first, $($rest),+) {
            type Row = ($first, $(Option<$rest>),+);

            const ARITY: usize = $arity;

            fn type_keys() -> Vec<TypeKey> {
                vec![TypeKey::of::<$first>(), $(TypeKey::of::<$rest>()),+]
            }

            fn compile(
                registry: &TypeRegistry,
                reader: &dyn DataReader,
                split_on: &str,
            ) -> Result<MultiMapDeserializer<Self>> {
                let spans = split_spans(
                    &reader.column_names(),
                    <$first as ResultShape>::IS_DYNAMIC,
                    split_on,
                    $arity,
                )?;
                tracing::debug!(split_on, ?spans, "compiled multi-map deserializer");

                let head = <$first as ResultShape>::compile_deserializer(
                    registry,
                    reader,
                    spans[0].0,
                    Some(spans[0].1),
                    false,
                )?;
                let tail = ($(
                    <$rest as ResultShape>::compile_deserializer(
                        registry,
                        reader,
                        spans[$span].0,
                        Some(spans[$span].1),
                        true,
                    )?,
                )+);

                Ok(Arc::new(move |reader: &dyn DataReader| -> Result<Self::Row> {
                    let first = head(reader)?
                        .ok_or_else(|| Error::internal("first multi-map shape read as null"))?;
                    Ok((first, $((tail.$slot)(reader)?),+))
                }))
            }
        }
    };
}

impl_multi_map_shapes!(2; T1; T2 1 0);
impl_multi_map_shapes!(3; T1; T2 1 0, T3 2 1);
impl_multi_map_shapes!(4; T1; T2 1 0, T3 2 1, T4 3 2);
impl_multi_map_shapes!(5; T1; T2 1 0, T3 2 1, T4 3 2, T5 4 3);
impl_multi_map_shapes!(6; T1; T2 1 0, T3 2 1, T4 3 2, T5 4 3, T6 5 4);
impl_multi_map_shapes!(7; T1; T2 1 0, T3 2 1, T4 3 2, T5 4 3, T6 5 4, T7 6 5);
