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

//! Type coercion table, type handlers and custom column maps
//!
//! Every table is an immutable snapshot behind an `Arc`. Registration
//! clones the current snapshot, mutates the copy and swaps it in, so a
//! reader holding a snapshot never observes a half-applied update.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::core::{DbType, Error, Result, TypeKey, Value};
use crate::driver::DbParameter;

use super::field::FieldKind;

/// Custom conversion for a user type, in both directions
///
/// # Example
///
/// ```ignore
/// struct PointHandler;
///
/// impl TypeHandler<Point> for PointHandler {
///     fn set_value(&self, param: &mut DbParameter, value: &Point) -> Result<()> {
///         param.value = Value::text(format!("{},{}", value.x, value.y));
///         Ok(())
///     }
///
///     fn parse(&self, value: &Value) -> Result<Point> {
///         // ...
///     }
/// }
/// ```
pub trait TypeHandler<T>: Send + Sync + 'static {
    /// Writes `value` into the driver parameter
    fn set_value(&self, param: &mut DbParameter, value: &T) -> Result<()>;

    /// Parses a non-null wire value
    fn parse(&self, value: &Value) -> Result<T>;
}

/// Type-erased handler stored in the registry
pub trait AnyTypeHandler: Send + Sync {
    /// Writes a value of the handled type into the driver parameter
    fn set_value(&self, param: &mut DbParameter, value: &dyn Any) -> Result<()>;

    /// Parses a non-null wire value into a boxed value of the handled type
    fn parse(&self, value: &Value) -> Result<Box<dyn Any + Send>>;
}

struct HandlerAdapter<T, H> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T, H> AnyTypeHandler for HandlerAdapter<T, H>
where
    T: Send + 'static,
    H: TypeHandler<T>,
{
    fn set_value(&self, param: &mut DbParameter, value: &dyn Any) -> Result<()> {
        let typed = value.downcast_ref::<T>().ok_or_else(|| {
            Error::type_conversion("parameter value", std::any::type_name::<T>())
        })?;
        self.handler.set_value(param, typed)
    }

    fn parse(&self, value: &Value) -> Result<Box<dyn Any + Send>> {
        Ok(Box::new(self.handler.parse(value)?))
    }
}

/// Resolves a column name to a member name for one record type
pub trait ColumnMap: Send + Sync {
    /// The member receiving `column`, or `None` to leave the column unbound
    fn member_for(&self, column: &str) -> Option<String>;
}

/// A [`ColumnMap`] backed by a selector closure
pub struct CustomColumnMap {
    selector: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl CustomColumnMap {
    /// Creates a map from a column-to-member selector
    pub fn new<F>(selector: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            selector: Box::new(selector),
        }
    }
}

impl ColumnMap for CustomColumnMap {
    fn member_for(&self, column: &str) -> Option<String> {
        (self.selector)(column)
    }
}

/// Result of a coercion-table lookup
#[derive(Clone)]
pub enum Lookup {
    /// Bind directly with this wire kind
    Wire(DbType),
    /// Delegate to a registered handler
    Handler(Arc<dyn AnyTypeHandler>),
    /// Expand the collection into several parameters
    MultiValue,
    /// The value adds its own parameters
    Custom,
}

impl std::fmt::Debug for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lookup::Wire(t) => write!(f, "Wire({})", t),
            Lookup::Handler(_) => write!(f, "Handler"),
            Lookup::MultiValue => write!(f, "MultiValue"),
            Lookup::Custom => write!(f, "Custom"),
        }
    }
}

type TypeMapSnapshot = Arc<FxHashMap<TypeKey, DbType>>;
type HandlerSnapshot = Arc<FxHashMap<TypeKey, Arc<dyn AnyTypeHandler>>>;
type ColumnMapSnapshot = Arc<FxHashMap<TypeKey, Arc<dyn ColumnMap>>>;

/// The coercion table together with handlers and column maps
pub struct TypeRegistry {
    type_map: RwLock<TypeMapSnapshot>,
    handlers: RwLock<HandlerSnapshot>,
    column_maps: RwLock<ColumnMapSnapshot>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Creates a registry holding the default coercion table
    pub fn new() -> Self {
        Self {
            type_map: RwLock::new(Arc::new(default_type_map())),
            handlers: RwLock::new(Arc::new(FxHashMap::default())),
            column_maps: RwLock::new(Arc::new(FxHashMap::default())),
        }
    }

    /// Maps `T` to a wire kind, replacing any existing mapping
    pub fn add_type_map<T: 'static>(&self, db_type: DbType) {
        self.add_type_map_key(TypeKey::of::<T>(), db_type);
    }

    /// Maps a type key to a wire kind
    pub fn add_type_map_key(&self, key: TypeKey, db_type: DbType) {
        let mut guard = self.type_map.write();
        if guard.get(&key) == Some(&db_type) {
            return;
        }
        let mut copy = FxHashMap::clone(&guard);
        copy.insert(key, db_type);
        *guard = Arc::new(copy);
    }

    /// Registers a handler for `T`
    pub fn add_type_handler<T, H>(&self, handler: H)
    where
        T: Send + 'static,
        H: TypeHandler<T>,
    {
        let erased: Arc<dyn AnyTypeHandler> = Arc::new(HandlerAdapter {
            handler,
            _marker: PhantomData::<fn() -> T>,
        });
        let mut guard = self.handlers.write();
        let mut copy = FxHashMap::clone(&guard);
        copy.insert(TypeKey::of::<T>(), erased);
        *guard = Arc::new(copy);
    }

    /// Removes the handler for `T`, if any
    pub fn remove_type_handler<T: 'static>(&self) {
        let key = TypeKey::of::<T>();
        let mut guard = self.handlers.write();
        if !guard.contains_key(&key) {
            return;
        }
        let mut copy = FxHashMap::clone(&guard);
        copy.remove(&key);
        *guard = Arc::new(copy);
    }

    /// Removes every registered handler
    pub fn reset_type_handlers(&self) {
        *self.handlers.write() = Arc::new(FxHashMap::default());
    }

    /// Installs a column map for a record type
    pub fn set_column_map(&self, key: TypeKey, map: Option<Arc<dyn ColumnMap>>) {
        let mut guard = self.column_maps.write();
        let mut copy = FxHashMap::clone(&guard);
        match map {
            Some(map) => {
                copy.insert(key, map);
            }
            None => {
                copy.remove(&key);
            }
        }
        *guard = Arc::new(copy);
    }

    /// The wire kind mapped for `key`
    pub fn db_type_of(&self, key: TypeKey) -> Option<DbType> {
        self.type_map.read().get(&key).copied()
    }

    /// The handler registered for `key`
    pub fn handler(&self, key: TypeKey) -> Option<Arc<dyn AnyTypeHandler>> {
        self.handlers.read().get(&key).cloned()
    }

    /// The column map registered for `key`
    pub fn column_map(&self, key: TypeKey) -> Option<Arc<dyn ColumnMap>> {
        self.column_maps.read().get(&key).cloned()
    }

    /// Whether values of `key` should be read through a handler
    ///
    /// Types in the coercion table and enums read natively even when a
    /// handler is registered for them.
    pub fn read_handler(&self, key: TypeKey, kind: FieldKind) -> Option<Arc<dyn AnyTypeHandler>> {
        if matches!(kind, FieldKind::Enum { .. }) || self.db_type_of(key).is_some() {
            return None;
        }
        self.handler(key)
    }

    /// Resolves how a parameter member is bound
    ///
    /// Custom parameters come first, then the coercion table, enum
    /// underlying types, sequences and finally handlers.
    pub fn lookup(&self, member: &str, key: TypeKey, kind: FieldKind) -> Result<Lookup> {
        if kind == FieldKind::CustomParameter {
            return Ok(Lookup::Custom);
        }
        if let Some(db_type) = self.db_type_of(key) {
            return Ok(Lookup::Wire(db_type));
        }
        match kind {
            FieldKind::Enum { underlying } => return Ok(Lookup::Wire(underlying)),
            FieldKind::Sequence => return Ok(Lookup::MultiValue),
            _ => {}
        }
        if let Some(handler) = self.handler(key) {
            return Ok(Lookup::Handler(handler));
        }
        Err(Error::unsupported_type(member, key.name()))
    }
}

fn default_type_map() -> FxHashMap<TypeKey, DbType> {
    let mut map = FxHashMap::default();
    map.insert(TypeKey::of::<u8>(), DbType::Byte);
    map.insert(TypeKey::of::<i8>(), DbType::SByte);
    map.insert(TypeKey::of::<i16>(), DbType::Int16);
    map.insert(TypeKey::of::<u16>(), DbType::UInt16);
    map.insert(TypeKey::of::<i32>(), DbType::Int32);
    map.insert(TypeKey::of::<u32>(), DbType::UInt32);
    map.insert(TypeKey::of::<i64>(), DbType::Int64);
    map.insert(TypeKey::of::<u64>(), DbType::UInt64);
    map.insert(TypeKey::of::<f32>(), DbType::Single);
    map.insert(TypeKey::of::<f64>(), DbType::Double);
    map.insert(TypeKey::of::<bool>(), DbType::Boolean);
    map.insert(TypeKey::of::<String>(), DbType::String);
    map.insert(TypeKey::of::<char>(), DbType::StringFixedLength);
    map.insert(TypeKey::of::<Uuid>(), DbType::Guid);
    map.insert(TypeKey::of::<DateTime<Utc>>(), DbType::DateTime);
    map.insert(TypeKey::of::<NaiveDateTime>(), DbType::DateTime);
    map.insert(TypeKey::of::<NaiveDate>(), DbType::DateTime);
    map.insert(TypeKey::of::<DateTime<FixedOffset>>(), DbType::DateTimeOffset);
    map.insert(TypeKey::of::<NaiveTime>(), DbType::Time);
    map.insert(TypeKey::of::<Vec<u8>>(), DbType::Binary);
    map.insert(TypeKey::of::<Value>(), DbType::Object);
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, Default, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    struct PointHandler;

    impl TypeHandler<Point> for PointHandler {
        fn set_value(&self, param: &mut DbParameter, value: &Point) -> Result<()> {
            param.value = Value::text(format!("{},{}", value.x, value.y));
            Ok(())
        }

        fn parse(&self, value: &Value) -> Result<Point> {
            let s = value.as_str().unwrap_or_default();
            let (x, y) = s.split_once(',').unwrap_or(("0", "0"));
            Ok(Point {
                x: x.parse().unwrap_or(0),
                y: y.parse().unwrap_or(0),
            })
        }
    }

    #[test]
    fn test_default_lookups() {
        let registry = TypeRegistry::new();
        let wire = |key| match registry.lookup("m", key, FieldKind::Scalar).unwrap() {
            Lookup::Wire(t) => t,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(wire(TypeKey::of::<i32>()), DbType::Int32);
        assert_eq!(wire(TypeKey::of::<String>()), DbType::String);
        assert_eq!(wire(TypeKey::of::<char>()), DbType::StringFixedLength);
        assert_eq!(wire(TypeKey::of::<NaiveTime>()), DbType::Time);
        assert_eq!(wire(TypeKey::of::<Vec<u8>>()), DbType::Binary);
    }

    #[test]
    fn test_enum_and_sequence_lookups() {
        let registry = TypeRegistry::new();
        struct Status;
        let lookup = registry
            .lookup("s", TypeKey::of::<Status>(), FieldKind::Enum { underlying: DbType::Int16 })
            .unwrap();
        assert!(matches!(lookup, Lookup::Wire(DbType::Int16)));

        registry.add_type_map::<Status>(DbType::String);
        let lookup = registry
            .lookup("s", TypeKey::of::<Status>(), FieldKind::Enum { underlying: DbType::Int16 })
            .unwrap();
        assert!(matches!(lookup, Lookup::Wire(DbType::String)));

        let lookup = registry
            .lookup("ids", TypeKey::of::<Vec<i32>>(), FieldKind::Sequence)
            .unwrap();
        assert!(matches!(lookup, Lookup::MultiValue));
    }

    #[test]
    fn test_unsupported_type() {
        let registry = TypeRegistry::new();
        let err = registry
            .lookup("Tags", TypeKey::of::<HashSet<i32>>(), FieldKind::Opaque)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { ref member, .. } if member == "Tags"));
        assert!(err.is_fatal_configuration());
    }

    #[test]
    fn test_handler_registration_and_reset() {
        let registry = TypeRegistry::new();
        let key = TypeKey::of::<Point>();
        registry.add_type_handler::<Point, _>(PointHandler);

        let handler = match registry.lookup("p", key, FieldKind::Opaque).unwrap() {
            Lookup::Handler(h) => h,
            other => panic!("unexpected {:?}", other),
        };
        let mut param = DbParameter::new("p", Value::Null);
        handler.set_value(&mut param, &Point { x: 1, y: 2 }).unwrap();
        assert_eq!(param.value, Value::text("1,2"));
        let parsed = handler.parse(&Value::text("3,4")).unwrap();
        assert_eq!(*parsed.downcast::<Point>().unwrap(), Point { x: 3, y: 4 });
        assert!(registry.read_handler(key, FieldKind::Opaque).is_some());

        registry.reset_type_handlers();
        assert!(registry.lookup("p", key, FieldKind::Opaque).is_err());
    }

    #[test]
    fn test_type_map_wins_over_handler() {
        let registry = TypeRegistry::new();
        struct StringHandler;
        impl TypeHandler<String> for StringHandler {
            fn set_value(&self, param: &mut DbParameter, value: &String) -> Result<()> {
                param.value = Value::text(value.to_uppercase());
                Ok(())
            }
            fn parse(&self, value: &Value) -> Result<String> {
                Ok(value.to_string())
            }
        }
        registry.add_type_handler::<String, _>(StringHandler);
        let key = TypeKey::of::<String>();
        assert!(matches!(
            registry.lookup("s", key, FieldKind::Scalar).unwrap(),
            Lookup::Wire(DbType::String)
        ));
        assert!(registry.read_handler(key, FieldKind::Scalar).is_none());
    }

    #[test]
    fn test_snapshots_are_copy_on_write() {
        let registry = TypeRegistry::new();
        let before: TypeMapSnapshot = registry.type_map.read().clone();
        registry.add_type_map::<i32>(DbType::Int64);
        assert_eq!(before.get(&TypeKey::of::<i32>()), Some(&DbType::Int32));
        assert_eq!(registry.db_type_of(TypeKey::of::<i32>()), Some(DbType::Int64));
    }

    #[test]
    fn test_custom_column_map() {
        let registry = TypeRegistry::new();
        let key = TypeKey::of::<Point>();
        let map = CustomColumnMap::new(|column| match column {
            "px" => Some("x".to_string()),
            "py" => Some("y".to_string()),
            _ => None,
        });
        registry.set_column_map(key, Some(Arc::new(map)));
        let map = registry.column_map(key).unwrap();
        assert_eq!(map.member_for("px").as_deref(), Some("x"));
        assert_eq!(map.member_for("other"), None);

        registry.set_column_map(key, None);
        assert!(registry.column_map(key).is_none());
    }
}
