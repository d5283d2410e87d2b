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

//! Field types - values a record member or scalar result can hold
//!
//! [`SqlField`] is implemented here for the built-in scalar types, `Option`,
//! `Vec` (a sequence, or binary for `Vec<u8>`), [`DbString`], and through
//! the `sql_enum!` and `opaque_field!` macros for user types.

use std::any::Any;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::core::{DbType, Error, Result, TypeKey, Value};
use crate::driver::{Command, DbParameter};

use super::binder::text_size;

/// How the binder and deserializer treat a field type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A value with an entry in the coercion table
    Scalar,
    /// An enum carried on the wire as its underlying integer
    Enum {
        /// Wire kind of the underlying integer
        underlying: DbType,
    },
    /// A collection expanded into several parameters
    Sequence,
    /// A value that adds its own driver parameters
    CustomParameter,
    /// A user type that needs a registered type handler
    Opaque,
}

/// A member or scalar result type
pub trait SqlField: Any + Send + Sync + Default {
    /// How this type is bound and read
    fn field_kind() -> FieldKind;

    /// Coercion-table key; nullable wrappers report the inner type
    fn type_key() -> TypeKey {
        TypeKey::of::<Self>()
    }

    /// Whether database null maps to a representable value
    fn is_nullable() -> bool {
        false
    }

    /// Converts to a single wire value
    fn to_value(&self) -> Value;

    /// Element values when this is a sequence
    fn to_list(&self) -> Option<Vec<Value>> {
        None
    }

    /// Converts from a wire value
    fn from_value(value: &Value) -> Result<Self>;

    /// The value handed to a type handler, `None` for a null wrapper
    fn handler_value(&self) -> Option<&dyn Any> {
        Some(self)
    }

    /// Rebuilds the field from a handler's parse result
    fn from_handler(parsed: Box<dyn Any + Send>) -> Result<Self> {
        parsed
            .downcast::<Self>()
            .map(|b| *b)
            .map_err(|_| Error::type_conversion("handler output", std::any::type_name::<Self>()))
    }

    /// The custom parameter view of this value
    fn as_custom_parameter(&self) -> Option<&dyn CustomParameter> {
        None
    }
}

/// A value that adds its own parameter(s) to a command
pub trait CustomParameter: Send + Sync {
    /// Adds the parameter named `name`
    ///
    /// `string_size` is the configured text size, for values that size
    /// themselves the way the binder sizes text members.
    fn add_parameter(
        &self,
        command: &mut dyn Command,
        name: &str,
        string_size: i32,
    ) -> Result<()>;
}

pub(crate) fn conversion_error<T: ?Sized>(value: &Value) -> Error {
    Error::type_conversion(
        format!("{}({})", value.kind_name(), value),
        std::any::type_name::<T>(),
    )
}

// =========================================================================
// Built-in scalars
// =========================================================================

macro_rules! impl_integer_field {
    ($($t:ty),*) => {
        $(
            impl SqlField for $t {
                fn field_kind() -> FieldKind {
                    FieldKind::Scalar
                }

                fn to_value(&self) -> Value {
                    Value::Integer(*self as i64)
                }

                fn from_value(value: &Value) -> Result<Self> {
                    value
                        .as_int64()
                        .and_then(|i| <$t>::try_from(i).ok())
                        .ok_or_else(|| conversion_error::<$t>(value))
                }
            }
        )*
    };
}

impl_integer_field!(i8, i16, i32, i64, u8, u16, u32);

// u64 travels as the two's complement of its i64 representation
impl SqlField for u64 {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn to_value(&self) -> Value {
        Value::Integer(*self as i64)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_int64()
            .map(|i| i as u64)
            .ok_or_else(|| conversion_error::<u64>(value))
    }
}

impl SqlField for f64 {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_float64()
            .ok_or_else(|| conversion_error::<f64>(value))
    }
}

impl SqlField for f32 {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn to_value(&self) -> Value {
        Value::Float(*self as f64)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_float64()
            .map(|f| f as f32)
            .ok_or_else(|| conversion_error::<f32>(value))
    }
}

impl SqlField for bool {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_boolean()
            .ok_or_else(|| conversion_error::<bool>(value))
    }
}

impl SqlField for String {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn to_value(&self) -> Value {
        Value::text(self.as_str())
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_string()
            .ok_or_else(|| conversion_error::<String>(value))
    }
}

impl SqlField for char {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn to_value(&self) -> Value {
        Value::text(self.to_string())
    }

    fn from_value(value: &Value) -> Result<Self> {
        let s = value.as_str().ok_or_else(|| conversion_error::<char>(value))?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(Error::Format(s.to_string())),
        }
    }
}

impl SqlField for Uuid {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn to_value(&self) -> Value {
        Value::Guid(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value.as_guid().ok_or_else(|| conversion_error::<Uuid>(value))
    }
}

impl SqlField for DateTime<Utc> {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_timestamp()
            .ok_or_else(|| conversion_error::<DateTime<Utc>>(value))
    }
}

impl SqlField for DateTime<FixedOffset> {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn to_value(&self) -> Value {
        Value::Timestamp(self.with_timezone(&Utc))
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_timestamp()
            .map(|t| t.fixed_offset())
            .ok_or_else(|| conversion_error::<DateTime<FixedOffset>>(value))
    }
}

impl SqlField for NaiveDateTime {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn to_value(&self) -> Value {
        Value::Timestamp(self.and_utc())
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_timestamp()
            .map(|t| t.naive_utc())
            .ok_or_else(|| conversion_error::<NaiveDateTime>(value))
    }
}

impl SqlField for NaiveDate {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn to_value(&self) -> Value {
        Value::Timestamp(self.and_time(NaiveTime::default()).and_utc())
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_timestamp()
            .map(|t| t.date_naive())
            .ok_or_else(|| conversion_error::<NaiveDate>(value))
    }
}

impl SqlField for NaiveTime {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn to_value(&self) -> Value {
        Value::Time(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value.as_time().ok_or_else(|| conversion_error::<NaiveTime>(value))
    }
}

impl SqlField for Value {
    fn field_kind() -> FieldKind {
        FieldKind::Scalar
    }

    fn is_nullable() -> bool {
        true
    }

    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

// =========================================================================
// Wrappers
// =========================================================================

impl<T: SqlField> SqlField for Option<T> {
    fn field_kind() -> FieldKind {
        T::field_kind()
    }

    fn type_key() -> TypeKey {
        T::type_key()
    }

    fn is_nullable() -> bool {
        true
    }

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn to_list(&self) -> Option<Vec<Value>> {
        self.as_ref().and_then(T::to_list)
    }

    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }

    fn handler_value(&self) -> Option<&dyn Any> {
        self.as_ref().and_then(T::handler_value)
    }

    fn from_handler(parsed: Box<dyn Any + Send>) -> Result<Self> {
        T::from_handler(parsed).map(Some)
    }

    fn as_custom_parameter(&self) -> Option<&dyn CustomParameter> {
        self.as_ref().and_then(T::as_custom_parameter)
    }
}

fn is_byte_vec<T: 'static>() -> bool {
    TypeKey::of::<T>() == TypeKey::of::<u8>()
}

/// `Vec<u8>` is binary; any other `Vec<T>` is a sequence
impl<T: SqlField> SqlField for Vec<T> {
    fn field_kind() -> FieldKind {
        if is_byte_vec::<T>() {
            FieldKind::Scalar
        } else {
            FieldKind::Sequence
        }
    }

    fn to_value(&self) -> Value {
        if let Some(bytes) = (self as &dyn Any).downcast_ref::<Vec<u8>>() {
            return Value::binary(bytes.clone());
        }
        Value::array(self.iter().map(SqlField::to_value).collect())
    }

    fn to_list(&self) -> Option<Vec<Value>> {
        if is_byte_vec::<T>() {
            None
        } else {
            Some(self.iter().map(SqlField::to_value).collect())
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        if is_byte_vec::<T>() {
            let bytes = value
                .as_bytes()
                .ok_or_else(|| conversion_error::<Vec<u8>>(value))?
                .to_vec();
            let boxed: Box<dyn Any> = Box::new(bytes);
            return boxed
                .downcast::<Vec<T>>()
                .map(|b| *b)
                .map_err(|_| conversion_error::<Vec<T>>(value));
        }
        match value {
            Value::Array(items) => items.iter().map(T::from_value).collect(),
            _ => Err(conversion_error::<Vec<T>>(value)),
        }
    }
}

// =========================================================================
// DbString
// =========================================================================

/// A text parameter with explicit ansi/fixed-length/length settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbString {
    /// The text, `None` for database null
    pub value: Option<String>,
    /// Send as non-unicode text
    pub is_ansi: bool,
    /// Send as fixed-length text
    pub is_fixed_length: bool,
    /// Explicit length, `-1` picks the default size rule
    pub length: i32,
}

impl Default for DbString {
    fn default() -> Self {
        Self {
            value: None,
            is_ansi: false,
            is_fixed_length: false,
            length: -1,
        }
    }
}

impl DbString {
    /// A unicode, variable-length string using the default size rule
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            is_ansi: false,
            is_fixed_length: false,
            length: -1,
        }
    }

    /// Sends the text as non-unicode
    pub fn ansi(mut self) -> Self {
        self.is_ansi = true;
        self
    }

    /// Sends the text as fixed-length
    pub fn fixed_length(mut self) -> Self {
        self.is_fixed_length = true;
        self
    }

    /// Sets an explicit length
    pub fn with_length(mut self, length: i32) -> Self {
        self.length = length;
        self
    }

    fn db_type(&self) -> DbType {
        match (self.is_ansi, self.is_fixed_length) {
            (true, true) => DbType::AnsiStringFixedLength,
            (true, false) => DbType::AnsiString,
            (false, true) => DbType::StringFixedLength,
            (false, false) => DbType::String,
        }
    }

    fn size(&self, string_size: i32) -> i32 {
        if self.length != -1 {
            return self.length;
        }
        let text = self.value.as_deref().map_or(Value::Null, Value::from);
        text_size(&text, string_size).unwrap_or(string_size)
    }
}

impl CustomParameter for DbString {
    fn add_parameter(
        &self,
        command: &mut dyn Command,
        name: &str,
        string_size: i32,
    ) -> Result<()> {
        let value = self.value.as_deref().map_or(Value::Null, Value::from);
        let (db_type, size) = (self.db_type(), self.size(string_size));
        let params = command.parameters_mut();
        match params.get_mut(name) {
            Some(existing) => {
                existing.value = value;
                existing.db_type = Some(db_type);
                existing.size = Some(size);
            }
            None => params.add(
                DbParameter::new(name, value)
                    .with_db_type(db_type)
                    .with_size(size),
            ),
        }
        Ok(())
    }
}

impl SqlField for DbString {
    fn field_kind() -> FieldKind {
        FieldKind::CustomParameter
    }

    fn is_nullable() -> bool {
        true
    }

    fn to_value(&self) -> Value {
        self.value.as_deref().map_or(Value::Null, Value::from)
    }

    fn from_value(value: &Value) -> Result<Self> {
        Ok(Self {
            value: value.as_string(),
            ..Self::default()
        })
    }

    fn as_custom_parameter(&self) -> Option<&dyn CustomParameter> {
        Some(self)
    }
}

// =========================================================================
// Enums and opaque types
// =========================================================================

/// Integer types usable as an enum's underlying representation
#[doc(hidden)]
pub trait EnumRepr {
    const DB_TYPE: DbType;
}

macro_rules! impl_enum_repr {
    ($($t:ty => $db:ident),*) => {
        $(
            impl EnumRepr for $t {
                const DB_TYPE: DbType = DbType::$db;
            }
        )*
    };
}

impl_enum_repr!(
    i8 => SByte, i16 => Int16, i32 => Int32, i64 => Int64,
    u8 => Byte, u16 => UInt16, u32 => UInt32, u64 => UInt64
);

/// Resolves an enum discriminant from a wire value
///
/// Text matches a variant name case-insensitively, or parses as a number.
/// Floating point input is truncated to the underlying integer first.
#[doc(hidden)]
pub fn enum_discriminant(
    value: &Value,
    names: &[(&'static str, i64)],
    type_name: &'static str,
) -> Result<i64> {
    let candidate = match value {
        Value::Text(s) => match names.iter().find(|(n, _)| n.eq_ignore_ascii_case(s.trim())) {
            Some((_, d)) => return Ok(*d),
            None => value.as_int64(),
        },
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) => value.as_int64(),
        _ => None,
    };
    match candidate {
        Some(d) if names.iter().any(|(_, v)| *v == d) => Ok(d),
        _ => Err(Error::type_conversion(
            format!("{}({})", value.kind_name(), value),
            type_name,
        )),
    }
}

/// Declares an enum that binds and reads as its underlying integer
///
/// # Example
///
/// ```ignore
/// sql_enum! {
///     #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
///     pub enum Status: i32 {
///         #[default]
///         Active = 1,
///         Suspended = 2,
///     }
/// }
/// ```
#[macro_export]
macro_rules! sql_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $disc:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr($repr)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant = $disc,
            )+
        }

        impl $name {
            const SQL_VARIANTS: &'static [(&'static str, i64)] =
                &[$((stringify!($variant), $disc as i64)),+];
        }

        impl $crate::SqlField for $name {
            fn field_kind() -> $crate::FieldKind {
                $crate::FieldKind::Enum {
                    underlying: <$repr as $crate::mapper::field::EnumRepr>::DB_TYPE,
                }
            }

            fn to_value(&self) -> $crate::Value {
                let discriminant = match self {
                    $($name::$variant => $disc as i64,)+
                };
                $crate::Value::Integer(discriminant)
            }

            fn from_value(value: &$crate::Value) -> $crate::Result<Self> {
                let d = $crate::mapper::field::enum_discriminant(
                    value,
                    Self::SQL_VARIANTS,
                    ::std::any::type_name::<Self>(),
                )?;
                $(
                    if d == $disc as i64 {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::Error::internal("enum discriminant resolved to no variant"))
            }
        }

        $crate::impl_scalar_shape!($name);
    };
}

/// Declares a user type that maps only through a registered type handler
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, Default, PartialEq)]
/// pub struct Point { x: f64, y: f64 }
/// opaque_field!(Point);
///
/// mapper.add_type_handler::<Point, _>(PointHandler);
/// ```
#[macro_export]
macro_rules! opaque_field {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::SqlField for $ty {
                fn field_kind() -> $crate::FieldKind {
                    $crate::FieldKind::Opaque
                }

                fn to_value(&self) -> $crate::Value {
                    $crate::Value::Null
                }

                fn from_value(_value: &$crate::Value) -> $crate::Result<Self> {
                    Err($crate::Error::NotSupported(format!(
                        "{} requires a registered type handler",
                        ::std::any::type_name::<$ty>()
                    )))
                }
            }

            $crate::impl_scalar_shape!($ty);
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Connection, MemoryConnection};

    #[test]
    fn test_integer_conversion() {
        assert_eq!(i32::from_value(&Value::Integer(5)).unwrap(), 5);
        assert_eq!(u8::from_value(&Value::Float(7.9)).unwrap(), 7);
        assert!(u8::from_value(&Value::Integer(300)).is_err());
        assert!(i32::from_value(&Value::Null).is_err());
        assert_eq!(u64::MAX.to_value(), Value::Integer(-1));
        assert_eq!(u64::from_value(&Value::Integer(-1)).unwrap(), u64::MAX);
    }

    #[test]
    fn test_char_requires_single_character() {
        assert_eq!(char::from_value(&Value::text("A")).unwrap(), 'A');
        assert_eq!(
            char::from_value(&Value::text("AB")).unwrap_err(),
            Error::Format("AB".to_string())
        );
        assert_eq!(
            char::from_value(&Value::text("")).unwrap_err(),
            Error::Format(String::new())
        );
    }

    #[test]
    fn test_option_reports_inner_key() {
        assert_eq!(<Option<i32>>::type_key(), TypeKey::of::<i32>());
        assert!(<Option<i32>>::is_nullable());
        assert!(!i32::is_nullable());
        assert_eq!(<Option<i32>>::from_value(&Value::Null).unwrap(), None);
        assert_eq!(Some(3i32).to_value(), Value::Integer(3));
        assert!(None::<i32>.handler_value().is_none());
    }

    #[test]
    fn test_vec_kinds() {
        assert_eq!(<Vec<u8>>::field_kind(), FieldKind::Scalar);
        assert_eq!(<Vec<i32>>::field_kind(), FieldKind::Sequence);
        assert_eq!(vec![1u8, 2].to_value(), Value::binary(vec![1u8, 2]));
        assert_eq!(vec![1u8].to_list(), None);
        assert_eq!(
            vec![1i32, 2].to_list(),
            Some(vec![Value::Integer(1), Value::Integer(2)])
        );
        assert_eq!(
            <Vec<u8>>::from_value(&Value::binary(vec![9u8])).unwrap(),
            vec![9u8]
        );
    }

    #[test]
    fn test_enum_discriminant() {
        let names = [("Active", 1), ("Suspended", 2)];
        assert_eq!(enum_discriminant(&Value::text("suspended"), &names, "Status").unwrap(), 2);
        assert_eq!(enum_discriminant(&Value::text("1"), &names, "Status").unwrap(), 1);
        assert_eq!(enum_discriminant(&Value::Float(2.0), &names, "Status").unwrap(), 2);
        assert!(enum_discriminant(&Value::Integer(9), &names, "Status").is_err());
        assert!(enum_discriminant(&Value::text("Gone"), &names, "Status").is_err());
    }

    #[test]
    fn test_db_string_parameter() {
        let conn = MemoryConnection::returning(vec![]);
        let mut cmd = conn.create_command().unwrap();

        DbString::new("abc")
            .ansi()
            .with_length(10)
            .add_parameter(cmd.as_mut(), "code", 4000)
            .unwrap();
        let p = cmd.parameters().get("code").unwrap();
        assert_eq!(p.db_type, Some(DbType::AnsiString));
        assert_eq!(p.size, Some(10));

        DbString::new("x".repeat(4001))
            .add_parameter(cmd.as_mut(), "long", 4000)
            .unwrap();
        assert_eq!(cmd.parameters().get("long").unwrap().size, Some(-1));

        DbString::new("x".repeat(20))
            .add_parameter(cmd.as_mut(), "long", 10)
            .unwrap();
        assert_eq!(cmd.parameters().get("long").unwrap().size, Some(-1));

        DbString::default()
            .add_parameter(cmd.as_mut(), "code", 10)
            .unwrap();
        assert_eq!(cmd.parameters().len(), 2);
        assert_eq!(cmd.parameters().get("code").unwrap().value, Value::Null);
    }
}
