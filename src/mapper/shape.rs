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

//! Record shapes
//!
//! A [`Shape`] is the explicit member descriptor list of a structured type:
//! named members with typed accessors, an optional positional constructor
//! taking every member in declared order, and an optional default
//! constructor. Binders and deserializers are compiled from it.
//!
//! # Example
//!
//! ```ignore
//! #[derive(Debug, Default)]
//! struct User {
//!     id: i64,
//!     name: Option<String>,
//! }
//!
//! impl_record!(User { id as "Id", name as "Name" });
//! ```

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;

use crate::core::{Error, Result, TypeKey, Value};

use super::field::{CustomParameter, FieldKind, SqlField};
use super::type_map::AnyTypeHandler;

/// A structured shape with named members
pub trait Record: Sized + Send + Sync + 'static {
    /// The member descriptors of this type
    fn shape() -> Shape<Self>;
}

/// Typed access to one member of `T`
pub(crate) trait MemberAccess<T>: Send + Sync {
    fn field_kind(&self) -> FieldKind;
    fn type_key(&self) -> TypeKey;
    fn type_name(&self) -> &'static str;
    fn is_nullable(&self) -> bool;
    fn to_value(&self, target: &T) -> Value;
    fn to_list(&self, target: &T) -> Option<Vec<Value>>;
    fn handler_value<'a>(&self, target: &'a T) -> Option<&'a dyn Any>;
    fn custom_parameter<'a>(&self, target: &'a T) -> Option<&'a dyn CustomParameter>;
    fn assign(&self, target: &mut T, value: &Value, handler: Option<&dyn AnyTypeHandler>)
        -> Result<()>;
    fn read_arg(
        &self,
        value: &Value,
        handler: Option<&dyn AnyTypeHandler>,
    ) -> Result<Box<dyn Any + Send>>;
    fn default_arg(&self) -> Box<dyn Any + Send>;
}

struct FieldAccess<T, F> {
    get: fn(&T) -> &F,
    get_mut: fn(&mut T) -> &mut F,
}

fn read_field<F: SqlField>(value: &Value, handler: Option<&dyn AnyTypeHandler>) -> Result<F> {
    match handler {
        Some(handler) => F::from_handler(handler.parse(value)?),
        None => F::from_value(value),
    }
}

impl<T, F> MemberAccess<T> for FieldAccess<T, F>
where
    T: 'static,
    F: SqlField,
{
    fn field_kind(&self) -> FieldKind {
        F::field_kind()
    }

    fn type_key(&self) -> TypeKey {
        F::type_key()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<F>()
    }

    fn is_nullable(&self) -> bool {
        F::is_nullable()
    }

    fn to_value(&self, target: &T) -> Value {
        (self.get)(target).to_value()
    }

    fn to_list(&self, target: &T) -> Option<Vec<Value>> {
        (self.get)(target).to_list()
    }

    fn handler_value<'a>(&self, target: &'a T) -> Option<&'a dyn Any> {
        (self.get)(target).handler_value()
    }

    fn custom_parameter<'a>(&self, target: &'a T) -> Option<&'a dyn CustomParameter> {
        (self.get)(target).as_custom_parameter()
    }

    fn assign(
        &self,
        target: &mut T,
        value: &Value,
        handler: Option<&dyn AnyTypeHandler>,
    ) -> Result<()> {
        *(self.get_mut)(target) = read_field::<F>(value, handler)?;
        Ok(())
    }

    fn read_arg(
        &self,
        value: &Value,
        handler: Option<&dyn AnyTypeHandler>,
    ) -> Result<Box<dyn Any + Send>> {
        Ok(Box::new(read_field::<F>(value, handler)?))
    }

    fn default_arg(&self) -> Box<dyn Any + Send> {
        Box::new(F::default())
    }
}

/// One named member of a record
pub struct Member<T> {
    name: &'static str,
    access: Box<dyn MemberAccess<T>>,
}

impl<T> Member<T> {
    /// The member (and column/parameter) name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Binding category of the member type
    pub fn field_kind(&self) -> FieldKind {
        self.access.field_kind()
    }

    /// Coercion-table key of the member type
    pub fn type_key(&self) -> TypeKey {
        self.access.type_key()
    }

    /// Full name of the member type
    pub fn type_name(&self) -> &'static str {
        self.access.type_name()
    }

    /// Whether the member can hold database null
    pub fn is_nullable(&self) -> bool {
        self.access.is_nullable()
    }

    pub(crate) fn access(&self) -> &dyn MemberAccess<T> {
        self.access.as_ref()
    }
}

impl<T> fmt::Debug for Member<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.name)
            .field("type", &self.type_name())
            .finish()
    }
}

/// Arguments handed to a positional constructor, one per member
pub struct CtorArgs {
    values: std::vec::IntoIter<Box<dyn Any + Send>>,
}

impl CtorArgs {
    pub(crate) fn new(values: Vec<Box<dyn Any + Send>>) -> Self {
        Self {
            values: values.into_iter(),
        }
    }

    /// Takes the next argument
    pub fn next<F: Any>(&mut self) -> Result<F> {
        let value = self
            .values
            .next()
            .ok_or_else(|| Error::internal("constructor requested more arguments than members"))?;
        value
            .downcast::<F>()
            .map(|b| *b)
            .map_err(|_| Error::type_conversion("constructor argument", std::any::type_name::<F>()))
    }
}

/// A positional constructor over every member in declared order
pub type Constructor<T> = fn(&mut CtorArgs) -> Result<T>;

/// Member descriptors for a record type
pub struct Shape<T> {
    members: Vec<Member<T>>,
    constructor: Option<Constructor<T>>,
    default_ctor: Option<fn() -> T>,
}

impl<T: 'static> Default for Shape<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Shape<T> {
    /// Creates an empty shape
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            constructor: None,
            default_ctor: None,
        }
    }

    /// Adds a member with its accessors
    pub fn member<F: SqlField>(
        mut self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        self.members.push(Member {
            name,
            access: Box::new(FieldAccess { get, get_mut }),
        });
        self
    }

    /// Sets the default constructor used for member-by-member binding
    pub fn with_default(mut self, ctor: fn() -> T) -> Self {
        self.default_ctor = Some(ctor);
        self
    }

    /// Sets the positional constructor; its parameters are the members in
    /// declared order
    pub fn with_constructor(mut self, ctor: Constructor<T>) -> Self {
        self.constructor = Some(ctor);
        self
    }

    /// Members in declared order
    pub fn members(&self) -> &[Member<T>] {
        &self.members
    }

    /// The positional constructor, if any
    pub fn constructor(&self) -> Option<Constructor<T>> {
        self.constructor
    }

    /// The default constructor, if any
    pub fn default_constructor(&self) -> Option<fn() -> T> {
        self.default_ctor
    }

    /// Index of the member named `name`, exact match first, then ignoring case
    pub fn find_member(&self, name: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.name == name)
            .or_else(|| {
                self.members
                    .iter()
                    .position(|m| m.name.eq_ignore_ascii_case(name))
            })
    }

    /// Member indices in parameter binding order
    ///
    /// Declared order when a positional constructor exists, alphabetical
    /// otherwise.
    pub fn binding_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.members.len()).collect();
        if self.constructor.is_none() {
            order.sort_by(|&a, &b| compare_names(self.members[a].name, self.members[b].name));
        }
        order
    }
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_ascii_lowercase()
        .cmp(&b.to_ascii_lowercase())
        .then_with(|| a.cmp(b))
}

/// Resolves the column name of an `impl_record!` member
#[doc(hidden)]
#[macro_export]
macro_rules! __record_column {
    ($field:ident) => {
        stringify!($field)
    };
    ($field:ident, $column:literal) => {
        $column
    };
}

/// Declares a record shape and wires it into parameter binding and row
/// materialization
///
/// Without `via`, the type must implement `Default` and rows bind member by
/// member. With `via`, rows bind through the given constructor, which takes
/// every listed member in order.
///
/// # Example
///
/// ```ignore
/// impl_record!(User { id as "Id", name as "Name" });
/// impl_record!(Point { x, y } via Point::new);
/// ```
#[macro_export]
macro_rules! impl_record {
    ($ty:ident { $($field:ident $(as $column:literal)?),+ $(,)? }) => {
        impl $crate::Record for $ty {
            fn shape() -> $crate::Shape<Self> {
                $crate::Shape::new()
                    $(
                        .member(
                            $crate::__record_column!($field $(, $column)?),
                            |r: &Self| &r.$field,
                            |r: &mut Self| &mut r.$field,
                        )
                    )+
                    .with_default(<Self as ::std::default::Default>::default)
            }
        }

        $crate::impl_record!(@wire $ty);
    };

    ($ty:ident { $($field:ident $(as $column:literal)?),+ $(,)? } via $ctor:path) => {
        impl $crate::Record for $ty {
            fn shape() -> $crate::Shape<Self> {
                $crate::Shape::new()
                    $(
                        .member(
                            $crate::__record_column!($field $(, $column)?),
                            |r: &Self| &r.$field,
                            |r: &mut Self| &mut r.$field,
                        )
                    )+
                    .with_constructor(|args| {
                        Ok($ctor($({
                            let _ = stringify!($field);
                            args.next()?
                        }),+))
                    })
            }
        }

        $crate::impl_record!(@wire $ty);
    };

    (@wire $ty:ident) => {
        impl $crate::ResultShape for $ty {
            fn compile_deserializer(
                registry: &$crate::TypeRegistry,
                reader: &dyn $crate::DataReader,
                start: usize,
                length: ::std::option::Option<usize>,
                return_null_if_first_missing: bool,
            ) -> $crate::Result<$crate::RowDeserializer<Self>> {
                $crate::mapper::deserializer::record_deserializer::<Self>(
                    registry,
                    reader,
                    start,
                    length,
                    return_null_if_first_missing,
                )
            }
        }

        impl $crate::SqlParams for $ty {
            fn param_key() -> ::std::option::Option<$crate::TypeKey> {
                ::std::option::Option::Some($crate::TypeKey::of::<Self>())
            }

            fn compile_binder(
                registry: &$crate::TypeRegistry,
                options: &$crate::BinderOptions,
            ) -> $crate::Result<$crate::ParamBinder> {
                $crate::mapper::binder::compile_record_binder::<Self>(registry, options)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Product {
        sku: String,
        price: f64,
        stock: Option<i32>,
    }

    fn product_shape() -> Shape<Product> {
        Shape::new()
            .member("Sku", |p: &Product| &p.sku, |p: &mut Product| &mut p.sku)
            .member("Price", |p: &Product| &p.price, |p: &mut Product| &mut p.price)
            .member("Stock", |p: &Product| &p.stock, |p: &mut Product| &mut p.stock)
            .with_default(Product::default)
    }

    #[derive(Debug, PartialEq)]
    struct Pair {
        b: i32,
        a: i32,
    }

    fn pair_shape() -> Shape<Pair> {
        Shape::new()
            .member("b", |p: &Pair| &p.b, |p: &mut Pair| &mut p.b)
            .member("a", |p: &Pair| &p.a, |p: &mut Pair| &mut p.a)
            .with_constructor(|args| {
                Ok(Pair {
                    b: args.next()?,
                    a: args.next()?,
                })
            })
    }

    #[test]
    fn test_find_member() {
        let shape = product_shape();
        assert_eq!(shape.find_member("Sku"), Some(0));
        assert_eq!(shape.find_member("price"), Some(1));
        assert_eq!(shape.find_member("missing"), None);
    }

    #[test]
    fn test_binding_order() {
        let shape = product_shape();
        assert_eq!(shape.binding_order(), vec![1, 0, 2]);
        // A positional constructor keeps declared order
        assert_eq!(pair_shape().binding_order(), vec![0, 1]);
    }

    #[test]
    fn test_member_access() {
        let shape = product_shape();
        let mut product = Product::default();
        let stock = &shape.members()[2];
        assert!(stock.is_nullable());
        assert_eq!(stock.type_key(), TypeKey::of::<i32>());

        stock.access().assign(&mut product, &Value::Integer(4), None).unwrap();
        assert_eq!(product.stock, Some(4));
        assert_eq!(stock.access().to_value(&product), Value::Integer(4));

        let price = &shape.members()[1];
        assert!(price
            .access()
            .assign(&mut product, &Value::text("abc"), None)
            .is_err());
    }

    #[test]
    fn test_constructor_args() {
        let shape = pair_shape();
        let ctor = shape.constructor().unwrap();
        let args = shape
            .members()
            .iter()
            .zip([Value::Integer(2), Value::Integer(1)])
            .map(|(m, v)| m.access().read_arg(&v, None).unwrap())
            .collect();
        let pair = ctor(&mut CtorArgs::new(args)).unwrap();
        assert_eq!(pair, Pair { b: 2, a: 1 });

        let mut short = CtorArgs::new(vec![]);
        assert!(short.next::<i32>().is_err());
    }
}
