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

//! Parameter bags
//!
//! Anything implementing [`SqlParams`] can be passed as the parameters of a
//! call. Records declared with `impl_record!` bind through a compiled
//! per-shape binder; [`DynamicParameters`] and `HashMap<String, Value>` bind
//! the values they carry at runtime.
//!
//! # Example
//!
//! ```ignore
//! let mut params = DynamicParameters::new();
//! params.add("@id", 7);
//! params.add_with("total", Value::Null, Some(DbType::Decimal), ParameterDirection::Output, None);
//! mapper.execute(&mut conn, "exec sp_total @id, @total out", &params)?;
//! let total: Option<f64> = params.get("total")?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::core::{DbType, Error, ParameterDirection, Result, TypeKey, Value};
use crate::driver::Command;
use crate::mapper::binder::{
    pack_list_parameters, text_size, BindContext, BinderOptions, ParamBinder,
};
use crate::mapper::field::{CustomParameter, SqlField};
use crate::mapper::literal::{list_pattern, literal_tokens, replace_literals, LiteralToken};
use crate::mapper::type_map::TypeRegistry;

/// A parameter bag
pub trait SqlParams: Send + Sync + 'static {
    /// Plan-key identity of the bag, `None` when it binds nothing
    fn param_key() -> Option<TypeKey>;

    /// Compiles the binder for this bag type
    fn compile_binder(registry: &TypeRegistry, options: &BinderOptions) -> Result<ParamBinder>;

    /// Called with the command after it has executed
    fn on_completed(&self, _command: &dyn Command) {}
}

impl SqlParams for () {
    fn param_key() -> Option<TypeKey> {
        None
    }

    fn compile_binder(_registry: &TypeRegistry, _options: &BinderOptions) -> Result<ParamBinder> {
        Ok(Arc::new(|_: &mut dyn Command, _: &dyn Any, _: &BindContext<'_>| Ok(())))
    }
}

fn clean(name: &str) -> &str {
    match name.as_bytes().first() {
        Some(b'@' | b':' | b'?') => &name[1..],
        _ => name,
    }
}

#[derive(Clone)]
enum ParamValue {
    Value(Value),
    Custom(Arc<dyn CustomParameter>),
}

#[derive(Clone)]
struct ParamInfo {
    name: String,
    value: ParamValue,
    db_type: Option<DbType>,
    direction: ParameterDirection,
    size: Option<i32>,
}

type TemplateCompiler = fn(&TypeRegistry, &BinderOptions) -> Result<ParamBinder>;

#[derive(Clone)]
struct Template {
    bag: Arc<dyn Any + Send + Sync>,
    key: TypeKey,
    compile: TemplateCompiler,
}

/// A parameter bag assembled at runtime
///
/// Names lose a leading `@`, `:` or `?`. Adding a name twice replaces the
/// earlier value. After execution every parameter of the command can be
/// read back with [`get`](Self::get), which is how output and return
/// values are retrieved.
#[derive(Default)]
pub struct DynamicParameters {
    params: Vec<ParamInfo>,
    templates: Vec<Template>,
    attached: Mutex<FxHashMap<String, Value>>,
}

impl DynamicParameters {
    /// Creates an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bag binding every member of `template`
    pub fn from_template<T: SqlParams>(template: T) -> Self {
        let mut params = Self::new();
        params.add_template(template);
        params
    }

    /// Adds an input parameter
    pub fn add(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.add_with(name, value, None, ParameterDirection::Input, None)
    }

    /// Adds a parameter with an explicit wire kind, direction and size
    pub fn add_with(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        db_type: Option<DbType>,
        direction: ParameterDirection,
        size: Option<i32>,
    ) -> &mut Self {
        self.put(ParamInfo {
            name: clean(name).to_string(),
            value: ParamValue::Value(value.into()),
            db_type,
            direction,
            size,
        })
    }

    /// Adds a value that binds itself, such as a [`DbString`](crate::DbString)
    pub fn add_custom<C: CustomParameter + 'static>(&mut self, name: &str, value: C) -> &mut Self {
        self.put(ParamInfo {
            name: clean(name).to_string(),
            value: ParamValue::Custom(Arc::new(value)),
            db_type: None,
            direction: ParameterDirection::Input,
            size: None,
        })
    }

    /// Adds every member of a record bag
    ///
    /// The record binds through its own compiled binder, reusing command
    /// parameters that are already present.
    pub fn add_template<T: SqlParams>(&mut self, template: T) -> &mut Self {
        self.templates.push(Template {
            bag: Arc::new(template),
            key: TypeKey::of::<T>(),
            compile: T::compile_binder,
        });
        self
    }

    /// Adds every entry of `values`
    pub fn add_map(&mut self, values: &HashMap<String, Value>) -> &mut Self {
        let mut names: Vec<&String> = values.keys().collect();
        names.sort();
        for name in names {
            self.add(name, values[name].clone());
        }
        self
    }

    /// Merges the parameters and templates of `other`
    pub fn merge(&mut self, other: DynamicParameters) -> &mut Self {
        for param in other.params {
            self.put(param);
        }
        self.templates.extend(other.templates);
        self
    }

    /// Names of the parameters added directly, in insertion order
    pub fn parameter_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    /// The value last seen for `name`
    ///
    /// After execution this is the command's parameter value (including
    /// outputs); before it, the value that was added.
    pub fn value(&self, name: &str) -> Option<Value> {
        let name = clean(name);
        if let Some(value) = self.attached.lock().get(name) {
            return Some(value.clone());
        }
        self.lookup(name)
    }

    /// Reads back a parameter value as `T`
    pub fn get<T: SqlField>(&self, name: &str) -> Result<T> {
        let value = self
            .value(name)
            .ok_or_else(|| Error::ParameterNotFound(clean(name).to_string()))?;
        if value.is_null() && !T::is_nullable() {
            return Err(Error::type_conversion(
                "NULL",
                format!("non-nullable {}", std::any::type_name::<T>()),
            ));
        }
        T::from_value(&value)
    }

    /// Literal-token lookup: the added value of `member`
    pub fn lookup(&self, member: &str) -> Option<Value> {
        self.params
            .iter()
            .find(|p| p.name == member)
            .and_then(|p| match &p.value {
                ParamValue::Value(v) => Some(v.clone()),
                ParamValue::Custom(_) => None,
            })
    }

    fn put(&mut self, param: ParamInfo) -> &mut Self {
        match self.params.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => *existing = param,
            None => self.params.push(param),
        }
        self
    }

    /// Writes the bag onto `command`: templates first, then every added
    /// parameter, then literal tokens
    fn add_parameters(
        &self,
        command: &mut dyn Command,
        ctx: &BindContext<'_>,
        tokens: &[LiteralToken],
    ) -> Result<()> {
        for template in &self.templates {
            ctx.bind_template(command, template.bag.as_ref(), template.key, template.compile)?;
        }

        let string_size = ctx.options.default_string_size;
        for param in &self.params {
            let value = match &param.value {
                ParamValue::Custom(custom) => {
                    custom.add_parameter(command, &param.name, string_size)?;
                    continue;
                }
                ParamValue::Value(value) => value,
            };

            if let (Value::Array(items), None) = (value, param.db_type) {
                let expansion = if ctx.options.supports_arrays {
                    None
                } else {
                    Some(list_pattern(&param.name)?)
                };
                pack_list_parameters(
                    command,
                    &param.name,
                    Some(items.to_vec()),
                    expansion.as_ref(),
                    string_size,
                )?;
                continue;
            }

            let target = command.parameters_mut().find_or_add(&param.name);
            target.direction = param.direction;
            target.value = value.clone();
            let inferred = (!value.is_null()).then(|| value.db_type());
            if let Some(db_type) = param.db_type.or(inferred) {
                target.db_type = Some(db_type);
            }
            if let Some(size) = text_size(value, string_size) {
                target.size = Some(size);
            }
            if let Some(size) = param.size {
                target.size = Some(size);
            }
        }

        if !tokens.is_empty() {
            let sql = replace_literals(command.text(), tokens, |member| self.lookup(member))?;
            command.set_text(&sql);
        }
        Ok(())
    }
}

impl Clone for DynamicParameters {
    fn clone(&self) -> Self {
        Self {
            params: self.params.clone(),
            templates: self.templates.clone(),
            attached: Mutex::new(self.attached.lock().clone()),
        }
    }
}

impl fmt::Debug for DynamicParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicParameters")
            .field("params", &self.parameter_names())
            .field("templates", &self.templates.len())
            .finish()
    }
}

type DynamicBind = fn(&dyn Any, &mut dyn Command, &BindContext<'_>, &[LiteralToken]) -> Result<()>;

fn dynamic_binder(options: &BinderOptions, bind: DynamicBind) -> ParamBinder {
    let tokens = literal_tokens(&options.sql);
    Arc::new(
        move |command: &mut dyn Command, bag: &dyn Any, ctx: &BindContext<'_>| -> Result<()> {
            bind(bag, command, ctx, &tokens)
        },
    )
}

impl SqlParams for DynamicParameters {
    fn param_key() -> Option<TypeKey> {
        Some(TypeKey::of::<Self>())
    }

    fn compile_binder(_registry: &TypeRegistry, options: &BinderOptions) -> Result<ParamBinder> {
        Ok(dynamic_binder(options, |bag, command, ctx, tokens| {
            bag.downcast_ref::<DynamicParameters>()
                .ok_or_else(|| Error::internal("parameter bag is not DynamicParameters"))?
                .add_parameters(command, ctx, tokens)
        }))
    }

    fn on_completed(&self, command: &dyn Command) {
        let mut attached = self.attached.lock();
        for param in command.parameters() {
            attached.insert(param.name.clone(), param.value.clone());
        }
    }
}

impl SqlParams for HashMap<String, Value> {
    fn param_key() -> Option<TypeKey> {
        Some(TypeKey::of::<Self>())
    }

    fn compile_binder(_registry: &TypeRegistry, options: &BinderOptions) -> Result<ParamBinder> {
        Ok(dynamic_binder(options, |bag, command, ctx, tokens| {
            let values = bag
                .downcast_ref::<HashMap<String, Value>>()
                .ok_or_else(|| Error::internal("parameter bag is not a value map"))?;
            let mut params = DynamicParameters::new();
            params.add_map(values);
            params.add_parameters(command, ctx, tokens)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CommandKind;
    use crate::driver::{Connection, MemoryConnection};
    use crate::mapper::config::MapperConfig;
    use crate::mapper::identity::PlanKey;
    use crate::mapper::plan_cache::PlanCache;

    fn bind<P: SqlParams>(sql: &str, params: &P) -> Box<dyn Command> {
        let registry = TypeRegistry::new();
        let cache = PlanCache::new(&MapperConfig::default());
        let key = PlanKey::new(sql, CommandKind::Text, "memory://", None, P::param_key());
        let options = BinderOptions::new(sql, CommandKind::Text);
        let binder = P::compile_binder(&registry, &options).unwrap();

        let conn = MemoryConnection::returning(vec![]);
        let mut command = conn.create_command().unwrap();
        command.set_text(sql);
        let ctx = BindContext {
            registry: &registry,
            cache: &cache,
            key: &key,
            options: &options,
        };
        binder(command.as_mut(), params, &ctx).unwrap();
        command
    }

    #[test]
    fn test_names_are_cleaned_and_replaced() {
        let mut params = DynamicParameters::new();
        params.add("@id", 1).add(":name", "ann").add("?id", 2);
        assert_eq!(params.parameter_names(), vec!["id", "name"]);
        assert_eq!(params.value("@id"), Some(Value::Integer(2)));
    }

    #[test]
    fn test_binds_values_with_inferred_types() {
        let mut params = DynamicParameters::new();
        params.add("id", 1).add("name", "ann").add("note", Value::Null);
        let cmd = bind("select @id, @name, @note", &params);

        let id = cmd.parameters().get("id").unwrap();
        assert_eq!(id.db_type, Some(DbType::Int64));
        let name = cmd.parameters().get("name").unwrap();
        assert_eq!(name.db_type, Some(DbType::String));
        assert_eq!(name.size, Some(4000));
        let note = cmd.parameters().get("note").unwrap();
        assert_eq!(note.db_type, None);
        assert_eq!(note.value, Value::Null);
    }

    #[test]
    fn test_explicit_type_direction_and_size() {
        let mut params = DynamicParameters::new();
        params.add_with(
            "code",
            "AB",
            Some(DbType::AnsiStringFixedLength),
            ParameterDirection::InputOutput,
            Some(2),
        );
        let cmd = bind("exec sp @code", &params);
        let p = cmd.parameters().get("code").unwrap();
        assert_eq!(p.db_type, Some(DbType::AnsiStringFixedLength));
        assert_eq!(p.direction, ParameterDirection::InputOutput);
        assert_eq!(p.size, Some(2));
    }

    #[test]
    fn test_array_values_expand() {
        let mut params = DynamicParameters::new();
        params.add("ids", Value::array(vec![Value::Integer(1), Value::Integer(2)]));
        let cmd = bind("select * from t where id in @ids", &params);
        assert_eq!(cmd.text(), "select * from t where id in (@ids1,@ids2)");
        assert_eq!(cmd.parameters().names(), vec!["ids1", "ids2"]);
    }

    #[test]
    fn test_literals_resolve_from_added_values() {
        let mut params = DynamicParameters::new();
        params.add("top", 5);
        let cmd = bind("select top {=top} * from t where x = {=other}", &params);
        assert_eq!(cmd.text(), "select top 5 * from t where x = {=other}");
    }

    #[test]
    fn test_map_binds_in_name_order() {
        let mut values = HashMap::new();
        values.insert("b".to_string(), Value::Integer(2));
        values.insert("a".to_string(), Value::Integer(1));
        let cmd = bind("select @a, @b", &values);
        assert_eq!(cmd.parameters().names(), vec!["a", "b"]);
    }

    #[test]
    fn test_get_reads_attached_values() {
        let mut params = DynamicParameters::new();
        params.add_with("total", Value::Null, Some(DbType::Int32), ParameterDirection::Output, None);
        let mut cmd = bind("exec sp @total", &params);
        cmd.parameters_mut().get_mut("total").unwrap().value = Value::Integer(42);
        params.on_completed(cmd.as_ref());

        assert_eq!(params.get::<i32>("@total").unwrap(), 42);
        assert!(matches!(
            params.get::<i32>("missing"),
            Err(Error::ParameterNotFound(ref n)) if n == "missing"
        ));
    }

    #[test]
    fn test_null_into_non_nullable_fails() {
        let mut params = DynamicParameters::new();
        params.add("x", Value::Null);
        assert!(matches!(params.get::<i32>("x"), Err(Error::TypeConversion { .. })));
        assert_eq!(params.get::<Option<i32>>("x").unwrap(), None);
    }
}
