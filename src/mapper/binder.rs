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

//! Parameter binder compiler
//!
//! A binder is compiled once per plan from a record [`Shape`] and the SQL
//! text it will run against. Compilation resolves every member through the
//! coercion table, drops members the SQL never references and precompiles
//! the list-expansion patterns, so the per-call work is a straight walk over
//! the retained members.
//!
//! Per call the binder, in order:
//!
//! 1. binds each retained member (alphabetical, or constructor order)
//! 2. expands collection members into `name1..nameN` and rewrites the SQL
//! 3. delegates handled and custom members to their handler or parameter
//! 4. replaces `{=name}` literal tokens in the command text

use std::any::Any;
use std::sync::Arc;

use regex::Regex;

use crate::core::{CommandKind, DbType, Error, Result, TypeKey, Value};
use crate::driver::{Command, DbParameter};

use super::config::DEFAULT_STRING_SIZE;
use super::identity::PlanKey;
use super::literal::{
    expand_list, list_pattern, literal_tokens, looks_positional, placeholder_pattern,
    replace_literals, LiteralToken,
};
use super::plan_cache::{CompiledPlan, PlanCache};
use super::shape::{Record, Shape};
use super::type_map::{Lookup, TypeRegistry};

/// A compiled parameter binder
///
/// Receives the command, the parameter bag (downcast by the binder) and the
/// per-call binding context.
pub type ParamBinder =
    Arc<dyn Fn(&mut dyn Command, &dyn Any, &BindContext<'_>) -> Result<()> + Send + Sync>;

/// Compile-time inputs of a binder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinderOptions {
    /// SQL text the binder is compiled against
    pub sql: String,
    /// Command kind
    pub kind: CommandKind,
    /// Whether the connection accepts array-valued parameters
    pub supports_arrays: bool,
    /// Drop members whose placeholder is absent from the SQL
    pub remove_unused: bool,
    /// Reuse parameters already present on the command
    pub check_for_duplicates: bool,
    /// Size assigned to short text parameters
    pub default_string_size: i32,
}

impl BinderOptions {
    /// Options for `sql` with filtering enabled and no duplicate checks
    pub fn new(sql: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            sql: sql.into(),
            kind,
            supports_arrays: false,
            remove_unused: true,
            check_for_duplicates: false,
            default_string_size: DEFAULT_STRING_SIZE,
        }
    }

    /// Options used when merging a template into another bag
    pub fn for_template(&self) -> Self {
        Self {
            remove_unused: false,
            check_for_duplicates: true,
            ..self.clone()
        }
    }

    fn filters_members(&self) -> bool {
        self.remove_unused && self.kind == CommandKind::Text && !looks_positional(&self.sql)
    }
}

/// Per-call state handed to a binder
pub struct BindContext<'a> {
    /// Coercion table and handlers
    pub registry: &'a TypeRegistry,
    /// Plan cache, used to cache template binders
    pub cache: &'a PlanCache,
    /// Key of the plan being executed
    pub key: &'a PlanKey,
    /// Options the outer binder was compiled with
    pub options: &'a BinderOptions,
}

impl BindContext<'_> {
    /// Binds `template` through a cached binder compiled for its type with
    /// duplicate detection enabled
    pub fn bind_template(
        &self,
        command: &mut dyn Command,
        template: &dyn Any,
        template_key: TypeKey,
        compile: fn(&TypeRegistry, &BinderOptions) -> Result<ParamBinder>,
    ) -> Result<()> {
        let key = self.key.for_parameter_template(template_key);
        let options = self.options.for_template();
        let plan = self.cache.get_or_create(&key, || {
            tracing::debug!(
                template = template_key.name(),
                "compiling parameter template binder"
            );
            Ok(CompiledPlan::new(Some(compile(self.registry, &options)?)))
        })?;
        let binder = plan
            .binder()
            .ok_or_else(|| Error::internal("template plan has no binder"))?;
        let ctx = BindContext {
            registry: self.registry,
            cache: self.cache,
            key: &key,
            options: &options,
        };
        binder(command, template, &ctx)
    }
}

/// Adds `param`, or overwrites a same-named parameter when `reuse` is set
pub(crate) fn put_parameter(command: &mut dyn Command, param: DbParameter, reuse: bool) {
    let params = command.parameters_mut();
    if reuse {
        if let Some(existing) = params.get_mut(&param.name) {
            *existing = param;
            return;
        }
    }
    params.add(param);
}

/// Size rule for text values: the default size, or unbounded when longer
pub(crate) fn text_size(value: &Value, default_size: i32) -> Option<i32> {
    let text = value.as_str()?;
    if text.chars().count() > default_size.max(0) as usize {
        Some(-1)
    } else {
        Some(default_size)
    }
}

/// Binds a collection member
///
/// With `expansion` set, each element becomes `name1..nameN` and every
/// list placeholder in the command text is rewritten; an empty list binds
/// one null parameter named `name`. Without it, the whole list binds as a
/// single array-valued parameter.
pub(crate) fn pack_list_parameters(
    command: &mut dyn Command,
    name: &str,
    items: Option<Vec<Value>>,
    expansion: Option<&Regex>,
    string_size: i32,
) -> Result<()> {
    let Some(pattern) = expansion else {
        let value = items.map_or(Value::Null, Value::array);
        command.parameters_mut().add(DbParameter::new(name, value));
        return Ok(());
    };

    let items = items.unwrap_or_default();
    let count = items.len();
    for (i, item) in items.into_iter().enumerate() {
        let mut param = DbParameter::new(format!("{}{}", name, i + 1), Value::Null);
        param.size = text_size(&item, string_size);
        param.value = item;
        command.parameters_mut().add(param);
    }

    let sql = expand_list(command.text(), pattern, count);
    command.set_text(&sql);
    if count == 0 {
        command
            .parameters_mut()
            .add(DbParameter::new(name, Value::Null));
    }
    Ok(())
}

struct MemberBinding {
    index: usize,
    lookup: Lookup,
    list_pattern: Option<Regex>,
}

struct LiteralBinding {
    token: LiteralToken,
    member: Option<usize>,
}

/// Compiles a binder for the record type `T`
pub fn compile_record_binder<T: Record>(
    registry: &TypeRegistry,
    options: &BinderOptions,
) -> Result<ParamBinder> {
    let shape = T::shape();
    let filter = options.filters_members();

    let mut bindings = Vec::with_capacity(shape.members().len());
    for index in shape.binding_order() {
        let member = &shape.members()[index];
        if filter && !placeholder_pattern(member.name())?.is_match(&options.sql) {
            continue;
        }
        let lookup = registry.lookup(member.name(), member.type_key(), member.field_kind())?;
        let list_pattern = match lookup {
            Lookup::MultiValue if !options.supports_arrays => Some(list_pattern(member.name())?),
            _ => None,
        };
        bindings.push(MemberBinding {
            index,
            lookup,
            list_pattern,
        });
    }

    let literals: Vec<LiteralBinding> = literal_tokens(&options.sql)
        .into_iter()
        .map(|token| LiteralBinding {
            member: shape.find_member(token.member()),
            token,
        })
        .collect();

    tracing::debug!(
        params = std::any::type_name::<T>(),
        bound = bindings.len(),
        literals = literals.len(),
        "compiled parameter binder"
    );

    let reuse = options.check_for_duplicates;
    let string_size = options.default_string_size;
    let binder = move |command: &mut dyn Command,
                       params: &dyn Any,
                       _ctx: &BindContext<'_>|
          -> Result<()> {
        let target = params.downcast_ref::<T>().ok_or_else(|| {
            Error::internal(format!(
                "binder compiled for {} received another type",
                std::any::type_name::<T>()
            ))
        })?;
        for binding in &bindings {
            bind_member(command, &shape, target, binding, reuse, string_size)?;
        }
        if !literals.is_empty() {
            apply_literals(command, &shape, target, &literals)?;
        }
        Ok(())
    };
    Ok(Arc::new(binder))
}

fn bind_member<T: 'static>(
    command: &mut dyn Command,
    shape: &Shape<T>,
    target: &T,
    binding: &MemberBinding,
    reuse: bool,
    string_size: i32,
) -> Result<()> {
    let member = &shape.members()[binding.index];
    let access = member.access();
    let name = member.name();

    match &binding.lookup {
        Lookup::Custom => match access.custom_parameter(target) {
            Some(custom) => custom.add_parameter(command, name, string_size),
            None => {
                put_parameter(command, DbParameter::new(name, Value::Null), reuse);
                Ok(())
            }
        },
        Lookup::MultiValue => pack_list_parameters(
            command,
            name,
            access.to_list(target),
            binding.list_pattern.as_ref(),
            string_size,
        ),
        Lookup::Handler(handler) => {
            let mut param = DbParameter::new(name, Value::Null);
            if let Some(value) = access.handler_value(target) {
                handler.set_value(&mut param, value)?;
            }
            put_parameter(command, param, reuse);
            Ok(())
        }
        Lookup::Wire(db_type) => {
            let value = access.to_value(target);
            let mut param = DbParameter::new(name, Value::Null);
            if *db_type != DbType::Time {
                param.db_type = Some(*db_type);
            }
            if member.type_key() == TypeKey::of::<String>() {
                param.size = text_size(&value, string_size);
            }
            param.value = value;
            put_parameter(command, param, reuse);
            Ok(())
        }
    }
}

fn apply_literals<T: 'static>(
    command: &mut dyn Command,
    shape: &Shape<T>,
    target: &T,
    literals: &[LiteralBinding],
) -> Result<()> {
    let tokens: Vec<LiteralToken> = literals
        .iter()
        .filter(|l| l.member.is_some())
        .map(|l| l.token.clone())
        .collect();
    if tokens.is_empty() {
        return Ok(());
    }
    let sql = replace_literals(command.text(), &tokens, |member| {
        shape
            .find_member(member)
            .map(|i| shape.members()[i].access().to_value(target))
    })?;
    command.set_text(&sql);
    Ok(())
}
