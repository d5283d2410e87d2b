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

//! SQL text rewriting
//!
//! - Literal tokens (`{=name}`) replaced by the invariant text of a value
//! - Placeholder detection used to drop members the SQL never references
//! - In-list expansion of collection parameters

use std::sync::LazyLock;

use regex::{Captures, Regex};
use rustc_hash::FxHashSet;

use crate::core::{Error, Result, Value};

static LITERAL_TOKENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{=([a-zA-Z0-9_]+)\}").expect("literal token pattern is valid"));

/// Replacement used for an empty sequence rendered as a literal
const EMPTY_LITERAL_LIST: &str = "(select null where 1=0)";

/// A `{=name}` placeholder found in SQL text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralToken {
    token: String,
    member: String,
}

impl LiteralToken {
    /// The full token text, e.g. `{=region}`
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The referenced member name, e.g. `region`
    pub fn member(&self) -> &str {
        &self.member
    }
}

/// Distinct literal tokens of `sql` in order of first appearance
pub fn literal_tokens(sql: &str) -> Vec<LiteralToken> {
    if !sql.contains("{=") {
        return Vec::new();
    }
    let mut seen = FxHashSet::default();
    LITERAL_TOKENS
        .captures_iter(sql)
        .filter(|caps| seen.insert(caps[0].to_string()))
        .map(|caps| LiteralToken {
            token: caps[0].to_string(),
            member: caps[1].to_string(),
        })
        .collect()
}

/// Renders a value as SQL literal text
///
/// Null is `null`, booleans are `1`/`0`, numbers use invariant formatting
/// and sequences become a parenthesized list. Other kinds cannot be
/// rendered safely and are rejected.
pub fn format_literal(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Boolean(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(EMPTY_LITERAL_LIST.to_string());
            }
            let mut out = String::from("(");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format_literal(item)?);
            }
            out.push(')');
            Ok(out)
        }
        other => Err(Error::NotSupported(format!(
            "{} values are not supported for SQL literals",
            other.kind_name()
        ))),
    }
}

/// Replaces every token whose member `lookup` resolves
///
/// Tokens naming an unknown member are left in the text unchanged.
pub fn replace_literals<F>(sql: &str, tokens: &[LiteralToken], mut lookup: F) -> Result<String>
where
    F: FnMut(&str) -> Option<Value>,
{
    let mut out = sql.to_string();
    for token in tokens {
        if let Some(value) = lookup(token.member()) {
            out = out.replace(token.token(), &format_literal(&value)?);
        }
    }
    Ok(out)
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '@' || c == '_'
}

/// Whether the SQL uses bare positional markers (`?`, `@` or `:` with no
/// identifier attached), in which case members cannot be filtered by name
pub fn looks_positional(sql: &str) -> bool {
    let chars: Vec<char> = sql.chars().collect();
    chars.iter().enumerate().any(|(i, &c)| {
        if !matches!(c, '?' | '@' | ':') {
            return false;
        }
        let before = i.checked_sub(1).map(|p| chars[p]);
        let after = chars.get(i + 1).copied();
        !before.is_some_and(is_identifier_char) && !after.is_some_and(is_identifier_char)
    })
}

/// Pattern matching a named placeholder for `name`, followed by a
/// non-identifier character or the end of the text
pub fn placeholder_pattern(name: &str) -> Result<Regex> {
    Regex::new(&format!(r"(?im)[?@:]{}([^a-zA-Z0-9_]+|$)", regex::escape(name)))
        .map_err(|e| Error::internal(format!("invalid placeholder pattern: {}", e)))
}

/// Pattern matching a list placeholder for `name` with an optional
/// `unknown` type hint
pub fn list_pattern(name: &str) -> Result<Regex> {
    Regex::new(&format!(r"(?i)([?@:]{}\b)(\s+unknown)?", regex::escape(name)))
        .map_err(|e| Error::internal(format!("invalid list pattern: {}", e)))
}

/// Rewrites every occurrence of a list placeholder for `count` expanded
/// parameters
///
/// With no elements the placeholder becomes an always-false sub-select;
/// with elements it becomes `(@name1,@name2,...)`. A placeholder carrying
/// the `unknown` hint is expanded without parentheses, each element keeping
/// the hint, and is left untouched when the list is empty.
pub fn expand_list(sql: &str, pattern: &Regex, count: usize) -> String {
    pattern
        .replace_all(sql, |caps: &Captures<'_>| {
            let variable = &caps[1];
            match caps.get(2) {
                Some(hint) if count == 0 => format!("{}{}", variable, hint.as_str()),
                Some(hint) => (1..=count)
                    .map(|i| format!("{}{}{}", variable, i, hint.as_str()))
                    .collect::<Vec<_>>()
                    .join(","),
                None if count == 0 => format!("(SELECT {} WHERE 1 = 0)", variable),
                None => {
                    let items: Vec<String> =
                        (1..=count).map(|i| format!("{}{}", variable, i)).collect();
                    format!("({})", items.join(","))
                }
            }
        })
        .into_owned()
}
