//! Normalization of loosely-typed id lists and alias tables.
//!
//! Operators write these fields either as lists or as maps, with ids as
//! strings or bare numbers. Every entry is parsed on its own: a bad entry
//! yields a diagnostic and is skipped while the rest of the batch survives.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;

use crate::diagnostics::ConfigDiagnostic;

const ALIAS_SEPARATORS: [char; 2] = [':', '\u{ff1a}'];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntries {
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

fn parse_raw_entries(
    field: &str,
    value: &Value,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) -> Option<RawEntries> {
    if value.is_null() {
        return None;
    }
    if let Some(single) = value.as_str() {
        return Some(RawEntries::List(vec![Value::String(single.to_string())]));
    }
    match serde_json::from_value::<RawEntries>(value.clone()) {
        Ok(entries) => Some(entries),
        Err(_) => {
            diagnostics.push(ConfigDiagnostic::warning(
                field,
                format!("expected a list or a map, found {}", value_kind(value)),
            ));
            None
        }
    }
}

/// Renders a scalar id (string or integer) as a trimmed string.
pub fn scalar_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => number
            .as_u64()
            .map(|id| id.to_string())
            .or_else(|| number.as_i64().map(|id| id.to_string())),
        _ => None,
    }
}

/// Parses a set of ids from a list (`["1", 2]`) or a map (`{"1": true, "2": false}`).
///
/// In map form a `false` value disables the id; any other value enables it.
pub fn parse_id_set(
    field: &str,
    value: &Value,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    match parse_raw_entries(field, value, diagnostics) {
        None => {}
        Some(RawEntries::List(items)) => {
            for (index, item) in items.iter().enumerate() {
                match scalar_to_id(item) {
                    Some(id) => {
                        ids.insert(id);
                    }
                    None => diagnostics.push(ConfigDiagnostic::warning(
                        field,
                        format!(
                            "entry #{index} skipped: expected a string or integer id, found {}",
                            value_kind(item)
                        ),
                    )),
                }
            }
        }
        Some(RawEntries::Map(entries)) => {
            for (key, flag) in entries {
                let id = key.trim();
                if id.is_empty() {
                    diagnostics.push(ConfigDiagnostic::warning(field, "empty id key skipped"));
                    continue;
                }
                if flag == Value::Bool(false) {
                    continue;
                }
                ids.insert(id.to_string());
            }
        }
    }
    ids
}

/// Splits an `id:alias` entry on its first ASCII or full-width colon.
pub fn split_alias_entry(raw: &str) -> Option<(String, String)> {
    let separator_index = raw.find(|ch: char| ALIAS_SEPARATORS.contains(&ch))?;
    let separator_len = raw[separator_index..].chars().next()?.len_utf8();
    let id = raw[..separator_index].trim();
    let alias = raw[separator_index + separator_len..].trim();
    if id.is_empty() || alias.is_empty() {
        return None;
    }
    Some((id.to_string(), alias.to_string()))
}

/// Parses alias entries from `["id:alias", ...]` or `{"id": "alias", ...}`.
pub fn parse_alias_table(
    field: &str,
    value: &Value,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) -> BTreeMap<String, String> {
    let mut aliases = BTreeMap::new();
    let mut insert = |id: String, alias: String, diagnostics: &mut Vec<ConfigDiagnostic>| {
        if let Some(previous) = aliases.insert(id.clone(), alias) {
            diagnostics.push(ConfigDiagnostic::warning(
                field,
                format!("duplicate alias for id {id}; replaced '{previous}' with the later entry"),
            ));
        }
    };

    match parse_raw_entries(field, value, diagnostics) {
        None => {}
        Some(RawEntries::List(items)) => {
            for (index, item) in items.iter().enumerate() {
                let Some(raw) = item.as_str() else {
                    diagnostics.push(ConfigDiagnostic::warning(
                        field,
                        format!(
                            "entry #{index} skipped: expected an \"id:alias\" string, found {}",
                            value_kind(item)
                        ),
                    ));
                    continue;
                };
                match split_alias_entry(raw) {
                    Some((id, alias)) => insert(id, alias, diagnostics),
                    None => diagnostics.push(ConfigDiagnostic::warning(
                        field,
                        format!("entry #{index} skipped: '{raw}' is not in \"id:alias\" form"),
                    )),
                }
            }
        }
        Some(RawEntries::Map(entries)) => {
            for (key, alias_value) in entries {
                let id = key.trim().to_string();
                let alias = scalar_to_id(&alias_value);
                match (id.is_empty(), alias) {
                    (false, Some(alias)) => insert(id, alias, diagnostics),
                    _ => diagnostics.push(ConfigDiagnostic::warning(
                        field,
                        format!(
                            "entry '{key}' skipped: expected a non-empty id mapped to a string alias"
                        ),
                    )),
                }
            }
        }
    }
    aliases
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}
