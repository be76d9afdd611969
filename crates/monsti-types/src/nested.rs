//! Namespace-split field layout shared by nodes and site settings.
//!
//! A field id `ns.Name.Rest` is stored at `Fields[ns]["Name.Rest"]`.

use crate::field::{Field, FieldConfig, FieldError, FieldValue};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Split a field id at its first dot.
pub fn split_field_id(id: &str) -> (&str, &str) {
    id.split_once('.').unwrap_or(("", id))
}

/// Dump `fields` in config order into the nested layout.
pub fn dump_fields<'a>(
    configs: impl IntoIterator<Item = &'a FieldConfig>,
    fields: &BTreeMap<String, FieldValue>,
) -> Map<String, Value> {
    let mut out = Map::new();
    for config in configs {
        let Some(value) = fields.get(&config.id) else {
            continue;
        };
        let (namespace, name) = split_field_id(&config.id);
        let entry = out
            .entry(namespace.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(group) = entry {
            group.insert(name.to_string(), value.dump());
        }
    }
    out
}

/// Load every configured field present in the nested layout. Missing
/// entries keep their zero value.
pub fn restore_fields<'a>(
    raw: Option<&Value>,
    configs: impl IntoIterator<Item = &'a FieldConfig>,
    fields: &mut BTreeMap<String, FieldValue>,
) -> Result<(), FieldError> {
    let Some(raw) = raw else {
        return Ok(());
    };
    let Value::Object(groups) = raw else {
        return Err(FieldError::FieldLoadFailed("fields must be an object".into()));
    };
    for config in configs {
        let (namespace, name) = split_field_id(&config.id);
        let Some(fragment) = groups.get(namespace).and_then(|g| g.get(name)) else {
            continue;
        };
        if let Some(value) = fields.get_mut(&config.id) {
            value
                .load(fragment)
                .map_err(|e| FieldError::FieldLoadFailed(format!("{}: {e}", config.id)))?;
        }
    }
    Ok(())
}

/// Look up a dotted path (`a.b.c`) in a JSON document. The empty path
/// returns the document itself.
pub fn lookup_dotted<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(doc);
    }
    path.split('.').try_fold(doc, |current, segment| current.get(segment))
}
