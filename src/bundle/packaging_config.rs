//! In-place patching of the packaging tool's configuration.
//!
//! Only the architecture selector is touched. JSON keeps its key order and
//! TOML keeps comments and layout, so the file diff stays one line.

use crate::utils::fs::write_atomic;
use std::path::Path;
use toml_edit::TableLike;

/// Sets the dotted key `field` in the config at `path` to `value`.
///
/// Missing intermediate tables/objects are created. Returns `false` when the
/// field already held `value` and the file was left untouched.
pub async fn patch_field(path: &Path, field: &str, value: &str) -> Result<bool, String> {
    let keys: Vec<&str> = field.split('.').collect();
    if keys.iter().any(|k| k.is_empty()) {
        return Err(format!("invalid key path `{field}`"));
    }

    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("failed to read: {e}"))?;

    let patched = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => patch_json(&contents, &keys, value)?,
        Some("toml") => patch_toml(&contents, &keys, value)?,
        _ => return Err("unsupported config format (expected .json or .toml)".into()),
    };

    match patched {
        Some(updated) => {
            write_atomic(path, updated.as_bytes())
                .await
                .map_err(|e| format!("failed to write: {e}"))?;
            log::debug!("Set {} = {:?} in {}", field, value, path.display());
            Ok(true)
        }
        None => Ok(false),
    }
}

fn patch_json(contents: &str, keys: &[&str], value: &str) -> Result<Option<String>, String> {
    let mut root: serde_json::Value =
        serde_json::from_str(contents).map_err(|e| format!("invalid JSON: {e}"))?;
    let object = root
        .as_object_mut()
        .ok_or("top-level JSON value is not an object")?;

    if !set_json(object, keys, value)? {
        return Ok(None);
    }

    let mut updated =
        serde_json::to_string_pretty(&root).map_err(|e| format!("failed to serialize: {e}"))?;
    updated.push('\n');
    Ok(Some(updated))
}

fn set_json(
    object: &mut serde_json::Map<String, serde_json::Value>,
    keys: &[&str],
    value: &str,
) -> Result<bool, String> {
    match keys {
        [last] => {
            if object.get(*last).and_then(|v| v.as_str()) == Some(value) {
                return Ok(false);
            }
            object.insert(last.to_string(), serde_json::Value::String(value.to_string()));
            Ok(true)
        }
        [first, rest @ ..] => {
            let child = object
                .entry(first.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()))
                .as_object_mut()
                .ok_or_else(|| format!("`{first}` is not an object"))?;
            set_json(child, rest, value)
        }
        [] => Err("empty key path".into()),
    }
}

fn patch_toml(contents: &str, keys: &[&str], value: &str) -> Result<Option<String>, String> {
    let mut doc: toml_edit::DocumentMut = contents
        .parse()
        .map_err(|e: toml_edit::TomlError| format!("invalid TOML: {e}"))?;

    if !set_toml(doc.as_table_mut(), keys, value)? {
        return Ok(None);
    }
    Ok(Some(doc.to_string()))
}

fn set_toml(table: &mut dyn TableLike, keys: &[&str], value: &str) -> Result<bool, String> {
    match keys {
        [last] => {
            if let Some(item) = table.get_mut(last) {
                if item.as_str() == Some(value) {
                    return Ok(false);
                }
                // Keep surrounding whitespace and trailing comments
                if let Some(existing) = item.as_value_mut() {
                    let decor = existing.decor().clone();
                    *existing = toml_edit::Value::from(value);
                    *existing.decor_mut() = decor;
                    return Ok(true);
                }
            }
            table.insert(last, toml_edit::value(value));
            Ok(true)
        }
        [first, rest @ ..] => {
            let child = table
                .entry(first)
                .or_insert(toml_edit::table())
                .as_table_like_mut()
                .ok_or_else(|| format!("`{first}` is not a table"))?;
            set_toml(child, rest, value)
        }
        [] => Err("empty key path".into()),
    }
}
