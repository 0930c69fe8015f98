//! Loads a config struct by layering, lowest to highest precedence:
//! built-in defaults, an optional JSON config file, then environment
//! variables prefixed `DRIFTMGR_` (nested fields addressed with `__`, e.g.
//! `DRIFTMGR_BACKEND__MAX_RETRIES=5`).
//!
//! There is deliberately no command-line flag layer here: parsing process
//! arguments is the CLI front-end's job, which is out of scope for this
//! crate.

use std::fs::File;
use std::io::Read;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::ConfigError;

/// Loads `T`, applying `file` (if given) and then `env_prefix`-matched
/// environment variables on top of `T::default()`.
pub fn load_and_process_config<T>(
    file: Option<File>,
    env_prefix: &str,
) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Serialize + Default,
{
    let mut merged = serde_json::to_value(T::default())?;

    if let Some(mut file) = file {
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let from_file: Value = serde_json::from_str(&contents)?;
        deep_merge(&mut merged, from_file);
    }

    apply_env_overrides(&mut merged, env_prefix)?;

    Ok(serde_json::from_value(merged)?)
}

fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                deep_merge(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

fn apply_env_overrides(value: &mut Value, env_prefix: &str) -> Result<(), ConfigError> {
    let prefix = format!("{env_prefix}_");
    for (name, raw) in std::env::vars() {
        let Some(path) = name.strip_prefix(&prefix) else { continue };
        let segments: Vec<String> = path.split("__").map(|s| s.to_lowercase()).collect();
        set_by_path(value, &segments, &raw).map_err(|reason| ConfigError::BadEnvValue {
            name: name.clone(),
            reason,
        })?;
    }
    Ok(())
}

fn set_by_path(value: &mut Value, path: &[String], raw: &str) -> Result<(), String> {
    let Some((head, rest)) = path.split_first() else {
        *value = parse_env_value(raw);
        return Ok(());
    };
    if value.is_null() {
        *value = Value::Object(serde_json::Map::new());
    }
    let Some(map) = value.as_object_mut() else {
        return Err(format!("cannot set nested field {head} on a non-object value"));
    };
    set_by_path(map.entry(head.clone()).or_insert(Value::Null), rest, raw)
}

/// Environment variables are always strings; try to recover the intended
/// JSON type before falling back to a plain string.
fn parse_env_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

#[cfg(test)]
mod loading_test {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Nested {
        max_retries: u32,
    }

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Example {
        name: String,
        backend: Nested,
    }

    #[test]
    fn defaults_survive_with_no_file_or_env() {
        let loaded: Example = load_and_process_config(None, "DRIFTMGR_TEST_NOENV").unwrap();
        assert_eq!(loaded, Example::default());
    }

    #[test]
    fn env_override_sets_nested_field() {
        std::env::set_var("DRIFTMGR_TEST_A_BACKEND__MAX_RETRIES", "9");
        let loaded: Example = load_and_process_config(None, "DRIFTMGR_TEST_A").unwrap();
        std::env::remove_var("DRIFTMGR_TEST_A_BACKEND__MAX_RETRIES");
        assert_eq!(loaded.backend.max_retries, 9);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{"name": "prod"}"#).unwrap();
        let reopened = File::open(file.path()).unwrap();
        let loaded: Example = load_and_process_config(Some(reopened), "DRIFTMGR_TEST_B").unwrap();
        assert_eq!(loaded.name, "prod");
        assert_eq!(loaded.backend.max_retries, 0);
    }
}
