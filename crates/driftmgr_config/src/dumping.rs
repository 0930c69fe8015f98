//! Utilities for serializing config objects into a flattened, documented map.
//! The elements structure is:
//!
//! ```ignore
//! "conf1.conf2.param_name": {
//!     "description": "Param description.",
//!     "value": json_value
//! }
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};

use serde::Serialize;
use serde_json::json;

use crate::{ConfigError, ParamPath, SerializedParam};

/// Serialization for config structs, so every field a deployer can tune
/// shows up with a description next to its default value.
pub trait SerializeConfig {
    /// Flattens this config into a mapping of dotted parameter paths to
    /// their description and current value.
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam>;

    /// Writes [`Self::dump`] to `path` as pretty-printed JSON.
    fn dump_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.dump())?;
        writer.flush()?;
        Ok(())
    }
}

/// Serializes a single parameter. The returned pair is designed to be an
/// entry in a dumped config map.
pub fn ser_param<T: Serialize>(
    name: &str,
    value: &T,
    description: &str,
) -> (ParamPath, SerializedParam) {
    (name.to_owned(), SerializedParam { description: description.to_owned(), value: json!(value) })
}

/// Prefixes every key of `sub_dump` with `sub_config_name.`, for composing a
/// parent config's [`SerializeConfig::dump`] out of its sub-configs.
pub fn append_sub_config_name(
    sub_dump: BTreeMap<ParamPath, SerializedParam>,
    sub_config_name: &str,
) -> BTreeMap<ParamPath, SerializedParam> {
    sub_dump
        .into_iter()
        .map(|(field_name, val)| (format!("{sub_config_name}.{field_name}"), val))
        .collect()
}

#[cfg(test)]
mod dumping_test {
    use super::*;

    struct Example {
        size: usize,
    }

    impl SerializeConfig for Example {
        fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
            BTreeMap::from([ser_param("size", &self.size, "how big")])
        }
    }

    #[test]
    fn dump_includes_description_and_value() {
        let dumped = Example { size: 7 }.dump();
        assert_eq!(dumped["size"].value, json!(7));
        assert_eq!(dumped["size"].description, "how big");
    }

    #[test]
    fn sub_config_name_prefixes_every_key() {
        let dumped = Example { size: 7 }.dump();
        let prefixed = append_sub_config_name(dumped, "backend");
        assert!(prefixed.contains_key("backend.size"));
    }
}
