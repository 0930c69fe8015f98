//! Parses Terraform state bytes into [`TerraformState`]: a direct v4 parse
//! first, falling back to the legacy (v3/v2) module-nested format, which is
//! normalized into v4 shape in-memory (spec §4.2, §6).

use driftmgr_common::Value;
use indexmap::IndexMap;

use crate::model::{Instance, InstanceStatus, OutputValue, Resource, ResourceMode, TerraformState};

/// Parses `bytes` as Terraform state. Tries the direct v4 shape first;
/// falls back to the legacy module-nested (v2/v3) shape, normalizing
/// provider strings and flattening module-nested resources on the way.
/// Legacy inputs are accepted read-only: the returned document always
/// reports `version: 4`.
pub fn parse_state(bytes: &[u8]) -> Result<TerraformState, serde_json::Error> {
    let raw: serde_json::Value = serde_json::from_slice(bytes)?;
    let version = raw.get("version").and_then(|v| v.as_u64()).unwrap_or(4);
    if version >= 4 {
        let mut state: TerraformState = serde_json::from_value(raw)?;
        for resource in &mut state.resources {
            resource.provider = normalize_provider(&resource.provider);
        }
        Ok(state)
    } else {
        Ok(parse_legacy(&raw))
    }
}

/// Strips a `registry.terraform.io/<namespace>/` prefix and an `(alias)`
/// or `.alias` suffix from a provider reference, per spec §4.2.
pub fn normalize_provider(provider: &str) -> String {
    let without_registry = provider
        .strip_prefix("registry.terraform.io/")
        .map(|rest| rest.rsplit_once('/').map(|(_, name)| name).unwrap_or(rest))
        .unwrap_or(provider);
    let without_provider_prefix =
        without_registry.strip_prefix("provider.").unwrap_or(without_registry);
    without_provider_prefix
        .split_once('.')
        .map(|(base, _alias)| base)
        .unwrap_or(without_provider_prefix)
        .to_owned()
}

fn parse_legacy(raw: &serde_json::Value) -> TerraformState {
    let terraform_version =
        raw.get("terraform_version").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
    let serial = raw.get("serial").and_then(|v| v.as_u64()).unwrap_or(0);
    let lineage = raw.get("lineage").and_then(|v| v.as_str()).unwrap_or_default().to_owned();

    let mut outputs = IndexMap::new();
    let mut resources = Vec::new();

    if let Some(modules) = raw.get("modules").and_then(|m| m.as_array()) {
        for module_block in modules {
            let path: Vec<&str> =
                module_block.get("path").and_then(|p| p.as_array()).map(|arr| {
                    arr.iter().filter_map(|v| v.as_str()).collect()
                }).unwrap_or_default();
            let module_name = legacy_module_name(&path);

            if module_name.is_none() {
                if let Some(module_outputs) =
                    module_block.get("outputs").and_then(|o| o.as_object())
                {
                    for (name, value) in module_outputs {
                        outputs.insert(
                            name.clone(),
                            OutputValue {
                                value: value
                                    .get("value")
                                    .cloned()
                                    .unwrap_or(serde_json::Value::Null)
                                    .into(),
                                value_type: None,
                                sensitive: value
                                    .get("sensitive")
                                    .and_then(|s| s.as_bool())
                                    .unwrap_or(false),
                            },
                        );
                    }
                }
            }

            if let Some(module_resources) =
                module_block.get("resources").and_then(|r| r.as_object())
            {
                for (key, body) in module_resources {
                    resources.push(legacy_resource(key, body, module_name.clone()));
                }
            }
        }
    }

    TerraformState {
        version: 4,
        terraform_version,
        serial,
        lineage,
        outputs,
        resources,
        check_results: None,
    }
}

/// `["root"]` has no module name; `["root", "x"]` is `"module.x"`;
/// `["root", "a", "b"]` is `"module.a.module.b"`.
fn legacy_module_name(path: &[&str]) -> Option<String> {
    if path.len() <= 1 {
        None
    } else {
        Some(path[1..].iter().map(|p| format!("module.{p}")).collect::<Vec<_>>().join("."))
    }
}

fn legacy_resource(key: &str, body: &serde_json::Value, module: Option<String>) -> Resource {
    let (mode, type_name) =
        if let Some(rest) = key.strip_prefix("data.") { (ResourceMode::Data, rest) } else { (ResourceMode::Managed, key) };
    let (r#type, name) = type_name.split_once('.').unwrap_or((type_name, ""));

    let provider = body
        .get("provider")
        .and_then(|p| p.as_str())
        .map(normalize_provider)
        .unwrap_or_default();

    let mut instances = Vec::new();
    if let Some(primary) = body.get("primary") {
        instances.push(legacy_instance(primary));
    }
    if let Some(deposed) = body.get("deposed").and_then(|d| d.as_array()) {
        for entry in deposed {
            let mut instance = legacy_instance(entry);
            instance.status = InstanceStatus::Deposed;
            instances.push(instance);
        }
    }

    Resource {
        module,
        mode,
        r#type: r#type.to_owned(),
        name: name.to_owned(),
        provider,
        depends_on: body
            .get("depends_on")
            .and_then(|d| d.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default(),
        instances,
    }
}

fn legacy_instance(body: &serde_json::Value) -> Instance {
    let attributes: driftmgr_common::AttributeMap = body
        .get("attributes")
        .and_then(|a| a.as_object())
        .map(|map| map.iter().map(|(k, v)| (k.clone(), Value::from(v.clone()))).collect())
        .unwrap_or_default();
    Instance {
        schema_version: 0,
        attributes,
        sensitive_attributes: Vec::new(),
        private: None,
        dependencies: Vec::new(),
        create_before_destroy: false,
        index_key: None,
        status: InstanceStatus::Normal,
    }
}

/// Serializes `state` as canonical indented JSON per spec §6: field order
/// `{version, terraform_version, serial, lineage, outputs, resources,
/// check_results?}`, two-space indentation, no trailing newline.
pub fn serialize_state(state: &TerraformState) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, serde_json::ser::PrettyFormatter::with_indent(b"  "));
    serde::Serialize::serialize(state, &mut serializer)?;
    Ok(buf)
}

#[cfg(test)]
mod parser_test {
    use super::*;

    #[test]
    fn normalizes_registry_prefix_and_alias() {
        assert_eq!(normalize_provider("registry.terraform.io/hashicorp/aws"), "aws");
        assert_eq!(normalize_provider("registry.terraform.io/hashicorp/aws.east"), "aws");
        assert_eq!(normalize_provider("provider.aws.east"), "aws");
        assert_eq!(normalize_provider("aws"), "aws");
    }

    #[test]
    fn v4_state_parses_directly() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "version": 4, "terraform_version": "1.5.0", "serial": 1,
            "lineage": "abcdefgh", "outputs": {}, "resources": [
                {
                    "mode": "managed", "type": "aws_instance", "name": "web",
                    "provider": "registry.terraform.io/hashicorp/aws",
                    "instances": [{"attributes": {"id": "i-1"}}],
                }
            ],
        }))
        .unwrap();
        let state = parse_state(&bytes).unwrap();
        assert_eq!(state.resources.len(), 1);
        assert_eq!(state.resources[0].provider, "aws");
    }

    #[test]
    fn legacy_two_modules_flatten_to_tagged_resources() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "version": 3, "terraform_version": "0.11.0", "serial": 2, "lineage": "legacy01",
            "modules": [
                {
                    "path": ["root"],
                    "outputs": {},
                    "resources": {},
                },
                {
                    "path": ["root", "x"],
                    "resources": {
                        "aws_instance.web": {
                            "type": "aws_instance",
                            "provider": "provider.aws",
                            "primary": {"id": "i-1", "attributes": {"id": "i-1"}},
                        }
                    },
                },
                {
                    "path": ["root", "y"],
                    "resources": {
                        "data.aws_ami.latest": {
                            "type": "aws_ami",
                            "provider": "provider.aws",
                            "primary": {"id": "ami-1", "attributes": {"id": "ami-1"}},
                        }
                    },
                },
            ],
        }))
        .unwrap();
        let state = parse_state(&bytes).unwrap();
        assert_eq!(state.version, 4);
        assert_eq!(state.resources.len(), 2);
        let web = state.find_resource(Some("module.x"), "aws_instance", "web").unwrap();
        assert_eq!(web.mode, ResourceMode::Managed);
        let ami = state.find_resource(Some("module.y"), "aws_ami", "latest").unwrap();
        assert_eq!(ami.mode, ResourceMode::Data);
    }

    #[test]
    fn serialize_preserves_field_order() {
        let state = TerraformState::new_empty("abcdefgh".into());
        let bytes = serialize_state(&state).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let version_pos = text.find("\"version\"").unwrap();
        let serial_pos = text.find("\"serial\"").unwrap();
        let lineage_pos = text.find("\"lineage\"").unwrap();
        let resources_pos = text.find("\"resources\"").unwrap();
        assert!(version_pos < serial_pos);
        assert!(serial_pos < lineage_pos);
        assert!(lineage_pos < resources_pos);
    }
}
