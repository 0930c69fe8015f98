//! The canonical in-memory Terraform state document (spec §3).

use driftmgr_common::value::AttributeMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The Terraform JSON state document, supported versions {3, 4}.
///
/// Top-level field order matches the wire format exactly (spec §6): a
/// round-trip parse→serialize must not reorder them, since a consumer may
/// re-hash the bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerraformState {
    pub version: u32,
    pub terraform_version: String,
    /// Monotonic change counter. Strictly increases on every successful write.
    pub serial: u64,
    /// Opaque identifier stable across a state's history, ≥8 chars.
    pub lineage: String,
    #[serde(default)]
    pub outputs: IndexMap<String, OutputValue>,
    pub resources: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_results: Option<serde_json::Value>,
}

impl TerraformState {
    /// A freshly created state: serial 0, a newly generated lineage, no
    /// resources. Used by `import_resource` when no prior state exists.
    pub fn new_empty(lineage: String) -> Self {
        Self {
            version: 4,
            terraform_version: String::new(),
            serial: 0,
            lineage,
            outputs: IndexMap::new(),
            resources: Vec::new(),
            check_results: None,
        }
    }

    /// Looks up a resource by its `(type, name, module)` identity.
    pub fn find_resource(&self, module: Option<&str>, r#type: &str, name: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| r.module.as_deref() == module && r.r#type == r#type && r.name == name)
    }

    pub fn find_resource_mut(
        &mut self,
        module: Option<&str>,
        r#type: &str,
        name: &str,
    ) -> Option<&mut Resource> {
        self.resources
            .iter_mut()
            .find(|r| r.module.as_deref() == module && r.r#type == r#type && r.name == name)
    }
}

/// A Terraform output value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: driftmgr_common::Value,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<serde_json::Value>,
    #[serde(default)]
    pub sensitive: bool,
}

/// Whether a resource is cloud-owned (`managed`) or read-only (`data`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceMode {
    Managed,
    Data,
}

/// A single resource block: `{module?, mode, type, name, provider,
/// depends_on, instances[]}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub mode: ResourceMode,
    pub r#type: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub instances: Vec<Instance>,
}

impl Resource {
    /// `type.name`, the address form used everywhere a resource (not a
    /// specific instance) is addressed.
    pub fn address(&self) -> String {
        format!("{}.{}", self.r#type, self.name)
    }
}

/// Lifecycle status of a resource instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    #[serde(rename = "")]
    Normal,
    Tainted,
    Deposed,
}

/// A single instance of a resource (plain, or one element of a `count`/
/// `for_each` expansion, identified by `index_key`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub attributes: AttributeMap,
    #[serde(default)]
    pub sensitive_attributes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub create_before_destroy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_key: Option<serde_json::Value>,
    #[serde(default)]
    pub status: InstanceStatus,
}

impl Instance {
    /// Renders `index_key` the way an address suffix is written:
    /// `[0]` for a numeric key, `["key"]` for a string key.
    pub fn index_suffix(&self) -> String {
        match &self.index_key {
            None => String::new(),
            Some(serde_json::Value::Number(n)) => format!("[{n}]"),
            Some(serde_json::Value::String(s)) => format!("[\"{s}\"]"),
            Some(other) => format!("[{other}]"),
        }
    }
}

#[cfg(test)]
mod model_test {
    use super::*;

    #[test]
    fn resource_address_is_type_dot_name() {
        let resource = Resource {
            module: None,
            mode: ResourceMode::Managed,
            r#type: "aws_instance".into(),
            name: "web".into(),
            provider: "registry.terraform.io/hashicorp/aws".into(),
            depends_on: vec![],
            instances: vec![],
        };
        assert_eq!(resource.address(), "aws_instance.web");
    }

    #[test]
    fn numeric_index_key_renders_bracketed() {
        let instance = Instance {
            schema_version: 0,
            attributes: Default::default(),
            sensitive_attributes: vec![],
            private: None,
            dependencies: vec![],
            create_before_destroy: false,
            index_key: Some(serde_json::json!(2)),
            status: InstanceStatus::Normal,
        };
        assert_eq!(instance.index_suffix(), "[2]");
    }
}
