//! Builders for sample Terraform state documents and the records nested
//! inside them.

use driftmgr_backend::LockInfo;
use driftmgr_common::Value;
use driftmgr_state::{Instance, OutputValue, Resource, ResourceMode, TerraformState};
use indexmap::IndexMap;

/// A `LockInfo` with deterministic, readable field values, for tests that
/// only care about lock contention, not the specific identity held.
pub fn lock_info_fixture(who: &str) -> LockInfo {
    LockInfo {
        id: format!("{who}-lock"),
        path: "terraform.tfstate".to_owned(),
        operation: "OperationTypeApply".to_owned(),
        who: who.to_owned(),
        version: "1.7.0".to_owned(),
        created: chrono::Utc::now(),
        info: String::new(),
    }
}

/// A single managed resource of `resource_type` named `name`, provider
/// `"aws"`, with one plain (non-indexed) instance carrying an `id`
/// attribute (and, for bucket-shaped types, a `bucket` attribute) so
/// [`driftmgr_drift::identity::extract_cloud_id`] always finds something.
pub fn resource_fixture(resource_type: &str, name: &str) -> Resource {
    let mut attributes = IndexMap::new();
    attributes.insert("id".to_owned(), Value::String(format!("{name}-id")));
    if resource_type.contains("bucket") {
        attributes.insert("bucket".to_owned(), Value::String(format!("{name}-bucket")));
    }
    Resource {
        module: None,
        mode: ResourceMode::Managed,
        r#type: resource_type.to_owned(),
        name: name.to_owned(),
        provider: "aws".to_owned(),
        depends_on: Vec::new(),
        instances: vec![Instance {
            schema_version: 0,
            attributes,
            sensitive_attributes: Vec::new(),
            private: None,
            dependencies: Vec::new(),
            create_before_destroy: false,
            index_key: None,
            status: Default::default(),
        }],
    }
}

/// A minimal but complete state: one `aws_instance.web` resource,
/// version 4, a valid 8-character lineage.
pub fn sample_state() -> TerraformState {
    TerraformState {
        version: 4,
        terraform_version: "1.7.0".to_owned(),
        serial: 0,
        lineage: "abcdefgh".to_owned(),
        outputs: IndexMap::from([(
            "instance_id".to_owned(),
            OutputValue { value: Value::String("web-id".to_owned()), value_type: None, sensitive: false },
        )]),
        resources: vec![resource_fixture("aws_instance", "web")],
        check_results: None,
    }
}

/// A three-resource chain exercising the Dependency Graph: `aws_vpc.main`
/// is referenced by `aws_subnet.a` (via a `${aws_vpc.main.id}`
/// interpolation), which is in turn referenced by `aws_instance.i`. Blast
/// radius of `aws_vpc.main` is therefore `{aws_subnet.a, aws_instance.i}`.
pub fn sample_state_with_dependencies() -> TerraformState {
    let mut vpc = resource_fixture("aws_vpc", "main");
    vpc.instances[0].attributes.insert("id".to_owned(), Value::String("vpc-1".to_owned()));

    let mut subnet = resource_fixture("aws_subnet", "a");
    subnet.instances[0].attributes.insert("id".to_owned(), Value::String("subnet-1".to_owned()));
    subnet.instances[0].attributes.insert(
        "vpc_id".to_owned(),
        Value::String("${aws_vpc.main.id}".to_owned()),
    );

    let mut instance = resource_fixture("aws_instance", "i");
    instance.instances[0].attributes.insert(
        "subnet_id".to_owned(),
        Value::String("${aws_subnet.a.id}".to_owned()),
    );

    TerraformState {
        version: 4,
        terraform_version: "1.7.0".to_owned(),
        serial: 0,
        lineage: "abcdefgh".to_owned(),
        outputs: IndexMap::new(),
        resources: vec![vpc, subnet, instance],
        check_results: None,
    }
}
