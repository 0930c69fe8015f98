//! The resource-identity extraction table (spec §6), used to key both
//! live and state resources by `(provider, type, cloud_id)` so they can
//! be correlated during classification.

use driftmgr_common::AttributeMap;

/// Resource-family buckets the extraction table distinguishes. Matched by
/// substring/suffix convention against the Terraform resource type name,
/// the way the original table groups "EC2-like compute instances" and
/// "Security groups / NSGs" across providers.
fn family(resource_type: &str) -> &'static str {
    let t = resource_type.to_lowercase();
    if t.contains("instance") || t.contains("vm") || t.contains("compute") {
        "compute"
    } else if t.contains("bucket") || t.contains("blob_container") || t.contains("storage_account") {
        "object_storage"
    } else if t.contains("security_group") || t.contains("nsg") || t.contains("network_security") {
        "security_group"
    } else {
        "other"
    }
}

/// Extracts the attribute value used as the cloud identifier for
/// `resource_type`, per spec §6's extraction table:
///
/// | family | attribute |
/// |---|---|
/// | compute | `id` |
/// | object storage | `bucket` then `id` |
/// | security group | `id` |
/// | any resource with `arn` | `arn` then `id` |
/// | other | `id` then `name` |
pub fn extract_cloud_id(resource_type: &str, attributes: &AttributeMap) -> Option<String> {
    if let Some(arn) = attributes.get("arn").and_then(|v| v.as_str()) {
        return Some(arn.to_owned());
    }
    let candidates: &[&str] = match family(resource_type) {
        "compute" | "security_group" => &["id"],
        "object_storage" => &["bucket", "id"],
        _ => &["id", "name"],
    };
    for candidate in candidates {
        if let Some(value) = attributes.get(*candidate).and_then(|v| v.as_str()) {
            if !value.is_empty() {
                return Some(value.to_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod identity_test {
    use driftmgr_common::Value;
    use indexmap::IndexMap;

    use super::*;

    #[test]
    fn compute_instance_uses_id() {
        let attrs = IndexMap::from([("id".to_string(), Value::String("i-123".into()))]);
        assert_eq!(extract_cloud_id("aws_instance", &attrs), Some("i-123".to_string()));
    }

    #[test]
    fn bucket_prefers_bucket_over_id() {
        let attrs = IndexMap::from([
            ("bucket".to_string(), Value::String("my-bucket".into())),
            ("id".to_string(), Value::String("my-bucket-id".into())),
        ]);
        assert_eq!(extract_cloud_id("aws_s3_bucket", &attrs), Some("my-bucket".to_string()));
    }

    #[test]
    fn arn_wins_over_any_family_rule() {
        let attrs = IndexMap::from([
            ("arn".to_string(), Value::String("arn:aws:iam::1:role/x".into())),
            ("id".to_string(), Value::String("role-id".into())),
        ]);
        assert_eq!(extract_cloud_id("aws_iam_role", &attrs), Some("arn:aws:iam::1:role/x".to_string()));
    }

    #[test]
    fn missing_identifier_returns_none() {
        let attrs: AttributeMap = IndexMap::new();
        assert_eq!(extract_cloud_id("aws_instance", &attrs), None);
    }
}
