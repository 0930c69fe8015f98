//! The State Store's validation rule registry (spec §4.2): a set of named
//! rules with severities, run over a parsed [`TerraformState`], with
//! strict mode promoting warnings to errors.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{ResourceMode, TerraformState};

static RESOURCE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("static regex is valid"));

/// How serious a failed validation rule is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// One failed rule: which rule, how serious, and a human-readable message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationIssue {
    pub rule: &'static str,
    pub severity: Severity,
    pub message: String,
}

/// A single validation rule: a name, a default severity, and a check
/// function returning any violation messages found.
pub struct Rule {
    pub name: &'static str,
    pub severity: Severity,
    pub check: fn(&TerraformState) -> Vec<String>,
}

/// Runs a registry of rules over a state; `strict` promotes every
/// [`Severity::Warning`] finding to [`Severity::Error`].
pub struct Validator {
    rules: Vec<Rule>,
    strict: bool,
}

impl Validator {
    /// The default rule set named in spec §4.2.
    pub fn with_default_rules() -> Self {
        Self {
            rules: vec![
                Rule { name: "supported_version", severity: Severity::Critical, check: check_version },
                Rule { name: "lineage_length", severity: Severity::Error, check: check_lineage_length },
                Rule { name: "resource_name_pattern", severity: Severity::Error, check: check_resource_names },
                Rule { name: "resource_mode", severity: Severity::Error, check: check_resource_mode },
                Rule { name: "resource_has_instance", severity: Severity::Warning, check: check_has_instance },
                Rule { name: "depends_on_resolves", severity: Severity::Error, check: check_depends_on_resolves },
                Rule { name: "no_duplicate_addresses", severity: Severity::Critical, check: check_no_duplicates },
                Rule { name: "schema_version_non_negative", severity: Severity::Warning, check: |_| Vec::new() },
            ],
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Adds a custom rule to the registry (spec: "Custom rules may be
    /// added or removed").
    pub fn add_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Removes every rule with the given name.
    pub fn remove_rule(mut self, name: &str) -> Self {
        self.rules.retain(|r| r.name != name);
        self
    }

    /// Runs every rule, returning every violation found. An empty result
    /// means the state passes; when `strict`, any [`Severity::Warning`]
    /// violation is reported as [`Severity::Error`] instead.
    pub fn validate(&self, state: &TerraformState) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for rule in &self.rules {
            for message in (rule.check)(state) {
                let severity = if self.strict && rule.severity == Severity::Warning {
                    Severity::Error
                } else {
                    rule.severity
                };
                issues.push(ValidationIssue { rule: rule.name, severity, message });
            }
        }
        issues
    }

    /// True iff no issue at [`Severity::Error`] or above was found.
    pub fn is_valid(&self, state: &TerraformState) -> bool {
        !self.validate(state).iter().any(|issue| issue.severity >= Severity::Error)
    }
}

fn check_version(state: &TerraformState) -> Vec<String> {
    if matches!(state.version, 3 | 4) {
        Vec::new()
    } else {
        vec![format!("unsupported state version {}", state.version)]
    }
}

fn check_lineage_length(state: &TerraformState) -> Vec<String> {
    if state.lineage.len() >= 8 {
        Vec::new()
    } else {
        vec![format!("lineage {:?} is shorter than the required 8 characters", state.lineage)]
    }
}

fn check_resource_names(state: &TerraformState) -> Vec<String> {
    state
        .resources
        .iter()
        .filter(|r| !RESOURCE_NAME_RE.is_match(&r.name))
        .map(|r| format!("resource name {:?} does not match [A-Za-z_][A-Za-z0-9_-]*", r.name))
        .collect()
}

fn check_resource_mode(state: &TerraformState) -> Vec<String> {
    // ResourceMode is a closed enum of {Managed, Data}; this rule exists
    // to give the invariant a named, independently-removable check even
    // though the type system already enforces it at parse time.
    state
        .resources
        .iter()
        .filter(|r| !matches!(r.mode, ResourceMode::Managed | ResourceMode::Data))
        .map(|r| format!("resource {} has an invalid mode", r.address()))
        .collect()
}

fn check_has_instance(state: &TerraformState) -> Vec<String> {
    state
        .resources
        .iter()
        .filter(|r| r.instances.is_empty())
        .map(|r| format!("resource {} has no instances", r.address()))
        .collect()
}

fn check_depends_on_resolves(state: &TerraformState) -> Vec<String> {
    let addresses: std::collections::HashSet<String> =
        state.resources.iter().map(|r| r.address()).collect();
    let mut issues = Vec::new();
    for resource in &state.resources {
        for dep in &resource.depends_on {
            let base = dep.split('[').next().unwrap_or(dep);
            if !addresses.contains(base) {
                issues.push(format!(
                    "resource {} depends_on unresolved target {dep}",
                    resource.address()
                ));
            }
        }
    }
    issues
}

fn check_no_duplicates(state: &TerraformState) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut issues = Vec::new();
    for resource in &state.resources {
        let key = (resource.module.clone(), resource.r#type.clone(), resource.name.clone());
        if !seen.insert(key) {
            issues.push(format!("duplicate resource address {}", resource.address()));
        }
    }
    issues
}

#[cfg(test)]
mod validator_test {
    use driftmgr_test_utils_inline::*;

    use super::*;

    // A tiny local builder, intentionally not pulled from driftmgr_test_utils:
    // the test_utils crate depends on this one (for TerraformState), so a
    // dev-dependency back on it here would be a cycle through a non-dev edge.
    mod driftmgr_test_utils_inline {
        use driftmgr_common::Value;
        use indexmap::IndexMap;

        use crate::model::*;

        pub fn minimal_valid_state() -> TerraformState {
            TerraformState {
                version: 4,
                terraform_version: "1.5.0".into(),
                serial: 0,
                lineage: "abcdefgh".into(),
                outputs: IndexMap::new(),
                resources: vec![Resource {
                    module: None,
                    mode: ResourceMode::Managed,
                    r#type: "aws_instance".into(),
                    name: "web".into(),
                    provider: "aws".into(),
                    depends_on: vec![],
                    instances: vec![Instance {
                        schema_version: 0,
                        attributes: IndexMap::from([("id".to_string(), Value::String("i-1".into()))]),
                        sensitive_attributes: vec![],
                        private: None,
                        dependencies: vec![],
                        create_before_destroy: false,
                        index_key: None,
                        status: InstanceStatus::Normal,
                    }],
                }],
                check_results: None,
            }
        }
    }

    #[test]
    fn minimal_valid_state_passes() {
        let validator = Validator::with_default_rules();
        assert!(validator.is_valid(&minimal_valid_state()));
    }

    #[test]
    fn short_lineage_is_an_error() {
        let mut state = minimal_valid_state();
        state.lineage = "short".into();
        let validator = Validator::with_default_rules();
        let issues = validator.validate(&state);
        assert!(issues.iter().any(|i| i.rule == "lineage_length" && i.severity == Severity::Error));
    }

    #[test]
    fn unresolved_depends_on_is_reported() {
        let mut state = minimal_valid_state();
        state.resources[0].depends_on.push("aws_vpc.missing".into());
        let validator = Validator::with_default_rules();
        let issues = validator.validate(&state);
        assert!(issues.iter().any(|i| i.rule == "depends_on_resolves"));
    }

    #[test]
    fn duplicate_addresses_are_critical() {
        let mut state = minimal_valid_state();
        let dup = state.resources[0].clone();
        state.resources.push(dup);
        let validator = Validator::with_default_rules();
        let issues = validator.validate(&state);
        assert!(issues.iter().any(|i| i.rule == "no_duplicate_addresses" && i.severity == Severity::Critical));
    }

    #[test]
    fn strict_mode_promotes_warnings_to_errors() {
        let mut state = minimal_valid_state();
        state.resources[0].instances.clear();
        let lenient = Validator::with_default_rules();
        assert!(lenient.is_valid(&state), "an empty-instance resource is only a warning by default");
        let strict = Validator::with_default_rules().strict(true);
        assert!(!strict.is_valid(&state));
    }

    #[test]
    fn removed_rule_no_longer_fires() {
        let mut state = minimal_valid_state();
        state.lineage = "short".into();
        let validator = Validator::with_default_rules().remove_rule("lineage_length");
        let issues = validator.validate(&state);
        assert!(!issues.iter().any(|i| i.rule == "lineage_length"));
    }
}
