//! Cluster permissions of the workflow controller's service account.

use k8s_openapi::api::rbac::v1::PolicyRule;

fn rule(api_group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_owned()]),
        resources: Some(resources.iter().map(|s| s.to_string()).collect()),
        verbs: verbs.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

/// The fixed rule list granted to the controller.
pub fn rules() -> Vec<PolicyRule> {
    vec![
        rule(
            "",
            &["pods", "pods/exec"],
            &["create", "get", "list", "watch", "update", "patch", "delete"],
        ),
        rule("", &["configmaps"], &["get", "watch", "list"]),
        rule("", &["persistentvolumeclaims"], &["create", "delete", "get"]),
        rule("", &["serviceaccounts"], &["get", "list"]),
        rule("", &["events"], &["create", "patch"]),
        rule(
            "argoproj.io",
            &["workflows", "workflows/finalizers"],
            &["get", "list", "watch", "update", "patch", "delete", "create"],
        ),
        rule(
            "argoproj.io",
            &["cronworkflows", "cronworkflows/finalizers"],
            &["get", "list", "watch", "update", "patch", "delete"],
        ),
        rule(
            "argoproj.io",
            &[
                "workflowtemplates",
                "workflowtemplates/finalizers",
                "clusterworkflowtemplates",
                "clusterworkflowtemplates/finalizers",
            ],
            &["get", "list", "watch"],
        ),
        rule("policy", &["poddisruptionbudgets"], &["create", "delete", "get"]),
    ]
}
