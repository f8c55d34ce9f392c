//! Read-only views over a user configuration: receivers, route tree, grouping.

use std::collections::HashSet;

use amfork_core::{
    AlertmanagerError, Integration, PostableUserConfig, ReceiverConfig, Result, TestIntegrationResult,
    TestStatus,
};
use serde_json::Value;

/// Built-in configuration installed by `save_and_apply_default_config`
pub const DEFAULT_CONFIG: &str = r#"{
  "alertmanager_config": {
    "route": {
      "receiver": "grafana-default-email",
      "group_by": ["grafana_folder", "alertname"]
    },
    "receivers": [
      {
        "name": "grafana-default-email",
        "grafana_managed_receiver_configs": [
          {
            "uid": "",
            "name": "email receiver",
            "type": "email",
            "settings": {"addresses": "<example@email.com>"}
          }
        ]
      }
    ]
  }
}"#;

const GRAFANA_MANAGED: &str = "grafana_managed_receiver_configs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupBy {
    /// `...`: every label is part of the group key
    All,
    Labels(Vec<String>),
}

pub fn validate(config: &PostableUserConfig) -> Result<()> {
    let mut names = HashSet::new();
    for receiver in &config.alertmanager_config.receivers {
        if receiver.name.trim().is_empty() {
            return Err(AlertmanagerError::InvalidConfig(
                "receiver with empty name".to_string(),
            ));
        }
        if !names.insert(receiver.name.as_str()) {
            return Err(AlertmanagerError::InvalidConfig(format!(
                "duplicate receiver {:?}",
                receiver.name
            )));
        }
    }

    if let Some(route) = &config.alertmanager_config.route {
        if root_receiver(config).is_none() {
            return Err(AlertmanagerError::InvalidConfig(
                "root route must specify a receiver".to_string(),
            ));
        }
        for name in route_receivers(route) {
            if !names.contains(name.as_str()) {
                return Err(AlertmanagerError::InvalidConfig(format!(
                    "route references undefined receiver {name:?}"
                )));
            }
        }
    }
    Ok(())
}

/// Receivers referenced anywhere in the route tree, in tree order
pub fn route_receivers(route: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_receivers(route, &mut out);
    out
}

fn collect_receivers(route: &Value, out: &mut Vec<String>) {
    if let Some(name) = route.get("receiver").and_then(Value::as_str) {
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    if let Some(children) = route.get("routes").and_then(Value::as_array) {
        for child in children {
            collect_receivers(child, out);
        }
    }
}

pub fn root_receiver(config: &PostableUserConfig) -> Option<&str> {
    config
        .alertmanager_config
        .route
        .as_ref()
        .and_then(|route| route.get("receiver"))
        .and_then(Value::as_str)
}

pub fn group_by(config: &PostableUserConfig) -> GroupBy {
    let labels: Vec<String> = config
        .alertmanager_config
        .route
        .as_ref()
        .and_then(|route| route.get("group_by"))
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if labels.iter().any(|l| l == "...") {
        GroupBy::All
    } else {
        GroupBy::Labels(labels)
    }
}

/// Integrations configured on a receiver
pub fn integrations(receiver: &ReceiverConfig) -> Vec<Integration> {
    let mut out = Vec::new();
    for (key, value) in &receiver.integrations {
        let Some(items) = value.as_array() else {
            continue;
        };
        for item in items {
            if key == GRAFANA_MANAGED {
                let Some(kind) = item.get("type").and_then(Value::as_str) else {
                    continue;
                };
                out.push(Integration {
                    name: kind.to_string(),
                    send_resolved: !item
                        .get("disableResolveMessage")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                });
            } else if let Some(kind) = key.strip_suffix("_configs") {
                out.push(Integration {
                    name: kind.to_string(),
                    send_resolved: item
                        .get("send_resolved")
                        .and_then(Value::as_bool)
                        .unwrap_or(true),
                });
            }
        }
    }
    out
}

/// Dry-run check of a receiver definition. Nothing is sent.
pub fn check_receiver(receiver: &ReceiverConfig) -> Vec<TestIntegrationResult> {
    let mut results = Vec::new();
    for (key, value) in &receiver.integrations {
        if key != GRAFANA_MANAGED && !key.ends_with("_configs") {
            continue;
        }
        let Some(items) = value.as_array() else {
            results.push(failed(key, format!("{key} must be a list")));
            continue;
        };
        for item in items {
            let name = if key == GRAFANA_MANAGED {
                match item.get("type").and_then(Value::as_str) {
                    Some(kind) => kind.to_string(),
                    None => {
                        results.push(failed(key, "missing integration type".to_string()));
                        continue;
                    }
                }
            } else {
                key.trim_end_matches("_configs").to_string()
            };
            if item.is_object() {
                results.push(TestIntegrationResult {
                    name,
                    status: TestStatus::Ok,
                    error: None,
                });
            } else {
                results.push(failed(&name, "integration must be an object".to_string()));
            }
        }
    }
    if results.is_empty() {
        results.push(failed(&receiver.name, "no integrations configured".to_string()));
    }
    results
}

fn failed(name: &str, error: String) -> TestIntegrationResult {
    TestIntegrationResult {
        name: name.to_string(),
        status: TestStatus::Failed,
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> PostableUserConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config: PostableUserConfig = serde_json::from_str(DEFAULT_CONFIG).unwrap();
        validate(&config).unwrap();
        assert_eq!(root_receiver(&config), Some("grafana-default-email"));
        let integrations = integrations(&config.alertmanager_config.receivers[0]);
        assert_eq!(integrations[0].name, "email");
        assert!(integrations[0].send_resolved);
    }

    #[test]
    fn test_route_tree_receivers() {
        let route = json!({
            "receiver": "root",
            "routes": [
                {"receiver": "team-a", "routes": [{"receiver": "team-b"}]},
                {"receiver": "root"}
            ]
        });
        assert_eq!(route_receivers(&route), ["root", "team-a", "team-b"]);
    }

    #[test]
    fn test_validate_rejects_undefined_receiver() {
        let config = parse(json!({
            "alertmanager_config": {
                "route": {"receiver": "root", "routes": [{"receiver": "ghost"}]},
                "receivers": [{"name": "root"}]
            }
        }));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let config = parse(json!({
            "alertmanager_config": {
                "receivers": [{"name": "a"}, {"name": "a"}]
            }
        }));
        assert!(matches!(
            validate(&config),
            Err(AlertmanagerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_group_by() {
        let config = parse(json!({
            "alertmanager_config": {"route": {"receiver": "a", "group_by": ["..."]}, "receivers": [{"name": "a"}]}
        }));
        assert_eq!(group_by(&config), GroupBy::All);
        let config = parse(json!({"alertmanager_config": {"receivers": []}}));
        assert_eq!(group_by(&config), GroupBy::Labels(vec![]));
    }

    #[test]
    fn test_check_receiver() {
        let receiver: ReceiverConfig = serde_json::from_value(json!({
            "name": "team-a",
            "webhook_configs": [{"url": "http://hook"}],
            "grafana_managed_receiver_configs": [{"name": "x"}]
        }))
        .unwrap();
        let results = check_receiver(&receiver);
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .any(|r| r.name == "webhook" && r.status == TestStatus::Ok));
        assert!(results
            .iter()
            .any(|r| r.status == TestStatus::Failed
                && r.error.as_deref() == Some("missing integration type")));

        let empty = ReceiverConfig {
            name: "empty".to_string(),
            integrations: Default::default(),
        };
        assert_eq!(check_receiver(&empty)[0].status, TestStatus::Failed);
    }
}
