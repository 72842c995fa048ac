//! State deltas pushed from the scheduler to the app.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A single value change in the app state tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Dotted path, e.g. `calls.scheduling.<hash>.running`.
    pub path: String,
    pub new_value: serde_json::Value,
}

/// A delta addressed to one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDelta {
    pub id: String,
    pub delta: Delta,
}

impl ComponentDelta {
    /// The delta that marks a scheduled call as running.
    pub fn scheduled_run(component: &str, call_hash: &str) -> Self {
        Self {
            id: component.to_string(),
            delta: Delta {
                path: format!("calls.scheduling.{}.running", call_hash),
                new_value: serde_json::Value::Bool(true),
            },
        }
    }
}

pub type DeltaSender = mpsc::UnboundedSender<ComponentDelta>;
pub type DeltaReceiver = mpsc::UnboundedReceiver<ComponentDelta>;

/// The app's inbound delta queue.
pub fn delta_queue() -> (DeltaSender, DeltaReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_run_shape() {
        let d = ComponentDelta::scheduled_run("root.work", "abc123");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["id"], "root.work");
        assert_eq!(json["delta"]["path"], "calls.scheduling.abc123.running");
        assert_eq!(json["delta"]["new_value"], true);
    }
}
