//! Resolution of queued updates against the server's current copy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Remote copy overlaid with every queued change.
    #[default]
    LastWriteWins,
    /// Only apply changes to fields the server has not touched since `base`.
    Merge,
    /// Send the queued changes untouched.
    Local,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStrategy::LastWriteWins => write!(f, "last-write-wins"),
            ConflictStrategy::Merge => write!(f, "merge"),
            ConflictStrategy::Local => write!(f, "local"),
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "last-write-wins" => Ok(ConflictStrategy::LastWriteWins),
            "merge" => Ok(ConflictStrategy::Merge),
            "local" => Ok(ConflictStrategy::Local),
            _ => Err(format!(
                "Invalid conflict strategy '{}'. Valid options: last-write-wins, merge, local",
                s
            )),
        }
    }
}

impl ConflictStrategy {
    /// Builds the body to send for an update.
    ///
    /// Non-object values cannot be merged field by field, so the queued
    /// changes are sent as-is. Without a base snapshot `Merge` cannot tell
    /// which fields moved on the server and behaves like `LastWriteWins`.
    pub fn resolve(&self, base: Option<&Value>, remote: &Value, changes: &Value) -> Value {
        let (Value::Object(remote_map), Value::Object(change_map)) = (remote, changes) else {
            return changes.clone();
        };

        match self {
            ConflictStrategy::Local => changes.clone(),
            ConflictStrategy::LastWriteWins => Value::Object(overlay(remote_map, change_map)),
            ConflictStrategy::Merge => {
                let Some(Value::Object(base_map)) = base else {
                    return Value::Object(overlay(remote_map, change_map));
                };

                let mut merged = remote_map.clone();
                for (key, value) in change_map {
                    let untouched_remotely = base_map.get(key) == remote_map.get(key);
                    if untouched_remotely || !remote_map.contains_key(key) {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                Value::Object(merged)
            }
        }
    }
}

fn overlay(remote: &Map<String, Value>, changes: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = remote.clone();
    for (key, value) in changes {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_write_wins_overlays_changes() {
        let remote = json!({"id": "eq-1", "name": "Pump", "status": "ACTIVE"});
        let changes = json!({"name": "Main pump"});
        let resolved = ConflictStrategy::LastWriteWins.resolve(None, &remote, &changes);
        assert_eq!(
            resolved,
            json!({"id": "eq-1", "name": "Main pump", "status": "ACTIVE"})
        );
    }

    #[test]
    fn test_merge_keeps_remote_edits() {
        let base = json!({"name": "Pump", "model": "A1"});
        let remote = json!({"name": "Pump (server)", "model": "A1"});
        let changes = json!({"name": "Pump (tech)", "model": "A2", "notes": "new"});

        let resolved = ConflictStrategy::Merge.resolve(Some(&base), &remote, &changes);
        assert_eq!(
            resolved,
            json!({"name": "Pump (server)", "model": "A2", "notes": "new"})
        );
    }

    #[test]
    fn test_merge_without_base_is_last_write_wins() {
        let remote = json!({"name": "Server"});
        let changes = json!({"name": "Local"});
        assert_eq!(
            ConflictStrategy::Merge.resolve(None, &remote, &changes),
            json!({"name": "Local"})
        );
    }

    #[test]
    fn test_local_sends_changes() {
        let remote = json!({"name": "Server", "model": "X"});
        let changes = json!({"name": "Local"});
        assert_eq!(
            ConflictStrategy::Local.resolve(None, &remote, &changes),
            changes
        );
    }

    #[test]
    fn test_non_object_values() {
        let resolved = ConflictStrategy::LastWriteWins.resolve(None, &json!(null), &json!([1]));
        assert_eq!(resolved, json!([1]));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "merge".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::Merge
        );
        assert!("theirs".parse::<ConflictStrategy>().is_err());
    }
}
