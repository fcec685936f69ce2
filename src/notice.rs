//! Purpose: Define a stable, structured schema for non-fatal stderr notices.
//! Exports: `Notice`, `notice_json`, `now_rfc3339`.
//! Role: Shared contract helper for CLI diagnostics (skipped plugins, dependency cycles).
//! Invariants: Notices are non-fatal and never alter stdout payloads.
//! Invariants: JSON schema is stable once published; fields are additive-only.
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    pub plugin: Option<String>,
    pub message: String,
    pub details: Map<String, Value>,
}

impl Notice {
    /// Stamped with the current UTC time.
    pub fn now(kind: &str, cmd: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            time: now_rfc3339(),
            cmd: cmd.to_string(),
            plugin: None,
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_detail(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }
}

pub fn notice_json(notice: &Notice) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(notice.kind));
    inner.insert("time".to_string(), json!(notice.time));
    inner.insert("cmd".to_string(), json!(notice.cmd));
    if let Some(plugin) = &notice.plugin {
        inner.insert("plugin".to_string(), json!(plugin));
    }
    inner.insert("message".to_string(), json!(notice.message));
    inner.insert("details".to_string(), Value::Object(notice.details.clone()));

    let mut outer = Map::new();
    outer.insert("notice".to_string(), Value::Object(inner));
    Value::Object(outer)
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::{Notice, notice_json};
    use serde_json::{Map, Value};

    #[test]
    fn notice_json_has_required_fields() {
        let mut details = Map::new();
        details.insert("missing".to_string(), Value::from(vec!["ghost"]));

        let notice = Notice {
            kind: "skipped".to_string(),
            time: "2026-02-01T00:00:00Z".to_string(),
            cmd: "list".to_string(),
            plugin: Some("mid".to_string()),
            message: "missing hard dependencies".to_string(),
            details,
        };

        let value = notice_json(&notice);
        let obj = value
            .get("notice")
            .and_then(|v| v.as_object())
            .expect("notice object");

        assert_eq!(obj.get("kind").and_then(|v| v.as_str()), Some("skipped"));
        assert_eq!(
            obj.get("time").and_then(|v| v.as_str()),
            Some("2026-02-01T00:00:00Z")
        );
        assert_eq!(obj.get("cmd").and_then(|v| v.as_str()), Some("list"));
        assert_eq!(obj.get("plugin").and_then(|v| v.as_str()), Some("mid"));
        assert_eq!(
            obj.get("message").and_then(|v| v.as_str()),
            Some("missing hard dependencies")
        );
        assert!(obj.get("details").and_then(|v| v.as_object()).is_some());
    }

    #[test]
    fn plugin_field_is_omitted_when_absent() {
        let notice = Notice::now("cycle", "list", "dependency cycle");
        let value = notice_json(&notice);
        assert!(value["notice"].get("plugin").is_none());
        assert!(value["notice"]["time"].as_str().is_some_and(|t| t.ends_with('Z')));
    }
}
