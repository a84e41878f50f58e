use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One event of a batch sent to `POST /1/batch/{dataset}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub data: Map<String, Value>,
    /// Forwarded exactly as given; Honeycomb does its own parsing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samplerate: Option<u32>,
}

/// Per-event outcome returned by the batch endpoint, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEventStatus {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHandle {
    pub query_id: String,
    pub dataset_slug: String,
}

/// A (possibly still running) query result. `complete` only ever goes
/// from false to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    #[serde(default)]
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
}

/// The webhook recipient owned by this installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRecipient {
    pub id: String,
    pub secret: String,
}

/// Body of `POST /1/recipients` for a webhook recipient.
#[derive(Debug, Clone, Serialize)]
pub struct NewWebhookRecipient {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub details: WebhookDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDetails {
    pub webhook_name: String,
    pub webhook_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

impl NewWebhookRecipient {
    pub fn webhook(name: String, url: String, secret: String) -> Self {
        Self {
            kind: "webhook",
            details: WebhookDetails {
                webhook_name: name,
                webhook_url: url,
                webhook_secret: Some(secret),
            },
        }
    }
}

/// A recipient as listed by `GET /1/recipients`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub details: Option<Value>,
}

impl Recipient {
    pub fn webhook_name(&self) -> Option<&str> {
        self.details
            .as_ref()
            .and_then(|d| d.get("webhook_name"))
            .and_then(|v| v.as_str())
    }
}

/// Filter over inbound trigger payloads. No `trigger_id` matches everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSubscription {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TriggerSubscription {
    pub fn matches(&self, payload: &TriggerPayload) -> bool {
        match &self.trigger_id {
            None => true,
            Some(wanted) => payload.id.as_deref() == Some(wanted.as_str()),
        }
    }
}

/// Body Honeycomb posts to the recipient when a trigger fires. Unknown
/// fields are kept so they reach subscribers untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_groups: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A matched trigger delivery queued for `event.publish`, not yet sent to host.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub event_type: String,
    pub subject: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientState {
    Absent,
    Provisioning,
    Ready,
    Failed,
    Draining,
    Drained,
    DrainingFailed,
}

/// Installation status reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationStatus {
    pub state: RecipientState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InstallationStatus {
    pub fn new(state: RecipientState) -> Self {
        Self {
            state,
            description: None,
        }
    }

    pub fn with_description(state: RecipientState, description: impl Into<String>) -> Self {
        Self {
            state,
            description: Some(description.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscription(trigger_id: Option<&str>) -> TriggerSubscription {
        TriggerSubscription {
            id: "sub".into(),
            trigger_id: trigger_id.map(String::from),
            created_at: Utc::now(),
        }
    }

    fn payload(id: &str) -> TriggerPayload {
        serde_json::from_value(json!({ "id": id })).unwrap()
    }

    #[test]
    fn unfiltered_subscription_matches_any_trigger() {
        let sub = subscription(None);
        assert!(sub.matches(&payload("t1")));
        assert!(sub.matches(&payload("t2")));
        assert!(sub.matches(&TriggerPayload::default()));
    }

    #[test]
    fn filtered_subscription_matches_only_its_trigger() {
        let sub = subscription(Some("t1"));
        assert!(sub.matches(&payload("t1")));
        assert!(!sub.matches(&payload("t2")));
        assert!(!sub.matches(&TriggerPayload::default()));
    }

    #[test]
    fn trigger_payload_keeps_unknown_fields() {
        let raw = json!({
            "id": "t1",
            "name": "High latency",
            "status": "TRIGGERED",
            "summary": "p99 > 2s",
            "result_groups_triggered": [{ "result": 2.5 }]
        });
        let parsed: TriggerPayload = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("High latency"));
        assert_eq!(parsed.extra.get("summary"), Some(&json!("p99 > 2s")));
        assert_eq!(serde_json::to_value(&parsed).unwrap(), raw);
    }

    #[test]
    fn event_omits_absent_optionals() {
        let event: Event = serde_json::from_value(json!({ "data": { "x": 1 } })).unwrap();
        assert_eq!(serde_json::to_value(&event).unwrap(), json!({ "data": { "x": 1 } }));
    }

    #[test]
    fn recipient_state_uses_snake_case() {
        let status = InstallationStatus::with_description(RecipientState::DrainingFailed, "boom");
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({ "state": "draining_failed", "description": "boom" })
        );
    }
}
