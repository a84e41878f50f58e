use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::{PendingEvent, TriggerPayload, TriggerSubscription};

/// Event type published to the host for every matched trigger delivery.
pub const TRIGGER_EVENT_TYPE: &str = "honeycomb.trigger";

/// Live trigger subscriptions, shared between the RPC loop and the
/// webhook listener.
#[derive(Clone, Default)]
pub struct TriggerRegistry {
    subscriptions: Arc<RwLock<HashMap<String, TriggerSubscription>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, trigger_id: Option<String>) -> TriggerSubscription {
        let sub = TriggerSubscription {
            id: format!("sub_{}", &Uuid::new_v4().simple().to_string()[..12]),
            trigger_id: trigger_id.filter(|t| !t.is_empty()),
            created_at: Utc::now(),
        };
        self.subscriptions
            .write()
            .await
            .insert(sub.id.clone(), sub.clone());
        sub
    }

    pub async fn unsubscribe(&self, id: &str) -> bool {
        self.subscriptions.write().await.remove(id).is_some()
    }

    pub async fn list(&self) -> Vec<TriggerSubscription> {
        let mut items: Vec<TriggerSubscription> =
            self.subscriptions.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }

    /// Every subscription the payload satisfies, each evaluated independently.
    pub async fn matching(&self, payload: &TriggerPayload) -> Vec<TriggerSubscription> {
        let mut matched: Vec<TriggerSubscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|sub| sub.matches(payload))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matched
    }
}

/// One host event per matched subscription.
pub fn fan_out(matched: &[TriggerSubscription], payload: &TriggerPayload) -> Vec<PendingEvent> {
    let data = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
    matched
        .iter()
        .map(|sub| PendingEvent {
            event_type: TRIGGER_EVENT_TYPE.to_string(),
            subject: sub.id.clone(),
            data: data.clone(),
        })
        .collect()
}
