//! Provisioning and teardown of this installation's Honeycomb webhook recipient.
//!
//! Upstream calls and local state writes are not transactional: if the
//! process dies after `POST /1/recipients` succeeds but before the returned
//! id is stored, the upstream recipient is orphaned. A later install will
//! create a fresh one. [`RecipientManager::find_orphaned_recipients`]
//! reports such leftovers; it never deletes them.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::store::{KeyValueStore, WEBHOOK_RECIPIENT_ID_KEY, WEBHOOK_SECRET_KEY};
use crate::types::{
    InstallationStatus, NewWebhookRecipient, Recipient, RecipientState, WebhookRecipient,
};
use crate::verification::{generate_secret, SecretTransport};

/// Prefix of every recipient name this extension creates.
pub const RECIPIENT_NAME_PREFIX: &str = "nexus-honeycomb-";

pub struct RecipientManager {
    client: ApiClient,
    store: Arc<dyn KeyValueStore>,
    /// Webhook endpoint Honeycomb should call, without the secret.
    callback_endpoint: String,
    transport: SecretTransport,
    status: RwLock<InstallationStatus>,
}

impl RecipientManager {
    pub fn new(
        client: ApiClient,
        store: Arc<dyn KeyValueStore>,
        callback_endpoint: impl Into<String>,
        transport: SecretTransport,
    ) -> Self {
        Self {
            client,
            store,
            callback_endpoint: callback_endpoint.into(),
            transport,
            status: RwLock::new(InstallationStatus::new(RecipientState::Absent)),
        }
    }

    /// Current installation state. Before any transition in this process,
    /// a recipient persisted by an earlier run reports as `ready`.
    pub async fn status(&self) -> InstallationStatus {
        let current = self.status.read().await.clone();
        if current.state != RecipientState::Absent {
            return current;
        }
        match self.current_recipient().await {
            Ok(Some(_)) => InstallationStatus::new(RecipientState::Ready),
            Ok(None) => current,
            Err(e) => {
                warn!(error = %e, "Could not read stored recipient");
                current
            }
        }
    }

    async fn transition(&self, status: InstallationStatus) -> InstallationStatus {
        *self.status.write().await = status.clone();
        status
    }

    /// Verify the credential and make sure exactly one recipient exists.
    /// Safe to call repeatedly: once an id is stored no new recipient is
    /// created. Errors end in `failed` and nothing is rolled back.
    #[instrument(skip(self))]
    pub async fn install(&self) -> InstallationStatus {
        self.transition(InstallationStatus::new(RecipientState::Provisioning))
            .await;

        match self.provision().await {
            Ok(recipient_id) => {
                info!(%recipient_id, "Webhook recipient ready");
                self.transition(InstallationStatus::new(RecipientState::Ready))
                    .await
            }
            Err(e) => {
                error!(error = %e, "Webhook recipient provisioning failed");
                self.transition(InstallationStatus::with_description(
                    RecipientState::Failed,
                    e.to_string(),
                ))
                .await
            }
        }
    }

    async fn provision(&self) -> Result<String> {
        self.client.check_auth().await?;

        if let Some(existing) = self.store.get(WEBHOOK_RECIPIENT_ID_KEY).await? {
            if self.store.get(WEBHOOK_SECRET_KEY).await?.is_none() {
                return Err(Error::Storage(format!(
                    "recipient {existing} has no stored webhook secret; uninstall and install again"
                )));
            }
            info!(recipient_id = %existing, "Recipient already provisioned");
            return Ok(existing);
        }

        let secret = generate_secret();
        self.store.set(WEBHOOK_SECRET_KEY, &secret).await?;

        let name = format!("{RECIPIENT_NAME_PREFIX}{}", Uuid::new_v4());
        let url = self.transport.callback_url(&self.callback_endpoint, &secret);
        let recipient_id = self
            .client
            .create_webhook_recipient(&NewWebhookRecipient::webhook(name, url, secret))
            .await?;

        self.store
            .set(WEBHOOK_RECIPIENT_ID_KEY, &recipient_id)
            .await?;
        Ok(recipient_id)
    }

    /// Delete the upstream recipient and forget it locally. A 404 counts as
    /// already deleted; any other failure leaves stored state untouched so
    /// the next uninstall can resume.
    #[instrument(skip(self))]
    pub async fn uninstall(&self) -> InstallationStatus {
        self.transition(InstallationStatus::new(RecipientState::Draining))
            .await;

        match self.drain().await {
            Ok(()) => {
                info!("Webhook recipient removed");
                self.transition(InstallationStatus::new(RecipientState::Drained))
                    .await
            }
            Err(e) => {
                error!(error = %e, "Webhook recipient removal failed");
                self.transition(InstallationStatus::with_description(
                    RecipientState::DrainingFailed,
                    e.to_string(),
                ))
                .await
            }
        }
    }

    async fn drain(&self) -> Result<()> {
        let Some(recipient_id) = self.store.get(WEBHOOK_RECIPIENT_ID_KEY).await? else {
            return Ok(());
        };

        match self.client.delete_recipient(&recipient_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!(%recipient_id, "Recipient already gone upstream");
            }
            Err(e) => return Err(e),
        }

        self.store.delete(WEBHOOK_RECIPIENT_ID_KEY).await?;
        self.store.delete(WEBHOOK_SECRET_KEY).await?;
        Ok(())
    }

    /// The recipient currently stored for this installation, if complete.
    pub async fn current_recipient(&self) -> Result<Option<WebhookRecipient>> {
        let id = self.store.get(WEBHOOK_RECIPIENT_ID_KEY).await?;
        let secret = self.store.get(WEBHOOK_SECRET_KEY).await?;
        Ok(id.zip(secret).map(|(id, secret)| WebhookRecipient { id, secret }))
    }

    /// Upstream webhook recipients created by this extension that are not
    /// the one stored for this installation.
    pub async fn find_orphaned_recipients(&self) -> Result<Vec<Recipient>> {
        let stored = self.store.get(WEBHOOK_RECIPIENT_ID_KEY).await?;
        let recipients = self.client.list_recipients().await?;
        Ok(recipients
            .into_iter()
            .filter(|r| r.kind == "webhook")
            .filter(|r| {
                r.webhook_name()
                    .is_some_and(|name| name.starts_with(RECIPIENT_NAME_PREFIX))
            })
            .filter(|r| stored.as_deref() != Some(r.id.as_str()))
            .collect())
    }
}
