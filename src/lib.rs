//! Nexus extension for the Honeycomb observability API.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`client`] | Authenticated Honeycomb HTTP client |
//! | [`poller`] | Bounded query-result polling |
//! | [`verification`] | Webhook secret extraction and checking |
//! | [`lifecycle`] | Webhook recipient provisioning and teardown |
//! | [`triggers`] | Trigger subscriptions and fan-out |
//! | [`http_server`] | Inbound webhook listener |
//! | [`extension`] | JSON-RPC adapter for the host |

pub mod client;
pub mod config;
pub mod error;
pub mod extension;
pub mod http_server;
pub mod lifecycle;
pub mod poller;
pub mod store;
pub mod triggers;
pub mod types;
pub mod verification;

pub use client::ApiClient;
pub use config::{ApiCredential, Config};
pub use error::{Error, Result};
pub use extension::Extension;
pub use lifecycle::RecipientManager;
pub use poller::{PollSettings, QueryApi, QueryRunner};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use triggers::TriggerRegistry;
pub use verification::{authenticate, SecretTransport};
