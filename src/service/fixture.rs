//! In-memory mail directory backing the `spam-report` binary and tests.
//!
//! A [`Fixture`] is plain JSON:
//!
//! ```json
//! {
//!   "users": { "a@x": 1, "b@x": 2 },
//!   "messages": { "1": [10, 11], "2": [20] },
//!   "spam": [11],
//!   "emails": ["a@x", "b@x", "a@x"]
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ServiceError};
use crate::pipeline::types::{MsgId, User};
use crate::service::MailService;

/// Serializable description of a mail directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    /// Address → user id. Several addresses may share an id.
    pub users: HashMap<String, u64>,
    /// User id → message ids.
    pub messages: HashMap<u64, Vec<MsgId>>,
    /// Messages classified as spam.
    pub spam: Vec<MsgId>,
    /// Listing fails for any batch containing one of these users.
    pub failing_users: Vec<u64>,
    /// Classification fails for these messages.
    pub failing_messages: Vec<MsgId>,
    /// Simulated per-call latency.
    pub latency_ms: Option<u64>,
    /// Addresses to feed into the pipeline.
    pub emails: Vec<String>,
}

impl Fixture {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

/// Deterministic [`MailService`] over fixed tables.
#[derive(Debug, Clone, Default)]
pub struct StaticMailService {
    users: HashMap<String, u64>,
    messages: HashMap<u64, Vec<MsgId>>,
    spam: HashSet<MsgId>,
    failing_users: HashSet<u64>,
    failing_messages: HashSet<MsgId>,
    latency: Option<Duration>,
}

impl StaticMailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: &Fixture) -> Self {
        let mut service = Self::new();
        for (email, id) in &fixture.users {
            service = service.with_user(email, *id);
        }
        for (user_id, ids) in &fixture.messages {
            service = service.with_messages(*user_id, ids.iter().copied());
        }
        service.spam.extend(fixture.spam.iter().copied());
        service
            .failing_users
            .extend(fixture.failing_users.iter().copied());
        service
            .failing_messages
            .extend(fixture.failing_messages.iter().copied());
        service.latency = fixture.latency_ms.map(Duration::from_millis);
        service
    }

    pub fn with_user(mut self, email: &str, id: u64) -> Self {
        self.users.insert(normalize(email), id);
        self
    }

    pub fn with_messages(mut self, user_id: u64, ids: impl IntoIterator<Item = MsgId>) -> Self {
        self.messages.entry(user_id).or_default().extend(ids);
        self
    }

    pub fn with_spam(mut self, id: MsgId) -> Self {
        self.spam.insert(id);
        self
    }

    pub fn with_failing_user(mut self, user_id: u64) -> Self {
        self.failing_users.insert(user_id);
        self
    }

    pub fn with_failing_message(mut self, id: MsgId) -> Self {
        self.failing_messages.insert(id);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    async fn simulate_latency(&self) {
        let Some(base) = self.latency else {
            return;
        };
        let jitter_ms = {
            let max = (base.as_millis() / 2) as u64;
            rand::thread_rng().gen_range(0..=max)
        };
        tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
    }
}

/// Lower-cased, trimmed address used as the directory key.
fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Stable id for addresses missing from the directory (FNV-1a).
fn derived_user_id(email: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in email.bytes() {
        hash = (hash ^ u64::from(byte)).wrapping_mul(PRIME);
    }
    hash
}

#[async_trait]
impl MailService for StaticMailService {
    async fn resolve_user(&self, email: &str) -> User {
        self.simulate_latency().await;
        let key = normalize(email);
        let id = match self.users.get(&key) {
            Some(id) => *id,
            None => {
                debug!(email, "Address not in directory, deriving user id");
                derived_user_id(&key)
            }
        };
        User::new(id, email)
    }

    async fn fetch_message_ids(&self, users: &[User]) -> Result<Vec<MsgId>, ServiceError> {
        self.simulate_latency().await;
        if let Some(user) = users.iter().find(|u| self.failing_users.contains(&u.id)) {
            return Err(ServiceError::Unavailable {
                operation: "fetch_message_ids".into(),
                reason: format!("mailbox of user {} unreachable", user.id),
            });
        }
        Ok(users
            .iter()
            .filter_map(|u| self.messages.get(&u.id))
            .flatten()
            .copied()
            .collect())
    }

    async fn classify_spam(&self, id: MsgId) -> Result<bool, ServiceError> {
        self.simulate_latency().await;
        if self.failing_messages.contains(&id) {
            return Err(ServiceError::Unavailable {
                operation: "classify_spam".into(),
                reason: format!("classifier rejected message {id}"),
            });
        }
        Ok(self.spam.contains(&id))
    }
}
