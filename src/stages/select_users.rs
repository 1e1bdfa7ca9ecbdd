//! User deduplication stage.
//!
//! Resolves each raw address to its owner, one lookup at a time, and forwards
//! each user id only the first time it appears.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::pipeline::channel::{Inbox, Outbox};
use crate::pipeline::types::{Item, Stage};
use crate::service::MailService;

pub struct SelectUsers {
    service: Arc<dyn MailService>,
}

impl SelectUsers {
    pub fn new(service: Arc<dyn MailService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Stage for SelectUsers {
    fn name(&self) -> &str {
        "select_users"
    }

    async fn run(&self, mut input: Inbox, output: &Outbox) {
        // Scoped to this run; only this driver touches it.
        let mut seen: HashSet<u64> = HashSet::new();
        let mut resolved = 0usize;

        while let Some(item) = input.recv().await {
            let email = match item {
                Item::Email(email) => email,
                other => {
                    debug!(
                        stage = self.name(),
                        item = other.label(),
                        "Ignoring unexpected item"
                    );
                    continue;
                }
            };

            let user = self.service.resolve_user(&email).await;
            resolved += 1;
            if !seen.insert(user.id) {
                debug!(user_id = user.id, email = %email, "Duplicate user dropped");
                continue;
            }

            if output.emit(user).await.is_err() {
                debug!(stage = self.name(), "Downstream closed, draining input");
            }
        }

        info!(resolved, unique = seen.len(), "User selection complete");
    }
}
