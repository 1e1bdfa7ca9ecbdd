//! Message batch-fetch stage.
//!
//! Users are grouped into batches of at most `max_users_batch`. Each full
//! batch is listed on its own task while intake continues; the remainder is
//! dispatched once input closes. There is no cap on batches in flight. A
//! failed listing drops the whole batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::pipeline::channel::{Inbox, Outbox};
use crate::pipeline::types::{FailureKind, FailureReporter, Item, Stage, StageFailure, User};
use crate::service::{MailService, with_deadline};
use crate::stages::report_failure;

const STAGE_NAME: &str = "select_messages";

pub struct SelectMessages {
    service: Arc<dyn MailService>,
    max_users_batch: usize,
    call_timeout: Option<Duration>,
    failures: Option<FailureReporter>,
}

impl SelectMessages {
    pub fn new(service: Arc<dyn MailService>, max_users_batch: usize) -> Self {
        Self {
            service,
            max_users_batch: max_users_batch.max(1),
            call_timeout: None,
            failures: None,
        }
    }

    pub fn from_config(service: Arc<dyn MailService>, config: &PipelineConfig) -> Self {
        let stage = Self::new(service, config.max_users_batch);
        match config.call_timeout {
            Some(timeout) => stage.with_call_timeout(timeout),
            None => stage,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_failure_reports(mut self, reporter: FailureReporter) -> Self {
        self.failures = Some(reporter);
        self
    }

    /// List `batch` on a new task and forward its message ids.
    fn dispatch(&self, tasks: &mut JoinSet<()>, batch: Vec<User>, output: &Outbox) {
        let service = Arc::clone(&self.service);
        let output = output.clone();
        let failures = self.failures.clone();
        let timeout = self.call_timeout;

        tasks.spawn(
            async move {
                let listed = with_deadline(
                    "fetch_message_ids",
                    timeout,
                    service.fetch_message_ids(&batch),
                )
                .await;

                match listed {
                    Ok(ids) => {
                        debug!(
                            batch_size = batch.len(),
                            messages = ids.len(),
                            "Batch listed"
                        );
                        for id in ids {
                            if output.emit(id).await.is_err() {
                                debug!("Downstream closed, abandoning batch");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(batch_size = batch.len(), error = %e, "Dropping message batch");
                        report_failure(
                            failures.as_ref(),
                            StageFailure {
                                stage: STAGE_NAME.to_string(),
                                kind: FailureKind::FetchBatch {
                                    user_ids: batch.iter().map(|u| u.id).collect(),
                                },
                                reason: e.to_string(),
                            },
                        );
                    }
                }
            }
            .in_current_span(),
        );
    }
}

#[async_trait]
impl Stage for SelectMessages {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    async fn run(&self, mut input: Inbox, output: &Outbox) {
        let mut tasks = JoinSet::new();
        let mut batch = Vec::with_capacity(self.max_users_batch);
        let mut dispatched = 0usize;

        while let Some(item) = input.recv().await {
            let user = match item {
                Item::User(user) => user,
                other => {
                    debug!(
                        stage = STAGE_NAME,
                        item = other.label(),
                        "Ignoring unexpected item"
                    );
                    continue;
                }
            };

            batch.push(user);
            if batch.len() == self.max_users_batch {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(self.max_users_batch));
                self.dispatch(&mut tasks, full, output);
                dispatched += 1;
            }
        }

        if !batch.is_empty() {
            self.dispatch(&mut tasks, batch, output);
            dispatched += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(stage = STAGE_NAME, error = %e, "Batch task failed");
            }
        }

        info!(batches = dispatched, "Message selection complete");
    }
}
