//! Bounded spam-check stage.
//!
//! One task per incoming message id, but at most `max_in_flight` of them are
//! inside the classifier at once. A permit is taken right before the call and
//! released right after it, before the result is handed downstream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::pipeline::channel::{Inbox, Outbox};
use crate::pipeline::types::{
    FailureKind, FailureReporter, Item, MsgData, MsgId, Stage, StageFailure,
};
use crate::service::{MailService, with_deadline};
use crate::stages::report_failure;

const STAGE_NAME: &str = "check_spam";

pub struct CheckSpam {
    service: Arc<dyn MailService>,
    max_in_flight: usize,
    call_timeout: Option<Duration>,
    failures: Option<FailureReporter>,
}

impl CheckSpam {
    pub fn new(service: Arc<dyn MailService>, max_in_flight: usize) -> Self {
        Self {
            service,
            max_in_flight: max_in_flight.max(1),
            call_timeout: None,
            failures: None,
        }
    }

    pub fn from_config(service: Arc<dyn MailService>, config: &PipelineConfig) -> Self {
        let stage = Self::new(service, config.max_spam_checks);
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

    fn spawn_check(
        &self,
        tasks: &mut JoinSet<()>,
        permits: &Arc<Semaphore>,
        id: MsgId,
        output: &Outbox,
    ) {
        let service = Arc::clone(&self.service);
        let permits = Arc::clone(permits);
        let output = output.clone();
        let failures = self.failures.clone();
        let timeout = self.call_timeout;

        tasks.spawn(
            async move {
                let verdict = {
                    // The semaphore is never closed.
                    let Ok(_permit) = permits.acquire().await else {
                        return;
                    };
                    with_deadline("classify_spam", timeout, service.classify_spam(id)).await
                };

                match verdict {
                    Ok(has_spam) => {
                        if output.emit(MsgData { id, has_spam }).await.is_err() {
                            debug!(msg_id = %id, "Downstream closed, dropping verdict");
                        }
                    }
                    Err(e) => {
                        warn!(msg_id = %id, error = %e, "Dropping unclassified message");
                        report_failure(
                            failures.as_ref(),
                            StageFailure {
                                stage: STAGE_NAME.to_string(),
                                kind: FailureKind::Classify { msg_id: id },
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
impl Stage for CheckSpam {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    async fn run(&self, mut input: Inbox, output: &Outbox) {
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();
        let mut launched = 0usize;

        while let Some(item) = input.recv().await {
            let id = match item {
                Item::MsgId(id) => id,
                other => {
                    debug!(
                        stage = STAGE_NAME,
                        item = other.label(),
                        "Ignoring unexpected item"
                    );
                    continue;
                }
            };
            self.spawn_check(&mut tasks, &permits, id, output);
            launched += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(stage = STAGE_NAME, error = %e, "Spam check task failed");
            }
        }

        info!(
            checks = launched,
            max_in_flight = self.max_in_flight,
            "Spam checks complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;
    use crate::error::ServiceError;
    use crate::pipeline::orchestrator::Pipeline;
    use crate::pipeline::types::User;
    use crate::stages::Feed;

    /// Classifier that tracks how many calls overlap.
    struct GaugedClassifier {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        spam: HashSet<MsgId>,
        failing: HashSet<MsgId>,
    }

    impl GaugedClassifier {
        fn new() -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                spam: HashSet::new(),
                failing: HashSet::new(),
            }
        }
    }

    #[async_trait]
    impl MailService for GaugedClassifier {
        async fn resolve_user(&self, _email: &str) -> User {
            unimplemented!("not used by check_spam")
        }

        async fn fetch_message_ids(&self, _users: &[User]) -> Result<Vec<MsgId>, ServiceError> {
            unimplemented!("not used by check_spam")
        }

        async fn classify_spam(&self, id: MsgId) -> Result<bool, ServiceError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(5)).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.failing.contains(&id) {
                return Err(ServiceError::Unavailable {
                    operation: "classify_spam".into(),
                    reason: "classifier overloaded".into(),
                });
            }
            Ok(self.spam.contains(&id))
        }
    }

    fn msg_ids(ids: impl IntoIterator<Item = u64>) -> Feed {
        Feed::new(ids.into_iter().map(|id| Item::from(MsgId(id))))
    }

    fn verdicts(items: &[Item]) -> Vec<MsgData> {
        let mut data: Vec<MsgData> = items
            .iter()
            .filter_map(|item| match item {
                Item::MsgData(data) => Some(*data),
                _ => None,
            })
            .collect();
        data.sort_by_key(|d| d.id);
        data
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_more_than_k_calls_in_flight() {
        let classifier = Arc::new(GaugedClassifier::new());
        let run = Pipeline::new()
            .stage(msg_ids(0..100))
            .stage(CheckSpam::new(classifier.clone(), 2))
            .run()
            .await;

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 100);
        assert!(classifier.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(verdicts(&run.output).len(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn calls_overlap_up_to_the_limit() {
        let classifier = Arc::new(GaugedClassifier::new());
        Pipeline::new()
            .stage(msg_ids(0..50))
            .stage(CheckSpam::new(classifier.clone(), 4))
            .run()
            .await;

        let peak = classifier.peak.load(Ordering::SeqCst);
        assert!(peak >= 2, "expected overlapping calls, peak was {peak}");
        assert!(peak <= 4);
    }

    #[tokio::test]
    async fn each_message_classified_once() {
        let mut classifier = GaugedClassifier::new();
        classifier.spam.insert(MsgId(2));
        let classifier = Arc::new(classifier);

        let run = Pipeline::new()
            .stage(msg_ids([1, 2, 3]))
            .stage(CheckSpam::new(classifier, 5))
            .run()
            .await;

        assert_eq!(
            verdicts(&run.output),
            vec![
                MsgData {
                    id: MsgId(1),
                    has_spam: false,
                },
                MsgData {
                    id: MsgId(2),
                    has_spam: true,
                },
                MsgData {
                    id: MsgId(3),
                    has_spam: false,
                },
            ]
        );
    }

    #[tokio::test]
    async fn failed_classification_dropped_and_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut classifier = GaugedClassifier::new();
        classifier.failing.insert(MsgId(2));
        let classifier = Arc::new(classifier);

        let run = Pipeline::new()
            .stage(msg_ids([1, 2, 3]))
            .stage(CheckSpam::new(classifier, 2).with_failure_reports(tx))
            .run()
            .await;

        let ids: Vec<MsgId> = verdicts(&run.output).iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![MsgId(1), MsgId(3)]);

        let failure = rx.recv().await.unwrap();
        assert_eq!(failure.kind, FailureKind::Classify { msg_id: MsgId(2) });
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn non_msg_id_items_ignored() {
        let classifier = Arc::new(GaugedClassifier::new());
        let run = Pipeline::new()
            .stage(Feed::new([
                Item::email("a@x"),
                Item::from(MsgId(7)),
                Item::from(User::new(1, "a@x")),
            ]))
            .stage(CheckSpam::new(classifier.clone(), 2))
            .run()
            .await;

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(verdicts(&run.output).len(), 1);
    }

    #[tokio::test]
    async fn empty_input_closes_output() {
        let classifier = Arc::new(GaugedClassifier::new());
        let run = Pipeline::new()
            .stage(Feed::new([]))
            .stage(CheckSpam::new(classifier.clone(), 2))
            .run()
            .await;
        assert!(run.output.is_empty());
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }
}
