//! Concrete stages of the spam report pipeline.
//!
//! ```text
//! Feed → SelectUsers → SelectMessages → CheckSpam → CombineResults
//! email    User          MsgId            MsgData      "<bool> <id>"
//! ```

pub mod check_spam;
pub mod combine_results;
pub mod feed;
pub mod select_messages;
pub mod select_users;

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::pipeline::orchestrator::Pipeline;
use crate::pipeline::types::{FailureReporter, StageFailure};
use crate::service::MailService;

pub use check_spam::CheckSpam;
pub use combine_results::CombineResults;
pub use feed::Feed;
pub use select_messages::SelectMessages;
pub use select_users::SelectUsers;

/// Assemble the full report pipeline seeded with `emails`.
///
/// When `failures` is set, dropped batches and messages are reported on it.
pub fn report_pipeline<S: Into<String>>(
    service: Arc<dyn MailService>,
    config: &PipelineConfig,
    emails: impl IntoIterator<Item = S>,
    failures: Option<FailureReporter>,
) -> Result<Pipeline> {
    config.validate()?;

    let mut select_messages = SelectMessages::from_config(Arc::clone(&service), config);
    let mut check_spam = CheckSpam::from_config(Arc::clone(&service), config);
    if let Some(reporter) = failures {
        select_messages = select_messages.with_failure_reports(reporter.clone());
        check_spam = check_spam.with_failure_reports(reporter);
    }

    Ok(Pipeline::new()
        .stage(Feed::emails(emails))
        .stage(SelectUsers::new(service))
        .stage(select_messages)
        .stage(check_spam)
        .stage(CombineResults::new()))
}

/// Send `failure` on the side channel, if one is attached.
pub(crate) fn report_failure(reporter: Option<&FailureReporter>, failure: StageFailure) {
    if let Some(tx) = reporter {
        // Nobody listening is fine; the failure was already logged.
        let _ = tx.send(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, Error};
    use crate::pipeline::types::{FailureKind, MsgId};
    use crate::service::StaticMailService;

    fn service() -> Arc<dyn MailService> {
        Arc::new(
            StaticMailService::new()
                .with_user("a@x", 1)
                .with_user("b@x", 2)
                .with_messages(1, [MsgId(10), MsgId(11)])
                .with_messages(2, [MsgId(20)])
                .with_spam(MsgId(11)),
        )
    }

    #[tokio::test]
    async fn assembles_five_stages() {
        let pipeline =
            report_pipeline(service(), &PipelineConfig::default(), ["a@x"], None).unwrap();
        assert_eq!(pipeline.len(), 5);

        let run = pipeline.run().await;
        assert_eq!(run.channels, 6);
        assert_eq!(run.stages_completed, 5);
        assert_eq!(run.lines(), vec!["false 10", "true 11"]);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = PipelineConfig::default().with_max_spam_checks(0);
        let result = report_pipeline(service(), &config, Vec::<String>::new(), None);
        match result {
            Err(Error::Config(ConfigError::InvalidValue { key, .. })) => {
                assert_eq!(key, "max_spam_checks");
            }
            Err(other) => panic!("expected invalid max_spam_checks, got {other}"),
            Ok(_) => panic!("zero spam checks should be rejected"),
        }
    }

    #[test]
    fn report_failure_sends_only_when_attached() {
        let failure = StageFailure {
            stage: "check_spam".into(),
            kind: FailureKind::Classify { msg_id: MsgId(1) },
            reason: "classifier offline".into(),
        };
        report_failure(None, failure.clone());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        report_failure(Some(&tx), failure.clone());
        assert_eq!(rx.try_recv().unwrap(), failure);

        drop(rx);
        // A listener that went away is not an error.
        report_failure(Some(&tx), failure);
    }

    #[tokio::test]
    async fn failures_reach_side_channel() {
        let service: Arc<dyn MailService> = Arc::new(
            StaticMailService::new()
                .with_user("a@x", 1)
                .with_user("b@x", 2)
                .with_messages(1, [MsgId(10)])
                .with_messages(2, [MsgId(20)])
                .with_failing_message(MsgId(20)),
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let config = PipelineConfig::default().with_max_users_batch(1);

        let run = report_pipeline(service, &config, ["a@x", "b@x"], Some(tx))
            .unwrap()
            .run()
            .await;

        assert_eq!(run.lines(), vec!["false 10"]);
        let failure = rx.recv().await.unwrap();
        assert_eq!(failure.stage, "check_spam");
        assert!(rx.recv().await.is_none());
    }
}
