//! External mail collaborators consumed by the pipeline stages.
//!
//! The stages only rely on the contracts below; lookups, listing and
//! classification are supplied by the surrounding application.

pub mod fixture;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::pipeline::types::{MsgId, User};

pub use fixture::{Fixture, StaticMailService};

/// The three operations the pipeline depends on.
#[async_trait]
pub trait MailService: Send + Sync {
    /// Map a raw address to its owner. Never fails.
    async fn resolve_user(&self, email: &str) -> User;

    /// List every message belonging to any user in `users`.
    async fn fetch_message_ids(&self, users: &[User]) -> Result<Vec<MsgId>, ServiceError>;

    /// Whether message `id` is spam.
    async fn classify_spam(&self, id: MsgId) -> Result<bool, ServiceError>;
}

/// Run a collaborator call, optionally bounded by `timeout`.
pub async fn with_deadline<T, F>(
    operation: &str,
    timeout: Option<Duration>,
    call: F,
) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    let Some(limit) = timeout else {
        return call.await;
    };
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ServiceError::Timeout {
            operation: operation.to_string(),
            timeout: limit,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_passes_through_fast_calls() {
        let fast = std::future::ready(Ok::<_, ServiceError>(true));
        let result = with_deadline("classify_spam", Some(Duration::from_secs(1)), fast).await;
        assert!(result.unwrap());
    }

    #[tokio::test]
    async fn deadline_passes_through_errors() {
        let offline = ServiceError::Unavailable {
            operation: "classify_spam".into(),
            reason: "classifier offline".into(),
        };
        let call = std::future::ready(Err(offline));
        let result: Result<bool, _> = with_deadline("classify_spam", None, call).await;
        assert!(matches!(result, Err(ServiceError::Unavailable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires_slow_calls() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ServiceError>(vec![MsgId(1)])
        };
        let limit = Some(Duration::from_millis(10));
        let result = with_deadline("fetch_message_ids", limit, slow).await;

        match result {
            Err(ServiceError::Timeout { operation, timeout }) => {
                assert_eq!(operation, "fetch_message_ids");
                assert_eq!(timeout, Duration::from_millis(10));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
