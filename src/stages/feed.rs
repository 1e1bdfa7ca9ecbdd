//! Seed stage standing in for an external producer at the head of a run.

use async_trait::async_trait;
use tracing::debug;

use crate::pipeline::channel::{Inbox, Outbox};
use crate::pipeline::types::{Item, Stage};

/// Emits a fixed list of items, then forwards whatever arrives on its input.
pub struct Feed {
    items: Vec<Item>,
}

impl Feed {
    pub fn new(items: impl IntoIterator<Item = Item>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    /// Seed a run with raw addresses.
    pub fn emails<S: Into<String>>(emails: impl IntoIterator<Item = S>) -> Self {
        Self::new(emails.into_iter().map(Item::email))
    }
}

#[async_trait]
impl Stage for Feed {
    fn name(&self) -> &str {
        "feed"
    }

    async fn run(&self, mut input: Inbox, output: &Outbox) {
        let mut open = true;
        for item in &self.items {
            if output.emit(item.clone()).await.is_err() {
                debug!("Feed receiver gone, dropping remaining seeds");
                open = false;
                break;
            }
        }

        while let Some(item) = input.recv().await {
            if open && output.emit(item).await.is_err() {
                open = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::orchestrator::Pipeline;
    use crate::pipeline::types::MsgId;

    #[tokio::test]
    async fn emits_seeds_in_order() {
        let run = Pipeline::new()
            .stage(Feed::emails(["a@x", "b@x"]))
            .run()
            .await;
        assert_eq!(run.output, vec![Item::email("a@x"), Item::email("b@x")]);
    }

    #[tokio::test]
    async fn forwards_upstream_items_after_seeds() {
        let run = Pipeline::new()
            .stage(Feed::new([Item::from(MsgId(1))]))
            .stage(Feed::new([Item::from(MsgId(2))]))
            .run()
            .await;
        assert_eq!(
            run.output,
            vec![Item::MsgId(MsgId(2)), Item::MsgId(MsgId(1))]
        );
    }

    #[tokio::test]
    async fn empty_feed_closes_promptly() {
        let run = Pipeline::new().stage(Feed::new([])).run().await;
        assert_eq!(run.stages_completed, 1);
        assert!(run.output.is_empty());
    }
}
