//! Sort-and-format stage.
//!
//! A barrier: every verdict is buffered until input closes, then the report is
//! emitted as `"<is_spam> <id>"` lines, clean messages first, ids ascending.
//! Like every other stage it leaves closing its output to the driver.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::pipeline::channel::{Inbox, Outbox};
use crate::pipeline::types::{Item, MsgData, Stage};

#[derive(Debug, Default)]
pub struct CombineResults;

impl CombineResults {
    pub fn new() -> Self {
        Self
    }
}

/// Order verdicts for the report.
pub fn sort_report(results: &mut [MsgData]) {
    results.sort_unstable_by_key(MsgData::report_key);
}

#[async_trait]
impl Stage for CombineResults {
    fn name(&self) -> &str {
        "combine_results"
    }

    async fn run(&self, mut input: Inbox, output: &Outbox) {
        let mut results = Vec::new();
        while let Some(item) = input.recv().await {
            match item {
                Item::MsgData(data) => results.push(data),
                other => {
                    debug!(
                        stage = self.name(),
                        item = other.label(),
                        "Ignoring unexpected item"
                    );
                }
            }
        }

        sort_report(&mut results);
        let spam = results.iter().filter(|d| d.has_spam).count();
        info!(messages = results.len(), spam, "Report ready");

        for data in &results {
            if output.emit(Item::Line(data.report_line())).await.is_err() {
                debug!(stage = self.name(), "Downstream closed, report truncated");
                break;
            }
        }
    }
}
