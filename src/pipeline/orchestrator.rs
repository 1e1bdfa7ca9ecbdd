//! Pipeline orchestrator: wires stages into a chain of handoff channels.
//!
//! For `n` stages the orchestrator allocates `n + 1` channels `c0..=cn`,
//! runs stage `i` on `(ci, ci+1)`, closes `c0` straight away, and drains
//! `cn` itself. Every driver owns the sending half of its output channel and
//! drops it once the stage returns, so each channel closes exactly once.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::pipeline::channel::handoff;
use crate::pipeline::types::{Item, Stage};

/// Outcome of a pipeline run.
#[derive(Debug, Default)]
pub struct PipelineRun {
    /// Identifier attached to the run's tracing span.
    pub run_id: Option<Uuid>,
    /// Channels allocated (`stages + 1`, or 0 for an empty pipeline).
    pub channels: usize,
    /// Drivers whose stage returned normally.
    pub stages_completed: usize,
    /// Drivers whose stage panicked. Their output was closed regardless.
    pub failed_stages: Vec<PipelineError>,
    /// Items that reached the terminal channel, in arrival order.
    pub output: Vec<Item>,
}

impl PipelineRun {
    /// Terminal items that are report lines.
    pub fn lines(&self) -> Vec<&str> {
        self.output
            .iter()
            .filter_map(|item| match item {
                Item::Line(line) => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Ordered list of stages to run.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage to completion.
    pub async fn run(self) -> PipelineRun {
        run_pipeline(self.stages).await
    }
}

/// Run `stages` as a chain and wait for all of them.
///
/// Returns immediately for an empty list.
pub async fn run_pipeline(stages: Vec<Arc<dyn Stage>>) -> PipelineRun {
    if stages.is_empty() {
        return PipelineRun::default();
    }

    let run_id = Uuid::new_v4();
    let span = info_span!("pipeline", run_id = %run_id);
    let stage_count = stages.len();

    let (outboxes, inboxes): (Vec<_>, Vec<_>) = (0..=stage_count).map(|_| handoff()).unzip();
    let channels = inboxes.len();

    // No external producer: c0 is closed before any stage starts.
    let mut outboxes = outboxes.into_iter();
    drop(outboxes.next());
    let mut inboxes = inboxes.into_iter();

    span.in_scope(|| info!(stages = stage_count, channels, "Pipeline started"));

    let mut names = Vec::with_capacity(stage_count);
    let mut drivers = Vec::with_capacity(stage_count);
    let wiring = stages.into_iter().zip(inboxes.by_ref().zip(outboxes));
    for (i, (stage, (input, output))) in wiring.enumerate() {
        let name = stage.name().to_string();
        names.push(name.clone());

        drivers.push(tokio::spawn(
            async move {
                debug!(stage = %name, position = i, "Stage started");
                stage.run(input, &output).await;
                drop(output);
                debug!(stage = %name, position = i, "Stage drained, output closed");
            }
            .instrument(span.clone()),
        ));
    }

    // Drain cn so a final stage that emits never blocks.
    let drain_span = span.clone();
    let terminal = inboxes
        .next()
        .map(|inbox| tokio::spawn(inbox.collect().instrument(drain_span)));

    let mut run = PipelineRun {
        run_id: Some(run_id),
        channels,
        ..Default::default()
    };

    for (name, result) in names.into_iter().zip(join_all(drivers).await) {
        match result {
            Ok(()) => run.stages_completed += 1,
            Err(e) => {
                span.in_scope(|| error!(stage = %name, error = %e, "Stage driver failed"));
                run.failed_stages.push(PipelineError::StagePanicked {
                    stage: name,
                    reason: e.to_string(),
                });
            }
        }
    }

    if let Some(terminal) = terminal {
        match terminal.await {
            Ok(items) => run.output = items,
            Err(e) => span.in_scope(|| error!(error = %e, "Terminal drain failed")),
        }
    }

    span.in_scope(|| {
        info!(
            completed = run.stages_completed,
            failed = run.failed_stages.len(),
            output = run.output.len(),
            "Pipeline finished"
        )
    });

    run
}
