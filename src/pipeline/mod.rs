//! Generic staged pipeline engine.
//!
//! A run is a chain of [`Stage`]s joined by zero-capacity handoff channels:
//! 1. `channel`: `Outbox` / `Inbox`, a send completes only once taken
//! 2. `types`: the `Item` payload, domain records, the `Stage` trait
//! 3. `orchestrator`: allocates channels, drives stages, closes outputs
//!
//! Stages never close channels. Each driver owns its stage's output and
//! drops it after the stage returns, so every channel closes exactly once.

pub mod channel;
pub mod orchestrator;
pub mod types;

pub use channel::{Inbox, Outbox, handoff};
pub use orchestrator::{Pipeline, PipelineRun, run_pipeline};
pub use types::{
    FailureKind, FailureReporter, FnStage, Item, MsgData, MsgId, Stage, StageFailure, User,
    stage_fn,
};
