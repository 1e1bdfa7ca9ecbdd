//! Shared types for the pipeline engine.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pipeline::channel::{Inbox, Outbox};

// ── Domain records ──────────────────────────────────────────────────

/// A resolved mailbox owner.
///
/// Two users are the same individual iff their ids match, even when they
/// were resolved from different raw addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub email: String,
}

impl User {
    pub fn new(id: u64, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
        }
    }
}

/// Opaque message handle, unique per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgId(pub u64);

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MsgId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Terminal classification record for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgData {
    pub id: MsgId,
    pub has_spam: bool,
}

impl MsgData {
    /// Report ordering: non-spam first, then ascending id.
    pub fn report_key(&self) -> (bool, MsgId) {
        (self.has_spam, self.id)
    }

    /// Render as a report line: `"<bool> <id>"`.
    pub fn report_line(&self) -> String {
        format!("{} {}", self.has_spam, self.id)
    }
}

// ── Channel payload ─────────────────────────────────────────────────

/// Payload carried by every inter-stage channel.
///
/// Each stage matches the variant it expects and drops everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Email(String),
    User(User),
    MsgId(MsgId),
    MsgData(MsgData),
    Line(String),
}

impl Item {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Email(_) => "email",
            Self::User(_) => "user",
            Self::MsgId(_) => "msg_id",
            Self::MsgData(_) => "msg_data",
            Self::Line(_) => "line",
        }
    }

    pub fn email(address: impl Into<String>) -> Self {
        Self::Email(address.into())
    }

    pub fn line(text: impl Into<String>) -> Self {
        Self::Line(text.into())
    }
}

impl From<User> for Item {
    fn from(user: User) -> Self {
        Self::User(user)
    }
}

impl From<MsgId> for Item {
    fn from(id: MsgId) -> Self {
        Self::MsgId(id)
    }
}

impl From<MsgData> for Item {
    fn from(data: MsgData) -> Self {
        Self::MsgData(data)
    }
}

// ── Failure reports ─────────────────────────────────────────────────

/// Which unit of work was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// A whole message-listing batch was discarded.
    FetchBatch { user_ids: Vec<u64> },
    /// A single message was left out of the report.
    Classify { msg_id: MsgId },
}

/// Side-channel record of a dropped unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Sender half of the optional failure side channel.
pub type FailureReporter = tokio::sync::mpsc::UnboundedSender<StageFailure>;

// ── Stage trait ─────────────────────────────────────────────────────

/// One pipeline position.
///
/// A stage reads `input` until it is exhausted and emits zero or more items
/// on `output`. It never closes `output`: the driver owning the channel does
/// that after `run` returns. Any child tasks a stage spawns must be joined
/// before `run` returns.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name for logging.
    fn name(&self) -> &str;

    /// Drain `input`, emitting results on `output`.
    async fn run(&self, input: Inbox, output: &Outbox);
}

/// Adapter turning an async closure into a [`Stage`].
///
/// The closure gets its own clone of the output handle; the channel still
/// closes only once the driver drops the original.
pub struct FnStage<F> {
    name: String,
    f: F,
}

/// Wrap an async closure as a named stage.
pub fn stage_fn<F, Fut>(name: impl Into<String>, f: F) -> FnStage<F>
where
    F: Fn(Inbox, Outbox) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnStage {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> Stage for FnStage<F>
where
    F: Fn(Inbox, Outbox) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: Inbox, output: &Outbox) {
        (self.f)(input, output.clone()).await
    }
}
