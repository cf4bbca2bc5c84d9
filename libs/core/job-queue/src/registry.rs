//! Known pipeline queues.
//!
//! Queue names are relative to the client namespace: `ideas:ready` is stored
//! under `ikon:ideas:ready` for the default `ikon` namespace.

use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Dead letter queue shared by every live queue.
pub const DEAD_LETTER_QUEUE: &str = "ideas:dead";

/// The fixed set of queues reported by `JobQueue::get_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, AsRefStr, EnumString, EnumIter, IntoStaticStr)]
pub enum KnownQueue {
    /// Researched ideas waiting for script generation.
    #[strum(serialize = "ideas:ready")]
    IdeasReady,
    /// Jobs that exhausted their attempts.
    #[strum(serialize = "ideas:dead")]
    IdeasDead,
    #[strum(serialize = "pipeline:tts")]
    PipelineTts,
    #[strum(serialize = "pipeline:render")]
    PipelineRender,
    #[strum(serialize = "pipeline:publish")]
    PipelinePublish,
    /// Inbound comments and DMs awaiting a reply.
    #[strum(serialize = "engagement:inbox")]
    EngagementInbox,
}

impl KnownQueue {
    /// Queue name relative to the namespace.
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn is_dead_letter(self) -> bool {
        self == KnownQueue::IdeasDead
    }

    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}
