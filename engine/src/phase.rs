//! Executor phase transition graph.
//!
//! The single encoding point for which phase changes an operation run may
//! make. The executor asks here instead of embedding the graph at call sites.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorPhase {
    Created,
    Recording,
    Racing,
    Finalizing,
    Done,
}

impl ExecutorPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Recording => "recording",
            Self::Racing => "racing",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for ExecutorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhaseEdge {
    BeginRecording,
    StartRace,
    ResolveRace,
    Complete,
    /// The pending record could not be created; nothing remote was touched.
    AbortBeforeRace,
}

#[must_use]
pub(crate) fn transition_edge(from: ExecutorPhase, to: ExecutorPhase) -> Option<PhaseEdge> {
    use ExecutorPhase::{Created, Done, Finalizing, Racing, Recording};

    match (from, to) {
        (Created, Recording) => Some(PhaseEdge::BeginRecording),
        (Recording, Racing) => Some(PhaseEdge::StartRace),
        (Racing, Finalizing) => Some(PhaseEdge::ResolveRace),
        (Finalizing, Done) => Some(PhaseEdge::Complete),
        (Recording, Done) => Some(PhaseEdge::AbortBeforeRace),
        _ => None,
    }
}
