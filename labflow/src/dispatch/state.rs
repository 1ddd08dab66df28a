//! Dispatch state machine.

use std::fmt;
use std::time::Duration;

/// Lifecycle of one dispatched run as observed by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    /// Baseline not yet taken.
    NotStarted,
    /// Trigger sent; waiting for the run count to grow past `baseline`.
    Dispatched {
        /// Runs listed before the trigger.
        baseline: u64,
    },
    /// The run was identified; only it is polled from now on.
    Pinned {
        /// Pinned run identifier.
        run_id: u64,
    },
    /// The remote system reported a terminal status.
    Completed {
        /// Pinned run identifier.
        run_id: u64,
        /// Conclusion string as reported.
        conclusion: String,
    },
    /// We stopped watching before a terminal status was observed.
    PollTimeout {
        /// Pinned run, if any.
        run_id: Option<u64>,
        /// Time spent polling.
        waited: Duration,
    },
}

impl DispatchState {
    /// Returns true for states that end the poll loop.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::PollTimeout { .. })
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Dispatched { baseline } => write!(f, "dispatched(baseline={baseline})"),
            Self::Pinned { run_id } => write!(f, "pinned({run_id})"),
            Self::Completed { run_id, conclusion } => write!(f, "completed({run_id}, {conclusion})"),
            Self::PollTimeout { run_id, waited } => match run_id {
                Some(id) => write!(f, "poll_timeout({id}, {waited:?})"),
                None => write!(f, "poll_timeout(unpinned, {waited:?})"),
            },
        }
    }
}
