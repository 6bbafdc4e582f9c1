use serde::Serialize;

/// Progress notifications sent from the session worker to whoever owns the view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Started {
        session_id: String,
        baseline_count: usize,
        expected_new: usize,
    },
    Dispatched {
        session_id: String,
    },
    ProgressChanged {
        session_id: String,
        observed_new: usize,
        expected_new: usize,
        fraction: f64,
    },
    PollFailed {
        session_id: String,
        consecutive_failures: u32,
        message: String,
    },
    Completed {
        session_id: String,
        observed_new: usize,
        expected_new: usize,
    },
    Failed {
        session_id: String,
        message: String,
    },
    Cancelled {
        session_id: String,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Started { session_id, .. }
            | Self::Dispatched { session_id }
            | Self::ProgressChanged { session_id, .. }
            | Self::PollFailed { session_id, .. }
            | Self::Completed { session_id, .. }
            | Self::Failed { session_id, .. }
            | Self::Cancelled { session_id } => session_id,
        }
    }

    /// True for the events after which the session is back to idle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}
