use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use super::estimator::estimate_images;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Estimating,
    Dispatching,
    Polling,
    Completing,
    Failed,
}

impl SessionPhase {
    /// A session in one of these phases blocks a new submit.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Estimating | Self::Dispatching | Self::Polling | Self::Completing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Estimating => "estimating",
            Self::Dispatching => "dispatching",
            Self::Polling => "polling",
            Self::Completing => "completing",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub session_id: String,
    pub baseline_count: usize,
    pub expected_new: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartRejected {
    EmptyText,
    AlreadyActive(SessionPhase),
    TooManySentences { expected: usize, limit: usize },
}

impl fmt::Display for StartRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyText => write!(f, "Story text cannot be empty."),
            Self::AlreadyActive(phase) => {
                write!(f, "A generation is already running ({phase}).")
            }
            Self::TooManySentences { expected, limit } => write!(
                f,
                "Story has {expected} sentences; at most {limit} images can be generated at once."
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// The session is not polling; the tick must not touch anything.
    Inactive,
    Unchanged {
        observed_new: usize,
    },
    Progressed {
        observed_new: usize,
        expected_new: usize,
        fraction: f64,
    },
    Completed {
        observed_new: usize,
        expected_new: usize,
    },
}

/// One submit-to-completion cycle.
///
/// Transitions:
/// `Idle → Estimating → Dispatching` on [`begin`](Self::begin),
/// `Dispatching → Polling` on [`dispatch_accepted`](Self::dispatch_accepted),
/// `Polling → Completing` from [`observe`](Self::observe) once enough new records exist,
/// `Completing → Idle` on [`finish`](Self::finish),
/// `* → Failed` on [`fail`](Self::fail) and `Failed → Idle` on [`settle`](Self::settle).
///
/// Completion is size based: it fires once `size - baseline >= expected`, whichever records
/// caused the growth.
#[derive(Debug, Clone, Default)]
pub struct GenerationSession {
    phase: SessionPhase,
    session_id: Option<String>,
    baseline_count: usize,
    expected_new: usize,
    observed_new: usize,
    sentence_limit: Option<usize>,
    last_error: Option<String>,
}

impl GenerationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sentence_limit(limit: Option<usize>) -> Self {
        Self {
            sentence_limit: limit.filter(|value| *value > 0),
            ..Self::default()
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn baseline_count(&self) -> usize {
        self.baseline_count
    }

    pub fn expected_new(&self) -> usize {
        self.expected_new
    }

    pub fn observed_new(&self) -> usize {
        self.observed_new
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    pub fn is_polling(&self) -> bool {
        self.phase == SessionPhase::Polling
    }

    pub fn progress_fraction(&self) -> f64 {
        if self.expected_new == 0 {
            return 0.0;
        }
        (self.observed_new as f64 / self.expected_new as f64).clamp(0.0, 1.0)
    }

    pub fn begin(
        &mut self,
        text: &str,
        collection_size: usize,
    ) -> Result<SessionStart, StartRejected> {
        if self.phase.is_active() {
            return Err(StartRejected::AlreadyActive(self.phase));
        }
        if text.trim().is_empty() {
            return Err(StartRejected::EmptyText);
        }
        let expected_new = estimate_images(text);
        if let Some(limit) = self.sentence_limit {
            if expected_new > limit {
                return Err(StartRejected::TooManySentences {
                    expected: expected_new,
                    limit,
                });
            }
        }

        self.phase = SessionPhase::Estimating;
        let session_id = Uuid::new_v4().to_string();
        self.session_id = Some(session_id.clone());
        self.expected_new = expected_new;
        self.baseline_count = collection_size;
        self.observed_new = 0;
        self.last_error = None;
        self.phase = SessionPhase::Dispatching;

        Ok(SessionStart {
            session_id,
            baseline_count: collection_size,
            expected_new,
        })
    }

    pub fn dispatch_accepted(&mut self) -> bool {
        if self.phase != SessionPhase::Dispatching {
            return false;
        }
        self.phase = SessionPhase::Polling;
        true
    }

    pub fn observe(&mut self, collection_size: usize) -> Observation {
        if self.phase != SessionPhase::Polling {
            return Observation::Inactive;
        }
        let observed_new = collection_size.saturating_sub(self.baseline_count);
        let previous = self.observed_new;
        self.observed_new = observed_new;

        if self.expected_new > 0 && observed_new >= self.expected_new {
            self.phase = SessionPhase::Completing;
            return Observation::Completed {
                observed_new,
                expected_new: self.expected_new,
            };
        }
        if observed_new > previous {
            return Observation::Progressed {
                observed_new,
                expected_new: self.expected_new,
                fraction: self.progress_fraction(),
            };
        }
        Observation::Unchanged { observed_new }
    }

    pub fn finish(&mut self) -> bool {
        if self.phase != SessionPhase::Completing {
            return false;
        }
        self.phase = SessionPhase::Idle;
        true
    }

    /// Marks the session failed. Returns `false` when there was nothing running to fail.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.phase.is_active() {
            return false;
        }
        self.phase = SessionPhase::Failed;
        self.last_error = Some(message.into());
        true
    }

    /// Returns a failed session to idle; the error stays readable through `last_error`.
    pub fn settle(&mut self) {
        if self.phase == SessionPhase::Failed {
            self.phase = SessionPhase::Idle;
        }
    }

    /// Abandons the running session. Returns its id when something was cancelled.
    pub fn cancel(&mut self) -> Option<String> {
        if !self.phase.is_active() {
            return None;
        }
        self.phase = SessionPhase::Idle;
        self.session_id.clone()
    }

    /// A confirmed user deletion shrinks the collection; lower the baseline so it does not hide
    /// frames generated meanwhile.
    pub fn note_local_removal(&mut self) {
        if matches!(
            self.phase,
            SessionPhase::Dispatching | SessionPhase::Polling
        ) {
            self.baseline_count = self.baseline_count.saturating_sub(1);
        }
    }
}
