mod estimator;
mod event;
mod machine;

pub use estimator::{estimate_images, split_sentences};
pub use event::SessionEvent;
pub use machine::{GenerationSession, Observation, SessionPhase, SessionStart, StartRejected};
