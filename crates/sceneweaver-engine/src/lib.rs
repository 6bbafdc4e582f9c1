//! I/O side of the storyboard client: the backend port and its HTTP and offline
//! implementations, the polling reconciler, the mutation coordinator, and the view controller
//! that ties them to one storyboard.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sceneweaver_contracts::images::ImageCollection;
use sceneweaver_contracts::session::GenerationSession;

mod backend;
mod config;
mod coordinator;
mod dryrun;
mod http;
mod reconciler;
mod view;

#[cfg(test)]
mod testing;

pub use backend::{parse_seed, PoseImage, RegenerateRequest, StoryboardBackend, StoryboardCatalog};
pub use config::ClientConfig;
pub use coordinator::{MutationCoordinator, RegenerateOutcome, ViewScope};
pub use dryrun::DryrunBackend;
pub use http::HttpBackend;
pub use reconciler::{EventSink, PollHandle, PollingReconciler, TickOutcome};
pub use view::{StoryboardView, SubmitOutcome, VisibleImage};

/// When both are held, the collection is locked before the session.
pub type SharedCollection = Arc<Mutex<ImageCollection>>;
pub type SharedSession = Arc<Mutex<GenerationSession>>;

/// Locks shared state, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
