//! Pure data and state for the storyboard client: image records and their ordered collection,
//! the generation session state machine, pagination, the error taxonomy shared with the backend
//! boundary, and the JSONL event log.

pub mod errors;
pub mod events;
pub mod images;
pub mod pagination;
pub mod session;
pub mod storyboards;
