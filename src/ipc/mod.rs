mod error;
mod handlers;
mod router;
mod types;

pub use router::{drain_watch_events, handle_request};
pub use types::{AppState, Request};
