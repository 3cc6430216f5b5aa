//! JSON-RPC surface over alchemist-core.

pub mod handlers;
pub mod progress;
pub mod server;

pub use progress::ProgressBoard;
pub use server::{router, start_server, AppState};
