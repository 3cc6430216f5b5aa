//! Local model storage.

mod directory;

pub use directory::{sanitize_filename, FsModelDirectory, ModelDirectory};
