//! Mirror local directory trees to and from a cloud drive.

pub mod config;
pub mod progress;
pub mod sync;

pub use sync::SyncError;
pub use sync::engine::{SyncEngine, SyncReport};
pub use sync::filter::ExtensionFilter;
