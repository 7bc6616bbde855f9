//! Domain entities persisted by the repository layer.

mod album;
mod duration;
mod sync;

pub use album::{Album, DurationSourceTag, Track};
pub use duration::{DurationResolution, DurationSource, ReviewAction, ResolutionStatus};
pub use sync::{SyncErrorCategory, SyncLog, SyncMode, SyncProgress, SyncStatus};
