pub mod watcher;

pub use watcher::{BackendStatusSource, JobStatusWatcher, StatusSource, WatchState, WatchUpdate};
