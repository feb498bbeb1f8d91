pub mod metadata;
pub mod tracker;

pub use metadata::{extract_metadata, is_delegation, TaskMetadata};
pub use tracker::{MonitorUpdate, TaskMonitor, SUMMARY_MAX_LEN};
