//! Utility functions shared by the region and affinity layers.

pub mod alignment;
pub mod metrics;

pub use alignment::{align_down, align_up, is_aligned, page_size};
pub use metrics::{get_stats, RegionStats};
