//! HTML content: template personalization and tracking injection.

pub mod render;

pub use render::{render, trackable_link_count, TrackingUrls};
