//! Infrastructure layer - Storage backends and process plumbing

pub mod observability;
pub mod usage;
