//! API route modules.

pub mod summary;
