//! File handling
//!
//! - Scratch files staged for transform jobs (temp.rs)
//! - Saving the current image somewhere durable (export.rs)

pub mod export;
pub mod temp;
