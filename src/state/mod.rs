//! State management module
//!
//! This module holds the editing state:
//! - Shared data structures (data.rs)
//! - The undo history stack (history.rs)
//! - Transform jobs and their lifecycle (job.rs)

pub mod data;
pub mod history;
pub mod job;
