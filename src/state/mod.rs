//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `TaskStatus`: The task lifecycle (pending, running, completed, failed, stopped)
//! - `DomainState`: Per-domain bookkeeping used by the domain limiter

mod domain_state;
mod task_status;

// Re-export main types
pub use domain_state::DomainState;
pub use task_status::TaskStatus;
