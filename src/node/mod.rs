//! Node runtime module
//!
//! - `poller`: Owned poll timer
//! - `runtime`: Trigger handling and per-node input loop
//! - `manager`: Lifecycle of all configured nodes

pub mod manager;
pub mod poller;
pub mod runtime;

pub use manager::NodeManager;
