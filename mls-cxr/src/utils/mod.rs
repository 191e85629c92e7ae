//! Utility modules for mls-cxr

pub mod boundary;
pub mod db_retry;

pub use boundary::{guarded, timed};
pub use db_retry::retry_on_lock;
