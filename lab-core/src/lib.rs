//! Foundation types for the workshop lab provisioner.

pub mod error;
pub mod output_macros;
pub mod poll;

pub use error::{LabError, Result};
pub use poll::{poll_until, PollPolicy, PollStatus};
