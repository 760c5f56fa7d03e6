//! Runtime plumbing: cancellation broadcast and process signals.

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_stop;
