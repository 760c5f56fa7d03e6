//! Infrastructure adapters for the collaborator interfaces.

pub mod sink;

pub use sink::InMemorySink;
