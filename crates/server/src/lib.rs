#![allow(clippy::collapsible_if)]
pub mod advertise;
pub mod coordinator;
pub mod error;
pub mod publisher;
pub mod streaming;
