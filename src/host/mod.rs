//! Newline-delimited JSON host bridge for out-of-process collaborators.

pub mod channel;
pub mod contract;
pub mod handler;
pub mod stdio;
