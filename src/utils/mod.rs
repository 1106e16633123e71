//! Common utilities

pub mod retry;
