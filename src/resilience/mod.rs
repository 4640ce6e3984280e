//! Backoff and retry ceilings.

pub mod retry;
