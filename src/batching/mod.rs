//! Batching of records under provider limits.

pub mod accumulator;
