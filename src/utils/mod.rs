//! Utils module - Utility functions and helpers

pub mod backoff;
pub mod logging;
pub mod normalize;
pub mod string;
