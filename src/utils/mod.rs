// Utility functions

pub mod backoff;
pub mod logger;

pub use backoff::*;
pub use logger::*;
