//! Utility functions for ryt-resolve

pub mod cache;
pub mod js;
#[cfg(test)]
pub mod logging;
pub mod url;

pub use self::cache::*;
pub use self::url::*;
