//! Stream resolution for ryt-resolve

pub mod resolver;
pub mod stream;

pub use resolver::*;
pub use stream::*;
