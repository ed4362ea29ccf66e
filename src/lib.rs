//! # ryt-resolve - playable stream resolution
//!
//! Turns the stream metadata of a video page into URLs a player can use.
//!
//! ## Features
//!
//! - Signature and n-param cipher extraction from player scripts
//! - Sandboxed evaluation on an embedded V8 isolate
//! - Per-player-version cache with single-flight loading
//! - DASH manifests for OTF, byte-range and post-live streams
//!
//! ## Example
//!
//! ```rust,no_run
//! use ryt_resolve::{
//!     DeliveryMethod, PlayerVersion, ResolverConfig, StreamDescriptor, StreamResolver, StreamSource,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = StreamResolver::from_config(ResolverConfig::from_env()?)?;
//!     let version = PlayerVersion::new("8e83803a")?;
//!
//!     let source = StreamSource::from_signature_cipher("s=...&sp=sig&url=https%3A%2F%2F...")?;
//!     let stream = StreamDescriptor::from_itag(137, source)?
//!         .with_duration_ms(212_000)
//!         .with_delivery(DeliveryMethod::Otf);
//!
//!     let resolved = resolver.resolve(&version, &stream).await?;
//!     println!("{}", resolved.url);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dash;
pub mod error;
pub mod platform;
pub mod utils;

// Re-export main types
pub use crate::config::ResolverConfig;
pub use crate::core::{
    DeliveryMethod, ResolvedStream, StreamDescriptor, StreamError, StreamResolver, StreamSource,
};
pub use crate::dash::{
    synthesize_otf_manifest, synthesize_post_live_dvr_manifest, synthesize_progressive_manifest,
    SegmentPlan,
};
pub use crate::error::ResolveError;
pub use crate::platform::{
    CipherService, FetchResponse, Fetcher, FormatDescriptor, HttpFetcher, PlayerVersion,
};

/// Result type alias for ryt-resolve operations
pub type Result<T> = std::result::Result<T, ResolveError>;
