//! Player script handling and platform HTTP access

pub mod cipher;
pub mod client;
pub mod formats;
pub mod locator;
pub mod player;
pub mod sandbox;

pub use cipher::{CipherService, CompiledCipherSet};
pub use client::{FetchResponse, Fetcher, HttpClientConfig, HttpFetcher};
pub use formats::{ByteRange, Container, FormatDescriptor, MediaType};
pub use locator::{FunctionSource, NParamStrategy, ScriptLocator, SignatureStrategy};
pub use player::PlayerVersion;
pub use sandbox::CompiledFunction;
