//! Stream descriptors handed over by the metadata extractor

use crate::error::ResolveError;
use crate::platform::formats::{self, FormatDescriptor};
use serde::{Deserialize, Serialize};

/// Query parameter a decrypted signature goes into when none is named
pub const DEFAULT_SIGNATURE_PARAM: &str = "signature";

/// Where the stream's bytes are located
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamSource {
    /// Ready URL, possibly still carrying an untransformed `n`
    Url(String),
    /// URL whose signature (and possibly n) still has to be decrypted
    Ciphered {
        base_url: String,
        signature: Option<String>,
        /// Query parameter the decrypted signature is stored in
        signature_param: String,
        n: Option<String>,
    },
}

impl StreamSource {
    /// Parse a `signatureCipher` value such as `s=...&sp=sig&url=...`
    pub fn from_signature_cipher(cipher: &str) -> Result<Self, ResolveError> {
        let mut base_url = None;
        let mut signature = None;
        let mut signature_param = None;
        for (key, value) in url::form_urlencoded::parse(cipher.as_bytes()) {
            match key.as_ref() {
                "url" => base_url = Some(value.into_owned()),
                "s" => signature = Some(value.into_owned()),
                "sp" => signature_param = Some(value.into_owned()),
                _ => {}
            }
        }

        let base_url = base_url
            .ok_or_else(|| ResolveError::InvalidUrl(format!("signature cipher without url: {}", cipher)))?;
        url::Url::parse(&base_url)?;

        Ok(StreamSource::Ciphered {
            base_url,
            signature,
            signature_param: signature_param.unwrap_or_else(|| DEFAULT_SIGNATURE_PARAM.to_string()),
            n: None,
        })
    }

    pub fn needs_deciphering(&self) -> bool {
        matches!(self, StreamSource::Ciphered { signature: Some(_), .. })
    }
}

/// How the stream is delivered by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMethod {
    /// Plain progressive download
    Direct,
    /// Single file addressed by byte ranges
    ByteRange,
    /// Segments generated on the fly
    Otf,
    /// Ended livestream served from its DVR window
    PostLiveDvr { target_duration_sec: u32 },
}

impl DeliveryMethod {
    pub fn needs_manifest(&self) -> bool {
        !matches!(self, DeliveryMethod::Direct)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryMethod::Direct => "direct",
            DeliveryMethod::ByteRange => "byte-range",
            DeliveryMethod::Otf => "otf",
            DeliveryMethod::PostLiveDvr { .. } => "post-live",
        }
    }
}

/// One stream of a content item
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub format: FormatDescriptor,
    pub source: StreamSource,
    pub approx_duration_ms: u64,
    pub delivery: DeliveryMethod,
}

impl StreamDescriptor {
    pub fn new(format: FormatDescriptor, source: StreamSource) -> Self {
        Self {
            format,
            source,
            approx_duration_ms: 0,
            delivery: DeliveryMethod::Direct,
        }
    }

    /// Descriptor for a registry format
    pub fn from_itag(itag: u32, source: StreamSource) -> Result<Self, ResolveError> {
        Ok(Self::new(formats::lookup(itag)?, source))
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.approx_duration_ms = duration_ms;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryMethod) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn itag(&self) -> u32 {
        self.format.id
    }
}
