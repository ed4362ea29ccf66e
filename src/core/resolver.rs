//! Per-stream control flow: decrypt, then synthesize a manifest when needed

use crate::config::ResolverConfig;
use crate::core::stream::{DeliveryMethod, StreamDescriptor, StreamSource};
use crate::dash::{
    synthesize_otf_manifest, synthesize_post_live_dvr_manifest, synthesize_progressive_manifest,
};
use crate::error::ResolveError;
use crate::platform::cipher::CipherService;
use crate::platform::client::{Fetcher, HttpClientConfig, HttpFetcher};
use crate::platform::player::PlayerVersion;
use crate::utils::cache::{new_expiring_cache, AsyncCache};
use crate::utils::url::{append_query_param, find_query_param, replace_query_param};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Streaming URLs expire after a few hours, so do manifests built from them
const MANIFEST_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// A playable stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub itag: u32,
    pub delivery: DeliveryMethod,
    /// Decrypted streaming URL
    pub url: String,
    /// DASH manifest, for streams that cannot be played from `url` alone
    pub manifest: Option<String>,
}

/// Failure of one stream, tagged with its itag
#[derive(Debug, Clone, thiserror::Error)]
#[error("Stream {itag}: {error}")]
pub struct StreamError {
    pub itag: u32,
    #[source]
    pub error: ResolveError,
}

/// Turns stream descriptors into playable URLs and manifests
pub struct StreamResolver {
    fetcher: Arc<dyn Fetcher>,
    cipher: Arc<CipherService>,
    config: ResolverConfig,
    manifests: Option<AsyncCache<String, String>>,
    cancel: CancellationToken,
}

impl StreamResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: ResolverConfig) -> Self {
        let cipher = Arc::new(CipherService::new(fetcher.clone(), config.clone()));
        let manifests = match config.max_cached_manifests {
            0 => None,
            max => Some(new_expiring_cache(MANIFEST_TTL, max)),
        };
        Self {
            fetcher,
            cipher,
            config,
            manifests,
            cancel: CancellationToken::new(),
        }
    }

    /// Resolver backed by an HTTP fetcher built from `config`
    pub fn from_config(config: ResolverConfig) -> Result<Self, ResolveError> {
        config.validate()?;
        let fetcher = HttpFetcher::with_config(HttpClientConfig::from(&config))?;
        Ok(Self::new(Arc::new(fetcher), config))
    }

    /// Share a cipher service with other resolvers
    pub fn with_cipher_service(mut self, cipher: Arc<CipherService>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Abort in-flight and future resolutions when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cipher(&self) -> &Arc<CipherService> {
        &self.cipher
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolve one stream of a content item played by `version`
    pub async fn resolve(
        &self,
        version: &PlayerVersion,
        descriptor: &StreamDescriptor,
    ) -> Result<ResolvedStream, StreamError> {
        let itag = descriptor.itag();
        if self.cancel.is_cancelled() {
            return Err(StreamError {
                itag,
                error: ResolveError::Cancelled,
            });
        }

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ResolveError::Cancelled),
            result = self.resolve_stream(version, descriptor) => result,
        };
        result.map_err(|error| {
            debug!("Stream {} failed: {}", itag, error);
            StreamError { itag, error }
        })
    }

    /// Resolve every stream concurrently; one failure never affects the others
    pub async fn resolve_all(
        &self,
        version: &PlayerVersion,
        descriptors: &[StreamDescriptor],
    ) -> Vec<Result<ResolvedStream, StreamError>> {
        join_all(
            descriptors
                .iter()
                .map(|descriptor| self.resolve(version, descriptor)),
        )
        .await
    }

    async fn resolve_stream(
        &self,
        version: &PlayerVersion,
        descriptor: &StreamDescriptor,
    ) -> Result<ResolvedStream, ResolveError> {
        let url = self.decrypt_url(version, &descriptor.source).await?;
        let manifest = match descriptor.delivery {
            DeliveryMethod::Direct => None,
            _ => self.manifest(descriptor, &url).await?,
        };
        Ok(ResolvedStream {
            itag: descriptor.itag(),
            delivery: descriptor.delivery,
            url,
            manifest,
        })
    }

    async fn decrypt_url(
        &self,
        version: &PlayerVersion,
        source: &StreamSource,
    ) -> Result<String, ResolveError> {
        let deadline = Instant::now() + self.config.script_timeout;
        let url = match source {
            StreamSource::Url(url) => url.clone(),
            StreamSource::Ciphered {
                base_url,
                signature,
                signature_param,
                n,
            } => {
                let mut url = base_url.clone();
                if let Some(token) = signature {
                    let decrypted = self.cipher.resolve_signature(version, token, deadline).await?;
                    url = append_query_param(&url, signature_param, &decrypted);
                }
                if let Some(n) = n.as_deref().filter(|n| !n.is_empty()) {
                    let encoded: String = url::form_urlencoded::byte_serialize(n.as_bytes()).collect();
                    url = match find_query_param(&url, "n")? {
                        Some(_) => replace_query_param(&url, "n", &encoded)?,
                        None => append_query_param(&url, "n", n),
                    };
                }
                url
            }
        };
        self.cipher.deobfuscate_url(version, &url, deadline).await
    }

    /// Manifest for a non-direct stream, or `None` when it falls back to its URL
    async fn manifest(
        &self,
        descriptor: &StreamDescriptor,
        url: &str,
    ) -> Result<Option<String>, ResolveError> {
        let built = match &self.manifests {
            Some(cache) => {
                let key = format!("{}:{}:{}", descriptor.delivery.label(), descriptor.itag(), url);
                cache
                    .try_get_with(key, self.synthesize(descriptor, url))
                    .await
                    .map_err(|e| (*e).clone())
            }
            None => self.synthesize(descriptor, url).await,
        };

        match built {
            Ok(manifest) => Ok(Some(manifest)),
            Err(ResolveError::IncompleteMetadata { itag, missing })
                if descriptor.delivery == DeliveryMethod::ByteRange =>
            {
                warn!(
                    "Format {} has no {}, serving it as a progressive URL",
                    itag, missing
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn synthesize(&self, descriptor: &StreamDescriptor, url: &str) -> Result<String, ResolveError> {
        let deadline = Instant::now() + self.config.probe_timeout;
        let format = &descriptor.format;
        let duration_ms = descriptor.approx_duration_ms;
        match descriptor.delivery {
            DeliveryMethod::ByteRange => synthesize_progressive_manifest(url, format, duration_ms),
            DeliveryMethod::Otf => {
                synthesize_otf_manifest(self.fetcher.as_ref(), url, format, duration_ms, deadline).await
            }
            DeliveryMethod::PostLiveDvr {
                target_duration_sec,
            } => {
                synthesize_post_live_dvr_manifest(
                    self.fetcher.as_ref(),
                    url,
                    format,
                    target_duration_sec,
                    duration_ms,
                    deadline,
                )
                .await
            }
            DeliveryMethod::Direct => Err(ResolveError::Manifest(format!(
                "format {} is delivered directly",
                format.id
            ))),
        }
    }
}
