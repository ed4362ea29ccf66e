//! Cipher resolution service: fetch, locate and compile per player version

use crate::config::ResolverConfig;
use crate::error::{ResolveError, UnavailableReason};
use crate::platform::client::Fetcher;
use crate::platform::locator::{FunctionSource, ScriptLocator};
use crate::platform::player::{find_signature_timestamp, PlayerVersion};
use crate::platform::sandbox::CompiledFunction;
use crate::utils::cache::{new_bounded_cache, AsyncCache};
use crate::utils::url::{find_query_param, replace_query_param};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Both compiled functions of one player version
#[derive(Debug)]
pub struct CompiledCipherSet {
    pub version: PlayerVersion,
    /// Located signature source, kept for diagnostics
    pub signature_source: FunctionSource,
    /// Located n-param source, kept for diagnostics
    pub n_param_source: FunctionSource,
    pub extracted_at: DateTime<Utc>,
    /// `signatureTimestamp` of the player, when present
    pub signature_timestamp: Option<u64>,
    signature: CompiledFunction,
    n_param: CompiledFunction,
    n_results: AsyncCache<String, String>,
}

impl CompiledCipherSet {
    /// Decrypt a signature token
    pub async fn resolve_signature(&self, token: &str) -> Result<String, ResolveError> {
        self.signature.invoke(token).await
    }

    /// Transform an n token, memoized per player version
    pub async fn resolve_n_param(&self, token: &str) -> Result<String, ResolveError> {
        self.n_results
            .try_get_with(token.to_string(), self.n_param.invoke(token))
            .await
            .map_err(|e| (*e).clone())
    }
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Compiled(Arc<CompiledCipherSet>),
    /// Memoized failure and the error its first caller received
    Unavailable(UnavailableReason, ResolveError),
}

/// Resolves signature and n tokens with a per-version cache of compiled functions
///
/// Concurrent callers for a version that is not cached yet share one
/// fetch-locate-compile run. Structural failures and failed fetches are
/// remembered until [`CipherService::invalidate`]; timeouts are not.
pub struct CipherService {
    fetcher: Arc<dyn Fetcher>,
    locator: ScriptLocator,
    config: ResolverConfig,
    cache: AsyncCache<PlayerVersion, CacheEntry>,
}

impl CipherService {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: ResolverConfig) -> Self {
        Self {
            fetcher,
            locator: ScriptLocator::default(),
            cache: new_bounded_cache(config.max_cached_players),
            config,
        }
    }

    /// Use a locator with custom strategy lists
    pub fn with_locator(mut self, locator: ScriptLocator) -> Self {
        self.locator = locator;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Compiled functions for a version, loading them on first use
    pub async fn load(
        &self,
        version: &PlayerVersion,
        deadline: Instant,
    ) -> Result<Arc<CompiledCipherSet>, ResolveError> {
        let init = async {
            match self.build(version, deadline).await {
                Ok(set) => Ok(CacheEntry::Compiled(Arc::new(set))),
                Err(e) => match e.unavailable_reason() {
                    Some(reason) => {
                        warn!("Player {} is unavailable: {}", version, e);
                        Ok(CacheEntry::Unavailable(reason, e))
                    }
                    None => Err(e),
                },
            }
        };

        let entry = tokio::time::timeout_at(
            deadline,
            self.cache.entry(version.clone()).or_try_insert_with(init),
        )
        .await
        .map_err(|_| ResolveError::Timeout(format!("loading player {}", version)))?
        .map_err(|e| (*e).clone())?;

        let fresh = entry.is_fresh();
        match entry.into_value() {
            CacheEntry::Compiled(set) => Ok(set),
            CacheEntry::Unavailable(_, cause) if fresh => Err(cause),
            CacheEntry::Unavailable(reason, _) => {
                debug!("Player {} memoized as unavailable", version);
                Err(ResolveError::Unavailable {
                    version: version.to_string(),
                    reason,
                })
            }
        }
    }

    /// Decrypt a signature token with the given player's cipher
    pub async fn resolve_signature(
        &self,
        version: &PlayerVersion,
        token: &str,
        deadline: Instant,
    ) -> Result<String, ResolveError> {
        let set = self.load(version, deadline).await?;
        tokio::time::timeout_at(deadline, set.resolve_signature(token))
            .await
            .map_err(|_| ResolveError::Timeout("signature evaluation".to_string()))?
    }

    /// Transform an n token with the given player's function
    pub async fn resolve_n_param(
        &self,
        version: &PlayerVersion,
        token: &str,
        deadline: Instant,
    ) -> Result<String, ResolveError> {
        let set = self.load(version, deadline).await?;
        tokio::time::timeout_at(deadline, set.resolve_n_param(token))
            .await
            .map_err(|_| ResolveError::Timeout("n-param evaluation".to_string()))?
    }

    /// Rewrite the `n` parameter of a streaming URL
    ///
    /// A URL without `n` comes back byte-identical and no player is loaded.
    pub async fn deobfuscate_url(
        &self,
        version: &PlayerVersion,
        url: &str,
        deadline: Instant,
    ) -> Result<String, ResolveError> {
        let raw = match find_query_param(url, "n")? {
            Some((_, raw)) => raw,
            None => return Ok(url.to_string()),
        };
        let token = decode_component(raw);
        let transformed = self.resolve_n_param(version, &token, deadline).await?;
        let encoded: String = url::form_urlencoded::byte_serialize(transformed.as_bytes()).collect();
        replace_query_param(url, "n", &encoded)
    }

    /// `signatureTimestamp` of the player script
    pub async fn signature_timestamp(
        &self,
        version: &PlayerVersion,
        deadline: Instant,
    ) -> Result<Option<u64>, ResolveError> {
        Ok(self.load(version, deadline).await?.signature_timestamp)
    }

    /// Drop a version so the next call fetches it again
    pub async fn invalidate(&self, version: &PlayerVersion) {
        info!("Invalidating cipher cache for player {}", version);
        self.cache.invalidate(version).await;
    }

    /// Drop every cached version
    pub fn invalidate_all(&self) {
        info!("Invalidating cipher cache for all players");
        self.cache.invalidate_all();
    }

    async fn build(
        &self,
        version: &PlayerVersion,
        deadline: Instant,
    ) -> Result<CompiledCipherSet, ResolveError> {
        let url = self.config.player_url(version.as_str());
        debug!("Fetching player script {}", url);

        let response = self
            .fetcher
            .fetch_text(&url, deadline)
            .await
            .map_err(|e| match e {
                ResolveError::Timeout(what) => ResolveError::Timeout(what),
                other => ResolveError::ScriptFetch {
                    version: version.to_string(),
                    reason: other.to_string(),
                },
            })?;
        if !response.is_success() {
            return Err(ResolveError::ScriptFetch {
                version: version.to_string(),
                reason: format!("HTTP {}", response.status),
            });
        }
        if response.body.trim().is_empty() {
            return Err(ResolveError::ScriptFetch {
                version: version.to_string(),
                reason: "empty script".to_string(),
            });
        }
        let script = response.body;
        debug!("Fetched player {} ({} chars)", version, script.len());

        let signature_source = self
            .locator
            .locate_signature(&script)
            .map_err(|failure| failure.into_error(version.as_str()))?;
        let n_param_source = self
            .locator
            .locate_n_param(&script)
            .map_err(|failure| failure.into_error(version.as_str()))?;
        let signature_timestamp = find_signature_timestamp(&script)?;

        let budget = self.config.eval_timeout;
        let (signature, n_param) = tokio::try_join!(
            CompiledFunction::compile(&signature_source, budget),
            CompiledFunction::compile(&n_param_source, budget),
        )?;

        info!(
            "Compiled cipher for player {} (signature {} via {}, n-param {} via {})",
            version,
            signature_source.name,
            signature_source.strategy,
            n_param_source.name,
            n_param_source.strategy
        );

        Ok(CompiledCipherSet {
            version: version.clone(),
            signature_source,
            n_param_source,
            extracted_at: Utc::now(),
            signature_timestamp,
            signature,
            n_param,
            n_results: new_bounded_cache(self.config.max_cached_n_params),
        })
    }
}

fn decode_component(raw: &str) -> String {
    url::form_urlencoded::parse(format!("v={}", raw).as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::FunctionKind;
    use crate::platform::client::FetchResponse;
    use crate::platform::locator::tests::PLAYER_SCRIPT;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory fetcher serving one script and counting requests
    pub(crate) struct ScriptFetcher {
        pub script: String,
        pub status: u16,
        pub delay: Duration,
        pub calls: AtomicUsize,
    }

    impl ScriptFetcher {
        pub fn new(script: &str) -> Self {
            Self {
                script: script.to_string(),
                status: 200,
                delay: Duration::from_millis(20),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for ScriptFetcher {
        async fn fetch_text(&self, url: &str, _deadline: Instant) -> Result<FetchResponse, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(FetchResponse {
                status: self.status,
                final_url: url.to_string(),
                headers: HashMap::new(),
                body: self.script.clone(),
            })
        }

        async fn head(&self, url: &str, _deadline: Instant) -> Result<HashMap<String, String>, ResolveError> {
            Err(ResolveError::Fetch {
                url: url.to_string(),
                reason: "not served".to_string(),
            })
        }
    }

    fn service(fetcher: Arc<ScriptFetcher>) -> CipherService {
        CipherService::new(fetcher, ResolverConfig::default())
    }

    fn version() -> PlayerVersion {
        PlayerVersion::new("8e83803a").unwrap()
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(20)
    }

    #[tokio::test]
    async fn test_concurrent_loads_fetch_once() {
        crate::utils::logging::init_test_logging();
        let mut fetcher = ScriptFetcher::new(PLAYER_SCRIPT);
        fetcher.delay = Duration::from_millis(200);
        let fetcher = Arc::new(fetcher);
        let service = service(fetcher.clone());
        let version = version();

        let loads = (0..8).map(|_| service.load(&version, deadline()));
        let sets: Vec<_> = join_all(loads)
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(fetcher.calls(), 1);
        assert!(sets.iter().all(|set| Arc::ptr_eq(set, &sets[0])));
        assert_eq!(sets[0].signature_timestamp, Some(19834));
    }

    #[tokio::test]
    async fn test_resolved_tokens_are_deterministic_and_transformed() {
        let fetcher = Arc::new(ScriptFetcher::new(PLAYER_SCRIPT));
        let service = service(fetcher.clone());
        let version = version();

        let first = service
            .resolve_signature(&version, "abcdefghij", deadline())
            .await
            .unwrap();
        let second = service
            .resolve_signature(&version, "abcdefghij", deadline())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_ne!(first, "abcdefghij");

        let n = service
            .resolve_n_param(&version, "N9BWSTFT7vvBJrvQ", deadline())
            .await
            .unwrap();
        assert_eq!(n, "QvrJBvv7TFTSWB9Nz");
        assert_eq!(
            service
                .resolve_n_param(&version, "N9BWSTFT7vvBJrvQ", deadline())
                .await
                .unwrap(),
            n
        );
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_deobfuscate_url() {
        let fetcher = Arc::new(ScriptFetcher::new(PLAYER_SCRIPT));
        let service = service(fetcher.clone());
        let version = version();

        let plain = "https://r1.example/videoplayback?expire=1&itag=251&sig=AB%3D%3D";
        assert_eq!(
            service.deobfuscate_url(&version, plain, deadline()).await.unwrap(),
            plain
        );
        assert_eq!(fetcher.calls(), 0);

        let throttled = "https://r1.example/videoplayback?expire=1&n=abc&c=WEB";
        assert_eq!(
            service
                .deobfuscate_url(&version, throttled, deadline())
                .await
                .unwrap(),
            "https://r1.example/videoplayback?expire=1&n=cbaz&c=WEB"
        );
    }

    #[tokio::test]
    async fn test_empty_n_passes_through_untouched() {
        let fetcher = Arc::new(ScriptFetcher::new(PLAYER_SCRIPT));
        let service = service(fetcher.clone());

        let url = "https://r1.example/videoplayback?itag=1&n=&c=WEB";
        assert_eq!(
            service.deobfuscate_url(&version(), url, deadline()).await.unwrap(),
            url
        );
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_script_is_memoized_unavailable() {
        let fetcher = Arc::new(ScriptFetcher::new("var a=1;function b(){return 2}"));
        let service = service(fetcher.clone());
        let version = version();

        let first = service.load(&version, deadline()).await.unwrap_err();
        assert!(matches!(
            first,
            ResolveError::ExtractionFailed { function: FunctionKind::Signature, .. }
        ));

        let second = service
            .resolve_n_param(&version, "abc", deadline())
            .await
            .unwrap_err();
        assert!(matches!(
            second,
            ResolveError::Unavailable { reason: UnavailableReason::Extraction(_), .. }
        ));
        assert!(!second.is_retryable());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_memoized_until_invalidated() {
        let mut fetcher = ScriptFetcher::new(PLAYER_SCRIPT);
        fetcher.status = 503;
        let fetcher = Arc::new(fetcher);
        let service = service(fetcher.clone());
        let version = version();

        let first = service.load(&version, deadline()).await.unwrap_err();
        assert!(matches!(first, ResolveError::ScriptFetch { .. }));
        assert!(first.is_retryable());

        let second = service.load(&version, deadline()).await.unwrap_err();
        assert!(matches!(
            second,
            ResolveError::Unavailable { reason: UnavailableReason::ScriptFetch(_), .. }
        ));
        assert_eq!(fetcher.calls(), 1);

        service.invalidate(&version).await;
        let _ = service.load(&version, deadline()).await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_not_memoized() {
        let mut fetcher = ScriptFetcher::new(PLAYER_SCRIPT);
        fetcher.delay = Duration::from_millis(300);
        let fetcher = Arc::new(fetcher);
        let service = service(fetcher.clone());
        let version = version();

        let err = service
            .load(&version, Instant::now() + Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Timeout(_)));

        let set = service.load(&version, deadline()).await.unwrap();
        assert_eq!(set.version, version);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_all_drops_compiled_sets() {
        let fetcher = Arc::new(ScriptFetcher::new(PLAYER_SCRIPT));
        let service = service(fetcher.clone());
        let version = version();

        let before = service.load(&version, deadline()).await.unwrap();
        service.invalidate_all();
        let after = service.load(&version, deadline()).await.unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(
            service.signature_timestamp(&version, deadline()).await.unwrap(),
            Some(19834)
        );
    }

    #[test]
    fn test_decode_component() {
        assert_eq!(decode_component("a%2Bb"), "a+b");
        assert_eq!(decode_component("plain"), "plain");
    }
}
