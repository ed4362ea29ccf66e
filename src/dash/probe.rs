//! Initialization-segment probes against streaming servers

use crate::error::ResolveError;
use crate::platform::client::{FetchResponse, Fetcher};
use crate::utils::is_html5_streaming_url;
use tokio::time::Instant;
use tracing::debug;

const SQ_0: &str = "&sq=0";
const RN_0: &str = "&rn=0";
const ALR_YES: &str = "&alr=yes";

/// Maximum `text/plain` redirect hops followed for one probe
pub const MAX_REDIRECTS: usize = 20;

/// URL requesting the first sequence of a segmented stream
pub fn probe_url(url: &str) -> String {
    let mut probe = format!("{}{}{}", url, SQ_0, RN_0);
    if is_html5_streaming_url(url) {
        probe.push_str(ALR_YES);
    }
    probe
}

/// Remove the probe parameters from a URL, leaving a segment template base
pub fn strip_probe_params(url: &str) -> String {
    url.replace(SQ_0, "").replace(RN_0, "").replace(ALR_YES, "")
}

/// GET the first sequence, following redirects the server returns as `text/plain` bodies
pub(crate) async fn fetch_probe(
    fetcher: &dyn Fetcher,
    url: &str,
    deadline: Instant,
) -> Result<FetchResponse, ResolveError> {
    let mut target = probe_url(url);

    for hop in 0..=MAX_REDIRECTS {
        let response = fetcher
            .fetch_text(&target, deadline)
            .await
            .map_err(|e| probe_error(url, e))?;

        if response.status != 200 {
            return Err(ResolveError::ProbeFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status),
            });
        }

        if response.content_type() != Some("text/plain") {
            return Ok(response);
        }

        if hop == MAX_REDIRECTS {
            break;
        }
        let next = response.body.trim();
        if next.is_empty() {
            return Err(ResolveError::ProbeFailed {
                url: url.to_string(),
                reason: "empty redirect body".to_string(),
            });
        }
        debug!("Probe redirected to {}", next);
        target = next.to_string();
    }

    Err(ResolveError::ProbeFailed {
        url: url.to_string(),
        reason: format!("more than {} redirects", MAX_REDIRECTS),
    })
}

/// Deadline expiry stays a timeout; everything else is a failed probe
pub(crate) fn probe_error(url: &str, err: ResolveError) -> ResolveError {
    match err {
        ResolveError::Timeout(_) | ResolveError::ProbeFailed { .. } => err,
        other => ResolveError::ProbeFailed {
            url: url.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory streaming server keyed by exact URL
    #[derive(Default)]
    pub(crate) struct ProbeFetcher {
        pub responses: HashMap<String, FetchResponse>,
        pub heads: HashMap<String, HashMap<String, String>>,
        pub requests: Mutex<Vec<String>>,
    }

    impl ProbeFetcher {
        pub fn respond(mut self, url: &str, content_type: &str, body: &str) -> Self {
            self.responses.insert(
                url.to_string(),
                FetchResponse {
                    status: 200,
                    final_url: url.to_string(),
                    headers: HashMap::from([("content-type".to_string(), content_type.to_string())]),
                    body: body.to_string(),
                },
            );
            self
        }

        pub fn fail(mut self, url: &str, status: u16) -> Self {
            self.responses.insert(
                url.to_string(),
                FetchResponse {
                    status,
                    final_url: url.to_string(),
                    headers: HashMap::new(),
                    body: String::new(),
                },
            );
            self
        }

        pub fn head_headers(mut self, url: &str, headers: &[(&str, &str)]) -> Self {
            self.heads.insert(
                url.to_string(),
                headers
                    .iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                    .collect(),
            );
            self
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for ProbeFetcher {
        async fn fetch_text(&self, url: &str, _deadline: Instant) -> Result<FetchResponse, ResolveError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.responses.get(url).cloned().ok_or_else(|| ResolveError::Fetch {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            })
        }

        async fn head(&self, url: &str, _deadline: Instant) -> Result<HashMap<String, String>, ResolveError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.heads.get(url).cloned().ok_or_else(|| ResolveError::Fetch {
                url: url.to_string(),
                reason: "HTTP 404".to_string(),
            })
        }
    }

    pub(crate) fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[test]
    fn test_probe_url_for_web_clients() {
        assert_eq!(
            probe_url("https://h/videoplayback?itag=22&c=ANDROID"),
            "https://h/videoplayback?itag=22&c=ANDROID&sq=0&rn=0"
        );
        assert_eq!(
            probe_url("https://h/videoplayback?itag=22&c=WEB"),
            "https://h/videoplayback?itag=22&c=WEB&sq=0&rn=0&alr=yes"
        );
        assert_eq!(
            strip_probe_params("https://h/videoplayback?itag=22&c=WEB&sq=0&rn=0&alr=yes"),
            "https://h/videoplayback?itag=22&c=WEB"
        );
    }

    #[tokio::test]
    async fn test_redirect_bodies_are_followed() {
        let fetcher = ProbeFetcher::default()
            .respond("https://a/v?c=WEB&sq=0&rn=0&alr=yes", "text/plain", "https://b/v?c=WEB&sq=0&rn=0&alr=yes\n")
            .respond("https://b/v?c=WEB&sq=0&rn=0&alr=yes", "video/mp4", "init");

        let response = fetch_probe(&fetcher, "https://a/v?c=WEB", deadline()).await.unwrap();
        assert_eq!(response.body, "init");
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_redirect_loop_is_bounded() {
        let looping = "https://a/v?c=WEB&sq=0&rn=0&alr=yes";
        let fetcher = ProbeFetcher::default().respond(looping, "text/plain", looping);

        let err = fetch_probe(&fetcher, "https://a/v?c=WEB", deadline()).await.unwrap_err();
        assert!(matches!(err, ResolveError::ProbeFailed { .. }));
        assert_eq!(fetcher.requests().len(), MAX_REDIRECTS + 1);
    }

    #[tokio::test]
    async fn test_probe_failures() {
        let fetcher = ProbeFetcher::default().fail("https://a/v?x=1&sq=0&rn=0", 403);
        let err = fetch_probe(&fetcher, "https://a/v?x=1", deadline()).await.unwrap_err();
        assert!(matches!(err, ResolveError::ProbeFailed { ref reason, .. } if reason == "HTTP 403"));

        let err = fetch_probe(&fetcher, "https://unknown/v?x=1", deadline()).await.unwrap_err();
        assert!(matches!(err, ResolveError::ProbeFailed { .. }));
    }

    #[test]
    fn test_timeouts_are_not_rewrapped() {
        let err = probe_error("u", ResolveError::Timeout("GET u".to_string()));
        assert!(matches!(err, ResolveError::Timeout(_)));
    }
}
