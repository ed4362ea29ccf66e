//! URL utilities for player script and streaming URLs

use crate::error::ResolveError;
use regex::Regex;
use url::Url;

/// Base for root-relative player script paths
const PLATFORM_ORIGIN: &str = "https://www.youtube.com";

/// Make a player script URL absolute
///
/// Page metadata references the script as `//host/...` or `/s/player/...`.
pub fn clean_player_url(url: &str) -> Result<String, ResolveError> {
    let absolute = if url.starts_with("//") {
        format!("https:{}", url)
    } else if url.starts_with('/') {
        format!("{}{}", PLATFORM_ORIGIN, url)
    } else {
        url.to_string()
    };
    Url::parse(&absolute)?;
    Ok(absolute)
}

/// Byte range and raw value of a query parameter, without decoding
///
/// A parameter with an empty value counts as absent.
pub fn find_query_param<'a>(url: &'a str, name: &str) -> Result<Option<(usize, &'a str)>, ResolveError> {
    let pattern = Regex::new(&format!(r"[&?]{}=([^&#]+)", regex::escape(name)))?;
    Ok(pattern
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| (m.start(), m.as_str())))
}

/// Replace the raw value of a query parameter, leaving every other byte untouched
pub fn replace_query_param(url: &str, name: &str, value: &str) -> Result<String, ResolveError> {
    match find_query_param(url, name)? {
        Some((start, old)) => {
            let mut rewritten = String::with_capacity(url.len() - old.len() + value.len());
            rewritten.push_str(&url[..start]);
            rewritten.push_str(value);
            rewritten.push_str(&url[start + old.len()..]);
            Ok(rewritten)
        }
        None => Ok(url.to_string()),
    }
}

/// Append `name=value` to a URL, percent-encoding the value
pub fn append_query_param(url: &str, name: &str, value: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", url, separator, name, encoded)
}

/// Check whether a streaming URL was issued to an HTML5 client
pub fn is_html5_streaming_url(url: &str) -> bool {
    url.contains("&c=WEB") || url.contains("&c=TVHTML5")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_player_url() {
        assert_eq!(
            clean_player_url("/s/player/abc/player_ias.vflset/en_US/base.js").unwrap(),
            "https://www.youtube.com/s/player/abc/player_ias.vflset/en_US/base.js"
        );
        assert_eq!(
            clean_player_url("//www.youtube.com/s/player/abc/base.js").unwrap(),
            "https://www.youtube.com/s/player/abc/base.js"
        );
        assert!(clean_player_url("not a url").is_err());
    }

    #[test]
    fn test_find_query_param() {
        let url = "https://host/videoplayback?expire=1&n=N9BW-_x&sig=abc";
        assert_eq!(find_query_param(url, "n").unwrap().map(|(_, v)| v), Some("N9BW-_x"));
        // "sn" must not match "n"
        assert_eq!(find_query_param("https://h/p?sn=1", "n").unwrap(), None);
    }

    #[test]
    fn test_empty_query_param_is_absent() {
        let url = "https://h/v?itag=1&n=&c=WEB";
        assert_eq!(find_query_param(url, "n").unwrap(), None);
        assert_eq!(find_query_param("https://h/v?n=#frag", "n").unwrap(), None);
        assert_eq!(replace_query_param(url, "n", "xyz").unwrap(), url);
    }

    #[test]
    fn test_replace_query_param_preserves_rest() {
        let url = "https://host/videoplayback?expire=1&n=abc&c=WEB";
        assert_eq!(
            replace_query_param(url, "n", "xyz").unwrap(),
            "https://host/videoplayback?expire=1&n=xyz&c=WEB"
        );

        let untouched = "https://host/videoplayback?expire=1&sig=%3D%3D";
        assert_eq!(replace_query_param(untouched, "n", "xyz").unwrap(), untouched);
    }

    #[test]
    fn test_append_query_param_encodes() {
        assert_eq!(
            append_query_param("https://h/p?a=1", "sig", "a=b/c"),
            "https://h/p?a=1&sig=a%3Db%2Fc"
        );
        assert_eq!(append_query_param("https://h/p", "x", "1"), "https://h/p?x=1");
    }

    #[test]
    fn test_is_html5_streaming_url() {
        assert!(is_html5_streaming_url("https://h/p?x=1&c=WEB&y=2"));
        assert!(is_html5_streaming_url("https://h/p?x=1&c=TVHTML5_SIMPLY_EMBEDDED_PLAYER"));
        assert!(!is_html5_streaming_url("https://h/p?x=1&c=ANDROID"));
    }
}
