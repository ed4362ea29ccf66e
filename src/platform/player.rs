//! Player script versions

use crate::error::ResolveError;
use crate::utils::url::clean_player_url;
use regex::Regex;
use std::fmt;

/// Opaque name of one deployed player script, as found in its URL path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerVersion(String);

impl PlayerVersion {
    /// Wrap a version string
    pub fn new(version: impl Into<String>) -> Result<Self, ResolveError> {
        let version = version.into();
        let valid = !version.is_empty()
            && version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ResolveError::InvalidUrl(format!(
                "invalid player version: {:?}",
                version
            )));
        }
        Ok(Self(version))
    }

    /// Derive the version from a script URL (`/s/player/<version>/...`)
    pub fn from_player_url(url: &str) -> Result<Self, ResolveError> {
        let version_regex = Regex::new(r"/s/player/([a-zA-Z0-9_-]+)/")?;
        let captures = version_regex
            .captures(url)
            .ok_or_else(|| ResolveError::InvalidUrl(format!("no player version in {}", url)))?;
        Self::new(&captures[1])
    }

    /// Find the script URL referenced from a watch or embed page and derive its version
    pub fn find_in_page(html: &str) -> Result<(Self, String), ResolveError> {
        let js_url_regex = Regex::new(r#""(?:jsUrl|PLAYER_JS_URL)":"([^"]+)""#)?;
        let script_tag_regex = Regex::new(r#"<script\s+src="([/a-zA-Z0-9_.-]{1,200}base\.js)""#)?;

        let raw = js_url_regex
            .captures(html)
            .or_else(|| script_tag_regex.captures(html))
            .map(|caps| caps[1].replace("\\/", "/"))
            .ok_or_else(|| ResolveError::InvalidUrl("player script URL not found".to_string()))?;

        let url = clean_player_url(&raw)?;
        let version = Self::from_player_url(&url)?;
        Ok((version, url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PlayerVersion {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Read `signatureTimestamp` from a player script
pub fn find_signature_timestamp(script: &str) -> Result<Option<u64>, ResolveError> {
    let sts_regex = Regex::new(r"signatureTimestamp[=:](\d+)")?;
    Ok(sts_regex
        .captures(script)
        .and_then(|caps| caps[1].parse().ok()))
}
