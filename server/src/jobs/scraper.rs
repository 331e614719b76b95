//! The external profile-statistics collaborator consumed by the job bridge.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Statistics scraped for one profile. Only `followers` is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileStats {
    #[serde(default)]
    pub followers: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResult {
    #[serde(default)]
    pub profile: Option<ProfileStats>,
}

impl ScrapeResult {
    pub fn with_followers(followers: u64) -> Self {
        Self {
            profile: Some(ProfileStats {
                followers: Some(followers),
                extra: Map::new(),
            }),
        }
    }

    pub fn followers(&self) -> Option<u64> {
        self.profile.as_ref().and_then(|p| p.followers)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("scraper request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("scraper returned HTTP {0}")]
    Status(u16),
    #[error("invalid scraper URL: {0}")]
    InvalidUrl(String),
    #[error("username {0:?} cannot be used in a profile URL")]
    InvalidUsername(String),
    #[error("{0}")]
    Failed(String),
}

/// Fetches profile statistics for a username.
#[async_trait]
pub trait ProfileScraper: Send + Sync {
    async fn scrape(&self, username: &str) -> Result<ScrapeResult, ScrapeError>;
}

/// Scraper backed by an HTTP service answering `GET {base_url}/{username}`
/// with a JSON [`ScrapeResult`]. The username always occupies exactly one
/// percent-encoded path segment.
#[derive(Debug, Clone)]
pub struct HttpProfileScraper {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpProfileScraper {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ScrapeError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ScrapeError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ScrapeError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn profile_url(&self, username: &str) -> Result<Url, ScrapeError> {
        // Dot segments would be dropped rather than encoded
        if username.is_empty() || username == "." || username == ".." {
            return Err(ScrapeError::InvalidUsername(username.to_string()));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ScrapeError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(username);
        Ok(url)
    }
}

#[async_trait]
impl ProfileScraper for HttpProfileScraper {
    async fn scrape(&self, username: &str) -> Result<ScrapeResult, ScrapeError> {
        let url = self.profile_url(username)?;
        tracing::debug!(url = %url, "Fetching profile statistics");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status(status.as_u16()));
        }

        Ok(response.json::<ScrapeResult>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraper(base: &str) -> HttpProfileScraper {
        HttpProfileScraper::new(base, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_profile_url_strips_trailing_slash() {
        let url = scraper("http://127.0.0.1:9000/profiles/")
            .profile_url("alice")
            .unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/profiles/alice");

        let url = scraper("http://127.0.0.1:9000").profile_url("alice").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/alice");
    }

    #[test]
    fn test_profile_url_keeps_username_in_one_segment() {
        let url = scraper("http://127.0.0.1:9000/profiles")
            .profile_url("../admin?x=1#frag")
            .unwrap();
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);

        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], "profiles");
        assert!(!segments[1].contains('/'));
        assert!(!segments[1].contains('?'));
        assert!(!segments[1].contains('#'));
    }

    #[test]
    fn test_profile_url_rejects_dot_segments() {
        let scraper = scraper("http://127.0.0.1:9000/profiles");
        for username in ["", ".", ".."] {
            assert!(matches!(
                scraper.profile_url(username),
                Err(ScrapeError::InvalidUsername(_))
            ));
        }
    }

    #[test]
    fn test_new_rejects_unusable_base_url() {
        assert!(matches!(
            HttpProfileScraper::new("not a url", Duration::from_secs(1)),
            Err(ScrapeError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpProfileScraper::new("mailto:ops@example.com", Duration::from_secs(1)),
            Err(ScrapeError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_scrape_result_tolerates_null_profile_and_extra_fields() {
        let empty: ScrapeResult = serde_json::from_str(r#"{"profile":null}"#).unwrap();
        assert_eq!(empty.followers(), None);

        let full: ScrapeResult =
            serde_json::from_str(r#"{"profile":{"followers":1200,"following":3},"source":"web"}"#)
                .unwrap();
        assert_eq!(full.followers(), Some(1200));
        let profile = full.profile.unwrap();
        assert_eq!(profile.extra["following"], 3);
    }
}
