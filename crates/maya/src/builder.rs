//! Fluent construction of [`DownloaderConfig`].
//!
//! ```
//! use std::time::Duration;
//! use maya_engine::DownloaderConfig;
//!
//! let config = DownloaderConfig::builder()
//!     .with_timeout(Duration::from_secs(60))
//!     .with_connect_timeout(Duration::from_secs(15))
//!     .with_header("Referer", "https://example.com/")
//!     .with_system_proxy(false)
//!     .build();
//!
//! assert_eq!(config.timeout, Duration::from_secs(60));
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::{DownloaderConfig, proxy::ProxyConfig};

#[derive(Debug, Clone)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: DownloaderConfig::default(),
        }
    }

    /// Overall timeout for a single request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Maximum silence between two body chunks
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Merge `headers` into the current set, replacing same-named entries
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.config.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.params.push((key.into(), value.into()));
        self
    }

    /// Use an explicit proxy. This disables the system proxy.
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self.config.use_system_proxy = false;
        self
    }

    /// Only takes effect when no explicit proxy is configured
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        if self.config.proxy.is_none() {
            self.config.use_system_proxy = use_system_proxy;
        }
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, max_idle: usize) -> Self {
        self.config.pool_max_idle_per_host = max_idle;
        self
    }

    pub fn build(self) -> DownloaderConfig {
        self.config
    }
}

impl Default for DownloaderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyAuth, ProxyType};

    #[test]
    fn test_builder_defaults() {
        let config = DownloaderConfigBuilder::new().build();
        assert!(config.timeout.is_zero());
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert!(config.follow_redirects);
        assert!(config.use_system_proxy);
        assert!(config.params.is_empty());
    }

    #[test]
    fn test_builder_customization() {
        let config = DownloaderConfigBuilder::new()
            .with_timeout(Duration::from_secs(60))
            .with_connect_timeout(Duration::from_secs(20))
            .with_follow_redirects(false)
            .with_user_agent("maya-test/1.0")
            .with_header("X-Custom-Header", "CustomValue")
            .with_header("bad header", "ignored")
            .with_param("token", "abc")
            .with_system_proxy(false)
            .build();

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert!(!config.follow_redirects);
        assert_eq!(config.user_agent, "maya-test/1.0");
        assert!(!config.use_system_proxy);
        assert_eq!(config.params, vec![("token".to_string(), "abc".to_string())]);
        assert_eq!(
            config.headers.get("X-Custom-Header").unwrap().to_str().unwrap(),
            "CustomValue"
        );
        assert!(!config.headers.contains_key("bad header"));
    }

    #[test]
    fn test_explicit_proxy_wins_over_system_proxy() {
        let config = DownloaderConfigBuilder::new()
            .with_proxy(ProxyConfig {
                url: "http://proxy.example.com:8080".to_string(),
                proxy_type: ProxyType::Http,
                auth: Some(ProxyAuth {
                    username: "user".to_string(),
                    password: "pass".to_string(),
                }),
            })
            .with_system_proxy(true)
            .build();

        assert!(!config.use_system_proxy);
        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.url, "http://proxy.example.com:8080");
        assert_eq!(proxy.auth.unwrap().username, "user");
    }
}
