use reqwest::{Client, RequestBuilder, Url};
use tracing::{debug, info};

use crate::{DownloadError, DownloaderConfig, proxy::build_proxy_from_config};

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        // Segments are stored byte-for-byte; never negotiate a content coding.
        .no_gzip()
        .no_deflate()
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        let proxy = build_proxy_from_config(proxy_config).map_err(DownloadError::ProxyError)?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy for downloads");
    } else if config.use_system_proxy {
        // reqwest picks up system proxy settings unless no_proxy() is called
        debug!("Using system proxy settings for downloads");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for downloads");
    }

    client_builder.build().map_err(DownloadError::from)
}

/// Issue a GET for `url` carrying the configured query parameters
pub fn get_with_params(client: &Client, url: &Url, config: &DownloaderConfig) -> RequestBuilder {
    let request = client.get(url.clone());
    if config.params.is_empty() {
        request
    } else {
        request.query(&config.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyConfig, ProxyType};

    #[test]
    fn client_builds_with_defaults() {
        assert!(create_client(&DownloaderConfig::default()).is_ok());
    }

    #[test]
    fn bad_proxy_surfaces_as_proxy_error() {
        let config = DownloaderConfig::builder()
            .with_proxy(ProxyConfig {
                url: "http://[::1".to_string(),
                proxy_type: ProxyType::All,
                auth: None,
            })
            .build();
        assert!(matches!(
            create_client(&config),
            Err(DownloadError::ProxyError(_))
        ));
    }
}
