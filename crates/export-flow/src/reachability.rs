//! Service reachability probe.

use std::time::Duration;

use url::Url;

use goexport_common::error::{ExportError, ExportResult};
use goexport_project_model::service::ServiceDescriptor;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Answers whether anything responds at a URL.
#[async_trait::async_trait]
pub trait Reachability: Send + Sync {
    async fn reachable(&self, url: &Url) -> bool;
}

/// HTTP `HEAD` probe. Any HTTP response counts as reachable.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Reachability for HttpProbe {
    async fn reachable(&self, url: &Url) -> bool {
        match self.client.head(url.clone()).send().await {
            Ok(response) => {
                tracing::debug!(url = %url, status = %response.status(), "Service answered");
                true
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Service did not answer");
                false
            }
        }
    }
}

/// Fail with [`ExportError::UnreachableService`] unless the service's base
/// URL answers.
pub async fn check_service(probe: &dyn Reachability, service: &ServiceDescriptor) -> ExportResult<()> {
    let url = service
        .base_url()
        .map_err(|e| ExportError::config(e.to_string()))?;
    if probe.reachable(&url).await {
        tracing::info!(service = service.key, url = %url, "Service reachable");
        return Ok(());
    }
    Err(ExportError::UnreachableService {
        url: url.to_string(),
        local_component: service.hostable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use goexport_project_model::service::service;

    struct Fixed(bool);

    #[async_trait::async_trait]
    impl Reachability for Fixed {
        async fn reachable(&self, _url: &Url) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn test_local_service_down_names_local_component() {
        let err = check_service(&Fixed(false), service("local").unwrap())
            .await
            .unwrap_err();
        match err {
            ExportError::UnreachableService { url, local_component } => {
                assert!(url.starts_with("http://127.0.0.1:4343"));
                assert!(local_component);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remote_service_down_is_network() {
        let err = check_service(&Fixed(false), service("ft").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExportError::UnreachableService {
                local_component: false,
                ..
            }
        ));
        assert!(check_service(&Fixed(true), service("ft").unwrap()).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_probe_against_closed_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let url = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
        assert!(!HttpProbe::new().reachable(&url).await);
    }
}
