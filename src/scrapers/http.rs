use crate::scrapers::traits::PageFetcher;
use crate::scrapers::types::{Document, FetchError, ScrapeSettings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

/// Plain HTTP fetcher for sites that serve complete HTML
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(settings: &ScrapeSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.as_str())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Document, FetchError> {
        debug!("Fetching URL: {}", url);

        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(request_error)?;

        if !response.status().is_success() {
            warn!("{} returned status: {}", url, response.status());
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let html = response.text().await.map_err(request_error)?;
        debug!("Downloaded {} bytes of HTML", html.len());

        Ok(Document::new(url, html))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn returns_page_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/condo/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><h1>Ideo Q</h1></html>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&ScrapeSettings::default()).unwrap();
        let url = format!("{}/condo/1", server.uri());
        let page = fetcher.fetch(&url).await.expect("fetch ok");

        assert_eq!(page.url, url);
        assert!(page.html.contains("Ideo Q"));
    }

    #[tokio::test]
    async fn error_status_is_a_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&ScrapeSettings::default()).unwrap();
        let err = fetcher
            .fetch(&format!("{}/gone", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }
}
