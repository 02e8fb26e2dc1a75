use async_trait::async_trait;
use reqwest::{Client, StatusCode};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Browser error: {0}")]
    Browser(String),
    #[error("No page available at {0}")]
    Unavailable(String),
}

/// Retrieves the markup behind a URL.
///
/// Extraction does not care which implementation produced the markup, so a
/// plain HTTP client and a JavaScript-rendering browser are interchangeable.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;

    /// Releases whatever long-lived resource backs the fetcher.
    async fn close(&mut self) -> Result<(), FetchError> {
        Ok(())
    }
}

/// Static response bodies over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .inspect_err(|e| log::error!("HTTP error: {e:?}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            log::warn!("{} not found", url);
            return Err(FetchError::Unavailable(url.to_string()));
        }

        Ok(response
            .error_for_status()?
            .text()
            .await
            .inspect_err(|e| log::error!("Decode error: {e:?}"))?)
    }
}

#[cfg(feature = "render")]
pub use render::BrowserFetcher;

#[cfg(feature = "render")]
mod render {
    use super::{FetchError, PageFetcher};

    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use futures::StreamExt;
    use tokio::task::JoinHandle;

    fn browser_error(e: impl std::fmt::Display) -> FetchError {
        FetchError::Browser(e.to_string())
    }

    /// JavaScript-rendered pages through a Chromium instance owned for the whole run.
    pub struct BrowserFetcher {
        browser: Browser,
        handler: JoinHandle<()>,
    }

    impl BrowserFetcher {
        pub async fn launch(headless: bool) -> Result<Self, FetchError> {
            let mut builder = BrowserConfig::builder();
            if !headless {
                builder = builder.with_head();
            }
            let config = builder.build().map_err(FetchError::Browser)?;

            let (browser, mut events) = Browser::launch(config).await.map_err(browser_error)?;
            let handler = tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if let Err(e) = event {
                        log::debug!("Browser handler stopped: {e}");
                        break;
                    }
                }
            });
            log::info!("Launched browser (headless: {headless})");

            Ok(Self { browser, handler })
        }
    }

    #[async_trait]
    impl PageFetcher for BrowserFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            let page = self.browser.new_page(url).await.map_err(browser_error)?;
            page.wait_for_navigation().await.map_err(browser_error)?;
            let html = page.content().await.map_err(browser_error);
            if let Err(e) = page.close().await {
                log::warn!("Failed to close tab for {url}: {e}");
            }
            html
        }

        async fn close(&mut self) -> Result<(), FetchError> {
            log::info!("Closing browser");
            self.browser.close().await.map_err(browser_error)?;
            self.handler.abort();
            Ok(())
        }
    }
}
