use std::time::Duration;

use crate::fetcher::{FetchError, HttpFetcher, PageFetcher};
use crate::parser::{ParseError, parse_city_average, parse_comments, parse_page_count};
use crate::types::{AggregateResult, CityId, CityTable, Mode, Page};

#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Failed to parse {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },
}

impl ScraperError {
    fn parse(url: &str) -> impl FnOnce(ParseError) -> ScraperError + '_ {
        move |source| ScraperError::Parse {
            url: url.to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperOptions {
    /// Pause observed after every page fetch.
    pub delay: Duration,
    /// Close the fetcher once a batch finishes, successfully or not.
    pub close_fetcher: bool,
}

impl Default for ScraperOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            close_fetcher: true,
        }
    }
}

pub struct WebScraper<F> {
    fetcher: F,
    base_url: String,
    options: ScraperOptions,
}

impl WebScraper<HttpFetcher> {
    pub fn http(options: ScraperOptions) -> Result<Self, ScraperError> {
        Ok(Self::new(HttpFetcher::new()?, options))
    }
}

impl<F: PageFetcher> WebScraper<F> {
    pub fn new(fetcher: F, options: ScraperOptions) -> Self {
        Self {
            fetcher,
            base_url: crate::BASE_URL.to_string(),
            options,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// `<base>/<city>` for the first page, `<base>/<city>?page=<n>#commentaires` after that.
    pub fn city_url(&self, city: &CityId, page: u32) -> String {
        if page <= 1 {
            format!("{}/{}", self.base_url, city)
        } else {
            format!("{}/{}?page={}#commentaires", self.base_url, city, page)
        }
    }

    pub async fn fetch_page(&self, url: &str, want_page_count: bool) -> Result<Page, ScraperError> {
        let content = self.fetcher.fetch(url).await?;
        let page_count = if want_page_count {
            let count = parse_page_count(&content).map_err(ScraperError::parse(url))?;
            log::debug!("{} has {} page(s)", url, count);
            Some(count)
        } else {
            None
        };

        Ok(Page {
            url: url.to_string(),
            content,
            page_count,
        })
    }

    /// Scrapes one city. Any failing page discards everything fetched for the city.
    pub async fn walk_city(&self, city: &CityId, mode: Mode) -> Result<CityTable, ScraperError> {
        let url = self.city_url(city, 1);

        match mode {
            Mode::Average => {
                log::info!("Fetching averages for {}...", city);
                let page = self.fetch_page(&url, false).await?;
                self.pause().await;
                let average = parse_city_average(&page.content).map_err(ScraperError::parse(&page.url))?;
                Ok(CityTable::Average(average))
            }
            Mode::Comments => {
                log::info!("Fetching comments for {} (page 1)...", city);
                let first = self.fetch_page(&url, true).await?;
                self.pause().await;
                let mut comments = parse_comments(&first.content).map_err(ScraperError::parse(&first.url))?;
                log::debug!("{}: {} comment(s) on page 1", city, comments.len());

                let page_count = first.page_count.unwrap_or(1);
                for page in 2..=page_count {
                    let url = self.city_url(city, page);
                    log::info!("Fetching comments for {} (page {}/{})...", city, page, page_count);
                    let next = self.fetch_page(&url, false).await?;
                    self.pause().await;
                    let extracted = parse_comments(&next.content).map_err(ScraperError::parse(&next.url))?;
                    log::debug!("{}: {} comment(s) on page {}", city, extracted.len(), page);
                    comments.extend(extracted);
                }

                Ok(CityTable::Comments(comments))
            }
        }
    }

    pub async fn download(
        &mut self,
        cities: &[CityId],
        mode: Mode,
    ) -> Result<AggregateResult, ScraperError> {
        self.download_with_progress(cities, mode, |_| {}).await
    }

    /// Scrapes `cities` in order, calling `on_city` after each completed city.
    ///
    /// The first failing city aborts the batch and nothing is returned for
    /// the cities that already succeeded.
    pub async fn download_with_progress<P>(
        &mut self,
        cities: &[CityId],
        mode: Mode,
        mut on_city: P,
    ) -> Result<AggregateResult, ScraperError>
    where
        P: FnMut(&CityId),
    {
        let result = self.download_all(cities, mode, &mut on_city).await;

        if self.options.close_fetcher {
            match (&result, self.fetcher.close().await) {
                (_, Ok(())) => {}
                (Ok(_), Err(e)) => return Err(e.into()),
                (Err(_), Err(e)) => log::warn!("Failed to close fetcher after aborted batch: {e}"),
            }
        }

        result
    }

    async fn download_all<P>(
        &self,
        cities: &[CityId],
        mode: Mode,
        on_city: &mut P,
    ) -> Result<AggregateResult, ScraperError>
    where
        P: FnMut(&CityId),
    {
        let mut aggregate = AggregateResult::new(mode);
        for city in cities {
            let table = self
                .walk_city(city, mode)
                .await
                .inspect_err(|e| log::error!("Aborting batch at {}: {}", city, e))?;
            log::info!("{}: {} row(s)", city, table.len());
            aggregate.push(city.clone(), table);
            on_city(city);
        }
        Ok(aggregate)
    }

    pub async fn close(&mut self) -> Result<(), ScraperError> {
        Ok(self.fetcher.close().await?)
    }

    async fn pause(&self) {
        if !self.options.delay.is_zero() {
            tokio::time::sleep(self.options.delay).await;
        }
    }
}
