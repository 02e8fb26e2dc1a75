mod parser;
pub mod fetcher;
pub mod scraper;
pub mod store;
pub mod types;

pub use fetcher::{FetchError, HttpFetcher, PageFetcher};
pub use parser::{ParseError, parse_city_average, parse_comments, parse_page_count};
pub use scraper::{ScraperError, ScraperOptions, WebScraper};

pub(crate) const BASE_URL: &str = "https://www.ville-ideale.fr";
