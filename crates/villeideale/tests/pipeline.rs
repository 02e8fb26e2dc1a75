use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use villeideale::store::{WorkQueue, commit_batch};
use villeideale::types::{CityId, CityTable, Criterion, Mode};
use villeideale::{FetchError, PageFetcher, ScraperError, ScraperOptions, WebScraper};

const BASE: &str = "http://ville.test";

#[derive(Default)]
struct MockFetcher {
    pages: HashMap<String, String>,
    requested: Mutex<Vec<String>>,
    closed: bool,
}

impl MockFetcher {
    fn with_page(mut self, path: &str, html: impl Into<String>) -> Self {
        self.pages.insert(format!("{}/{}", BASE, path), html.into());
        self
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.requested.lock().unwrap().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Unavailable(url.to_string()))
    }

    async fn close(&mut self) -> Result<(), FetchError> {
        self.closed = true;
        Ok(())
    }
}

fn fixture(name: &str) -> String {
    fs::read_to_string(format!("fixtures/{}", name)).expect("Failed to read fixture")
}

fn comment_block(date: &str) -> String {
    format!(
        r#"<div class="comm"><span>{date}</span><span class="moyenne">6</span>
        <table><tr><td>5</td><td>6</td><td>7</td></tr></table>
        <p>par X</p><p>bien</p><p>moins bien</p><p><strong>oui</strong><strong>non</strong></p></div>"#
    )
}

fn listing(dates: &[&str], page_count: Option<u32>) -> String {
    let blocks: String = dates.iter().map(|d| comment_block(d)).collect();
    let nav = match page_count {
        Some(n) => {
            let links: String = (1..=n).map(|i| format!("<a>{}</a>", i)).collect();
            format!(r#"<nav id="pages">{}<a>Suivant</a></nav>"#, links)
        }
        None => String::new(),
    };
    format!("<html><body>{}{}</body></html>", blocks, nav)
}

fn build_scraper(fetcher: MockFetcher, delay: Duration) -> WebScraper<MockFetcher> {
    let options = ScraperOptions {
        delay,
        ..ScraperOptions::default()
    };
    WebScraper::new(fetcher, options).with_base_url(BASE)
}

fn comments(table: &CityTable) -> Vec<&str> {
    match table {
        CityTable::Comments(comments) => comments.iter().map(|c| c.date.as_str()).collect(),
        CityTable::Average(_) => panic!("expected comments"),
    }
}

#[tokio::test(start_paused = true)]
async fn walks_every_page_in_order() {
    let fetcher = MockFetcher::default()
        .with_page("morangis_91432", fixture("comments_page_1.html"))
        .with_page(
            "morangis_91432?page=2#commentaires",
            fixture("comments_page_2.html"),
        );
    let scraper = build_scraper(fetcher, Duration::from_secs(1));
    let city = CityId::from("morangis_91432");

    let start = Instant::now();
    let table = scraper
        .walk_city(&city, Mode::Comments)
        .await
        .expect("Failed to walk city");
    let elapsed = start.elapsed();

    assert_eq!(table.len(), 5);
    assert_eq!(
        comments(&table),
        vec![
            "12-03-2021",
            "05-01-2021",
            "28-11-2020",
            "14-10-2020",
            "02-06-2020"
        ]
    );
    assert_eq!(
        scraper.fetcher().requested(),
        vec![
            "http://ville.test/morangis_91432",
            "http://ville.test/morangis_91432?page=2#commentaires",
        ]
    );
    assert!(
        elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3),
        "one pause after each of the two page fetches, got {elapsed:?}"
    );
}

#[tokio::test]
async fn single_page_city_fetches_once() {
    let fetcher =
        MockFetcher::default().with_page("orsay_91471", listing(&["01-01-2022", "02-01-2022"], None));
    let scraper = build_scraper(fetcher, Duration::ZERO);

    let table = scraper
        .walk_city(&CityId::from("orsay_91471"), Mode::Comments)
        .await
        .unwrap();

    assert_eq!(comments(&table), vec!["01-01-2022", "02-01-2022"]);
    assert_eq!(scraper.fetcher().requested().len(), 1);
}

#[tokio::test]
async fn page_count_of_one_short_circuits() {
    let fetcher = MockFetcher::default().with_page("massy_91377", listing(&["03-03-2023"], Some(1)));
    let scraper = build_scraper(fetcher, Duration::ZERO);

    let table = scraper
        .walk_city(&CityId::from("massy_91377"), Mode::Comments)
        .await
        .unwrap();

    assert_eq!(table.len(), 1);
    assert_eq!(scraper.fetcher().requested().len(), 1);
}

#[tokio::test]
async fn page_count_of_zero_short_circuits() {
    let html = listing(&["04-04-2024", "05-04-2024"], None).replace(
        "</body>",
        r#"<nav id="pages"><a>0</a><a>Suivant</a></nav></body>"#,
    );
    let fetcher = MockFetcher::default().with_page("palaiseau_91477", html);
    let scraper = build_scraper(fetcher, Duration::ZERO);

    let table = scraper
        .walk_city(&CityId::from("palaiseau_91477"), Mode::Comments)
        .await
        .unwrap();

    assert_eq!(comments(&table), vec!["04-04-2024", "05-04-2024"]);
    assert_eq!(
        scraper.fetcher().requested(),
        vec!["http://ville.test/palaiseau_91477"]
    );
}

#[tokio::test]
async fn average_mode_reads_summary() {
    let fetcher = MockFetcher::default().with_page("morangis_91432", fixture("city_summary.html"));
    let scraper = build_scraper(fetcher, Duration::ZERO);

    let table = scraper
        .walk_city(&CityId::from("morangis_91432"), Mode::Average)
        .await
        .unwrap();

    match table {
        CityTable::Average(average) => {
            assert_eq!(average.average_score, "6,45");
            assert_eq!(average.scores.get(Criterion::Transport), Some("5,02"));
        }
        CityTable::Comments(_) => panic!("expected averages"),
    }
    assert_eq!(
        scraper.fetcher().requested(),
        vec!["http://ville.test/morangis_91432"]
    );
}

#[tokio::test]
async fn malformed_later_page_fails_the_city() {
    let broken = listing(&["05-05-2020"], None).replace("<strong>non</strong>", "");
    let fetcher = MockFetcher::default()
        .with_page("a_1", listing(&["01-01-2020"], Some(2)))
        .with_page("a_1?page=2#commentaires", broken);
    let scraper = build_scraper(fetcher, Duration::ZERO);

    let err = scraper
        .walk_city(&CityId::from("a_1"), Mode::Comments)
        .await
        .unwrap_err();

    match err {
        ScraperError::Parse { url, source } => {
            assert!(url.ends_with("a_1?page=2#commentaires"));
            assert!(source.is_structure());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn download_keys_results_by_city_in_order() {
    let fetcher = MockFetcher::default()
        .with_page("b_2", listing(&["02-02-2020"], None))
        .with_page("a_1", listing(&["01-01-2020", "01-02-2020"], None));
    let mut scraper = build_scraper(fetcher, Duration::ZERO);
    let cities = [CityId::from("b_2"), CityId::from("a_1")];

    let mut progress = Vec::new();
    let aggregate = scraper
        .download_with_progress(&cities, Mode::Comments, |city| progress.push(city.clone()))
        .await
        .unwrap();

    assert_eq!(progress, cities.to_vec());
    assert_eq!(aggregate.len(), 2);
    assert_eq!(aggregate.get(&cities[1]).map(|t| t.len()), Some(2));

    let table = aggregate.flatten();
    let tagged: Vec<(&str, &str)> = table
        .rows
        .iter()
        .map(|r| (r[0].as_str(), r[1].as_str()))
        .collect();
    assert_eq!(
        tagged,
        vec![
            ("b_2", "02-02-2020"),
            ("a_1", "01-01-2020"),
            ("a_1", "01-02-2020")
        ]
    );
    assert!(scraper.fetcher().closed);
}

#[tokio::test]
async fn failed_city_aborts_batch_and_leaves_queue() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("city_list.csv");
    let output_path = dir.path().join("city_info.csv");
    fs::write(&queue_path, ";name;id_city\n0;a;a_1\n1;b;b_2\n2;c;c_3\n").unwrap();
    let before = fs::read_to_string(&queue_path).unwrap();

    let fetcher = MockFetcher::default()
        .with_page("a_1", listing(&["01-01-2020"], None))
        .with_page("b_2", listing(&["02-02-2020"], Some(2)));
    let mut scraper = build_scraper(fetcher, Duration::ZERO);

    let queue = WorkQueue::load(&queue_path).unwrap();
    let batch = queue.head(2);
    let result = scraper.download(&batch, Mode::Comments).await;

    match result {
        Err(ScraperError::Fetch(FetchError::Unavailable(url))) => {
            assert_eq!(url, "http://ville.test/b_2?page=2#commentaires");
        }
        other => panic!("expected a fetch error, got {other:?}"),
    }
    assert!(scraper.fetcher().closed, "fetcher is released on early termination");
    assert_eq!(fs::read_to_string(&queue_path).unwrap(), before);
    assert!(!output_path.exists());
}

#[tokio::test]
async fn fetcher_stays_open_when_asked() {
    let fetcher = MockFetcher::default().with_page("a_1", fixture("city_summary.html"));
    let options = ScraperOptions {
        delay: Duration::ZERO,
        close_fetcher: false,
    };
    let mut scraper = WebScraper::new(fetcher, options).with_base_url(BASE);

    scraper
        .download(&[CityId::from("a_1")], Mode::Average)
        .await
        .unwrap();

    assert!(!scraper.fetcher().closed);
}

#[tokio::test]
async fn successful_run_appends_then_shrinks_queue() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("city_list.csv");
    let output_path = dir.path().join("city_info.csv");
    fs::write(&queue_path, ";name;id_city\n0;a;a_1\n1;b;b_2\n2;c;c_3\n").unwrap();

    let summary = fixture("city_summary.html");
    let fetcher = MockFetcher::default()
        .with_page("a_1", summary.clone())
        .with_page("b_2", summary.clone())
        .with_page("c_3", summary);

    for _ in 0..2 {
        let mut scraper = build_scraper(clone_pages(&fetcher), Duration::ZERO);
        let batch = WorkQueue::load(&queue_path).unwrap().head(2);
        let aggregate = scraper.download(&batch, Mode::Average).await.unwrap();
        let committed = commit_batch(&queue_path, &output_path, &aggregate).unwrap();
        assert_eq!(committed.cities, batch);
    }

    assert!(WorkQueue::load(&queue_path).unwrap().is_empty());

    let written = fs::read_to_string(&output_path).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 1 + 3);
    assert!(lines[0].starts_with("city,environment,"));
    assert!(lines[0].ends_with(",average_score"));
    let cities: Vec<&str> = lines[1..]
        .iter()
        .map(|l| l.split(',').next().unwrap())
        .collect();
    assert_eq!(cities, vec!["a_1", "b_2", "c_3"]);
}

fn clone_pages(fetcher: &MockFetcher) -> MockFetcher {
    MockFetcher {
        pages: fetcher.pages.clone(),
        ..MockFetcher::default()
    }
}
