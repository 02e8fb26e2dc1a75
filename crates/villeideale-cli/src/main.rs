use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use villeideale::store::{WorkQueue, commit_batch};
use villeideale::types::{CityId, Mode};
use villeideale::{PageFetcher, ScraperOptions, WebScraper};

#[derive(Parser)]
#[command(name = "villeideale")]
#[command(about = "An incremental ville-ideale.fr ratings scraper", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Args)]
struct FetchArgs {
    #[arg(
        long,
        value_parser = parse_mode,
        default_value = "average",
        help = "What to scrape: 'average' or 'comments'"
    )]
    mode: Mode,

    #[arg(
        long = "delay-ms",
        default_value_t = 1000,
        help = "Pause after every page fetch, in milliseconds"
    )]
    delay_ms: u64,

    #[cfg(feature = "render")]
    #[arg(long, help = "Render pages in a headless browser instead of plain HTTP")]
    render: bool,

    #[cfg(feature = "render")]
    #[arg(long, requires = "render", help = "Show the browser window")]
    headed: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the next cities of the work queue and append them to the results file
    Run {
        #[command(flatten)]
        fetch: FetchArgs,

        #[arg(long, default_value = "data/city_list.csv", help = "Work queue file")]
        queue: PathBuf,

        #[arg(long, default_value = "data/city_info.csv", help = "Results file to append to")]
        output: PathBuf,

        #[arg(
            short = 'n',
            long = "count",
            default_value_t = 10,
            help = "Number of queued cities to scrape in this run"
        )]
        count: usize,

        #[arg(long, help = "Show a progress bar")]
        progress: bool,

        #[arg(long, help = "Leave the fetcher open once the batch is done")]
        keep_open: bool,
    },
    /// Scrape a single city and print the result
    City {
        #[arg(help = "City identifier, e.g. morangis_91432")]
        id: String,

        #[command(flatten)]
        fetch: FetchArgs,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Show how many cities are left in the work queue
    Queue {
        #[arg(long, default_value = "data/city_list.csv", help = "Work queue file")]
        queue: PathBuf,

        #[arg(long, default_value_t = 10, help = "Number of upcoming cities to list")]
        show: usize,
    },
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    Mode::from_str(s).map_err(|e| e.to_string())
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

struct RunPlan {
    mode: Mode,
    queue: PathBuf,
    output: PathBuf,
    count: usize,
    progress: bool,
}

async fn run_batch<F: PageFetcher>(mut scraper: WebScraper<F>, plan: RunPlan) {
    let queue = WorkQueue::load(&plan.queue).unwrap_or_else(|e| {
        log::error!("Error loading work queue {}: {}", plan.queue.display(), e);
        process::exit(1);
    });

    if queue.is_empty() {
        log::info!("Work queue {} is empty, nothing to do", plan.queue.display());
        if let Err(e) = scraper.close().await {
            log::warn!("Failed to close fetcher: {}", e);
        }
        return;
    }

    let batch = queue.head(plan.count);
    log::info!(
        "Scraping {} of {} queued cities ({})...",
        batch.len(),
        queue.len(),
        plan.mode
    );

    let bar = if plan.progress {
        let bar = ProgressBar::new(batch.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        Some(bar)
    } else {
        None
    };

    let aggregate = scraper
        .download_with_progress(&batch, plan.mode, |city| {
            if let Some(bar) = &bar {
                bar.set_message(city.to_string());
                bar.inc(1);
            }
        })
        .await
        .unwrap_or_else(|e| {
            log::error!("Batch aborted, work queue left untouched: {}", e);
            process::exit(1);
        });

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let committed = commit_batch(&plan.queue, &plan.output, &aggregate).unwrap_or_else(|e| {
        log::error!("Error saving batch to {}: {}", plan.output.display(), e);
        process::exit(1);
    });

    println!(
        "Scraped {} cities, appended {} row(s) to {}",
        committed.cities.len(),
        committed.rows,
        plan.output.display()
    );
}

async fn scrape_city<F: PageFetcher>(
    mut scraper: WebScraper<F>,
    city: CityId,
    mode: Mode,
    format: OutputFormat,
) {
    let aggregate = scraper
        .download(std::slice::from_ref(&city), mode)
        .await
        .unwrap_or_else(|e| {
            log::error!("Error scraping {}: {}", city, e);
            process::exit(1);
        });

    match format {
        OutputFormat::Json => serialize_json(&aggregate),
        OutputFormat::Text => {
            for (id, table) in aggregate.iter() {
                let code = id.insee_code().unwrap_or("?");
                println!("{} (INSEE {})", id, code);
                println!("{}", table);
            }
        }
    }
}

fn options(fetch: &FetchArgs, close_fetcher: bool) -> ScraperOptions {
    ScraperOptions {
        delay: Duration::from_millis(fetch.delay_ms),
        close_fetcher,
    }
}

#[cfg(feature = "render")]
async fn browser_scraper(
    fetch: &FetchArgs,
    options: ScraperOptions,
) -> Option<WebScraper<villeideale::fetcher::BrowserFetcher>> {
    if !fetch.render {
        return None;
    }
    let fetcher = villeideale::fetcher::BrowserFetcher::launch(!fetch.headed)
        .await
        .unwrap_or_else(|e| {
            log::error!("Error launching browser: {}", e);
            process::exit(1);
        });
    Some(WebScraper::new(fetcher, options))
}

fn http_scraper(options: ScraperOptions) -> WebScraper<villeideale::HttpFetcher> {
    WebScraper::http(options).unwrap_or_else(|e| {
        log::error!("Error creating scraper: {}", e);
        process::exit(1);
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    match cli.command {
        Commands::Run {
            fetch,
            queue,
            output,
            count,
            progress,
            keep_open,
        } => {
            let options = options(&fetch, !keep_open);
            let plan = RunPlan {
                mode: fetch.mode,
                queue,
                output,
                count,
                progress,
            };

            #[cfg(feature = "render")]
            {
                if let Some(scraper) = browser_scraper(&fetch, options.clone()).await {
                    run_batch(scraper, plan).await;
                    return;
                }
            }

            run_batch(http_scraper(options), plan).await;
        }

        Commands::City { id, fetch, format } => {
            let options = options(&fetch, true);
            let city = CityId::new(id);

            #[cfg(feature = "render")]
            {
                if let Some(scraper) = browser_scraper(&fetch, options.clone()).await {
                    scrape_city(scraper, city, fetch.mode, format).await;
                    return;
                }
            }

            scrape_city(http_scraper(options), city, fetch.mode, format).await;
        }

        Commands::Queue { queue, show } => {
            let work_queue = WorkQueue::load(&queue).unwrap_or_else(|e| {
                log::error!("Error loading work queue {}: {}", queue.display(), e);
                process::exit(1);
            });

            if work_queue.is_empty() {
                println!("No cities left in {}.", queue.display());
                return;
            }

            for (i, city) in work_queue.head(show).iter().enumerate() {
                println!("{:>3}. {}", i + 1, city);
            }
            println!("\n{} cities left in {}", work_queue.len(), queue.display());
        }
    }
}
