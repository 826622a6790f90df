use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tracing::info;

use jd_bot::{Bot, Scheduler, TelegramApi};
use jd_core::config::Config;
use jd_core::storage::DigestStore;
use jd_core::{Error, PipelineStats, Result};
use jd_inference::Diagnostics;
use jd_pipeline::Pipeline;
use jd_pubmed::PubMedClient;
use jd_storage::SqliteStore;

#[derive(Parser, Debug)]
#[command(author, version, about = "Daily top-journal digest pipeline and Telegram bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Fetch, summarize, and persist new articles once.
    Pipeline {
        /// Lookback window in days (excluding today); defaults to the
        /// configured window.
        #[arg(long)]
        days_back: Option<u32>,
        /// Cap on articles summarized in this run.
        #[arg(long, default_value_t = 200)]
        limit: u32,
    },
    /// Run the Telegram bot with the daily delivery scheduler.
    Bot,
    /// Print store counts and subscriber totals.
    Status,
}

fn build_pipeline(config: &Config, store: Arc<dyn DigestStore>) -> Result<Pipeline> {
    let source = Arc::new(PubMedClient::new(config)?);
    let model = jd_inference::create_model(config)?;
    let diagnostics = Diagnostics::new(&config.raw_dir);
    Ok(Pipeline::new(store, source, model, diagnostics))
}

fn print_stats(stats: &PipelineStats) {
    println!(
        "Pipeline finished | fetched_new={} | fetched_raw={} | skipped_existing={} | \
         pending={} | summarized={} | failed={} | tokens_in={} | tokens_out={} | \
         tokens_total={} | elapsed_sec={} | fail_reasons={}",
        stats.fetched_new,
        stats.fetched_raw,
        stats.skipped_existing,
        stats.pending,
        stats.summarized,
        stats.failed,
        stats.tokens.input,
        stats.tokens.output,
        stats.tokens.total,
        stats.elapsed_secs,
        stats.fail_reasons_line(),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let store: Arc<SqliteStore> = Arc::new(SqliteStore::open(&config.db_path).await?);

    match cli.command {
        Commands::Pipeline { days_back, limit } => {
            let pipeline = build_pipeline(&config, store)?;
            let stats = pipeline
                .run(days_back.unwrap_or(config.days_back), limit)
                .await?;
            print_stats(&stats);
        }
        Commands::Bot => {
            let token = config
                .telegram_token
                .as_deref()
                .ok_or_else(|| Error::Config("TELEGRAM_BOT_TOKEN is missing".to_string()))?;
            let transport = Arc::new(TelegramApi::new(token)?);
            let pipeline = Arc::new(build_pipeline(&config, store.clone())?);
            let scheduler = Scheduler::new(
                store.clone(),
                transport.clone(),
                pipeline,
                config.timezone,
                config.daily_hour,
                config.daily_minute,
            );
            let bot = Bot::new(
                store,
                transport,
                scheduler,
                config.timezone,
                config.daily_hour,
                config.daily_minute,
            );
            info!("starting bot in {}", config.timezone.name());
            bot.run().await?;
        }
        Commands::Status => {
            let counts = store.article_counts().await?;
            let active = store.active_subscribers().await?.len();
            println!(
                "articles={} summarized={} pending={} active_subscribers={active}",
                counts.total, counts.summarized, counts.pending,
            );
        }
    }

    Ok(())
}
