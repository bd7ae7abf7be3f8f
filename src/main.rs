use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use socialite::aggregator::{Aggregator, SearchRequest, DEFAULT_DAYS_AHEAD, DEFAULT_LIMIT};
use socialite::config::Settings;
use socialite::{logging, metrics, server};

#[derive(Parser)]
#[command(name = "socialite")]
#[command(about = "Event discovery aggregator: fans out to event providers and merges the results")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search all active providers and print the result as JSON
    Search {
        #[arg(long)]
        city: String,
        /// ISO-2 country code, e.g. LT
        #[arg(long)]
        country: String,
        #[arg(long, default_value_t = DEFAULT_DAYS_AHEAD)]
        days_ahead: i64,
        #[arg(long, default_value_t = 0)]
        start_in_days: i64,
        /// Include mock/test providers
        #[arg(long)]
        include_mock: bool,
        /// Optional keyword filter
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// date, price_asc, price_desc or relevance
        #[arg(long, default_value = "date")]
        sort: String,
        /// Interest keywords for relevance sorting (comma-separated)
        #[arg(long, value_delimiter = ',')]
        interests: Vec<String>,
    },
    /// List discovered providers
    Providers {
        #[arg(long)]
        include_mock: bool,
    },
    /// Print the provider discovery ledger
    Diagnostics,
    /// Run the HTTP API
    Serve {
        /// Overrides SOCIALITE_PORT
        #[arg(long)]
        port: Option<u16>,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();
    metrics::init_metrics();

    let cli = Cli::parse();
    let settings = Settings::load().context("loading settings")?;
    let aggregator = Aggregator::new(settings);

    match cli.command {
        Commands::Search {
            city,
            country,
            days_ahead,
            start_in_days,
            include_mock,
            query,
            limit,
            offset,
            sort,
            interests,
        } => {
            let request = SearchRequest {
                city,
                country,
                days_ahead,
                start_in_days,
                include_mock,
                query,
                limit,
                offset,
                sort,
                interests,
            };
            let response = aggregator.search_events(&request).await?;
            print_json(&response)?;
        }
        Commands::Providers { include_mock } => {
            print_json(&serde_json::json!({
                "providers": aggregator.list_providers(include_mock)
            }))?;
        }
        Commands::Diagnostics => {
            print_json(&aggregator.diagnostics())?;
        }
        Commands::Serve { port: override_port } => {
            let port = override_port.unwrap_or(aggregator.settings().port);
            info!(port, "starting HTTP API");
            server::start_server(Arc::new(aggregator), port).await?;
        }
    }
    Ok(())
}
