use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{load_settings, AppStateStore, HttpCatalogFetcher, Orchestrator};
use shared::domain::ProjectId;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const LOG_VAR: &str = "CATALOG_LOG";

/// Fetch the project catalog and print the resulting application state as JSON.
#[derive(Parser, Debug)]
#[command(name = "catalog")]
struct Args {
    /// Catalog server, e.g. http://127.0.0.1:8000
    #[arg(long)]
    server_url: Option<String>,
    /// Settings file (defaults to ./catalog.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Load this year's projects after startup ("working" for the working directory)
    #[arg(long)]
    year: Option<String>,
    /// Select this project out of the loaded list
    #[arg(long)]
    project: Option<String>,
    /// Print the state on a single line
    #[arg(long)]
    compact: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref());
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    info!(server_url = %settings.server_url, "catalog: using server");

    let fetcher = HttpCatalogFetcher::from_settings(&settings)
        .context("failed to set up catalog client")?;
    let store = AppStateStore::global();
    store.observe(|state, fields| {
        debug!(
            ?fields,
            years = state.years.len(),
            projects = state.projects.len(),
            "catalog: state updated"
        );
    });
    let orchestrator = Orchestrator::new(Arc::new(fetcher), Arc::clone(&store));

    let report = orchestrator.start().wait().await;
    for (branch, err) in report.failures() {
        eprintln!("{branch}: {err}");
    }
    if report.all_failed() {
        bail!("every startup fetch failed against {}", settings.server_url);
    }

    if let Some(year) = args.year.as_deref() {
        orchestrator
            .select_year(year)
            .await
            .with_context(|| format!("failed to load projects for {year}"))?;
    }
    if let Some(project) = args.project {
        orchestrator.select_project(&ProjectId::from(project))?;
    }

    let state = store.get();
    let rendered = if args.compact {
        serde_json::to_string(&state)?
    } else {
        serde_json::to_string_pretty(&state)?
    };
    println!("{rendered}");

    Ok(())
}
