//! # Mail Insight CLI (`mail-insight`)
//!
//! ## Usage
//!
//! ```bash
//! mail-insight --config ./config/mail-insight.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mail-insight serve` | Start the HTTP server |
//! | `mail-insight analyze <files>...` | Analyze local files as one mail, print JSON |
//! | `mail-insight query <collection> <subcollection>` | Run a collection-join query, print JSON |
//! | `mail-insight check` | Validate config and show the resolved providers |
//!
//! A `.env` file in the working directory is loaded before anything else.
//! When the config file does not exist, built-in defaults are used.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use mail_insight::attachment::{load_path, LoadOptions};
use mail_insight::completion::create_client;
use mail_insight::config::{self, format_size, Config};
use mail_insight::process::{process_mail, DEFAULT_MAIL_ID};
use mail_insight::query::{
    parse_filters, query_with_subcollection, COLLECTION_PREFIX, SUBCOLLECTION_PREFIX,
};
use mail_insight::store::create_store;
use mail_insight::{logging, server};

/// Mail Insight: structured extraction from emails and their attachments.
#[derive(Parser)]
#[command(name = "mail-insight", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mail-insight.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Analyze local files as the attachments of one mail.
    ///
    /// Files that fail to load are reported on stderr and skipped.
    Analyze {
        /// Mail identifier.
        #[arg(long, default_value = DEFAULT_MAIL_ID)]
        mail_id: String,

        /// Attachment files.
        files: Vec<PathBuf>,
    },

    /// Query a collection and nest each parent's subcollection.
    Query {
        collection: String,
        subcollection: String,

        /// Parent equality filter, `field=value`. Repeatable.
        #[arg(long = "where", value_name = "FIELD=VALUE")]
        parent_filters: Vec<String>,

        /// Child equality filter, `field=value`. Repeatable.
        #[arg(long = "sub-where", value_name = "FIELD=VALUE")]
        child_filters: Vec<String>,
    },

    /// Validate configuration and print what would be used.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Analyze { mail_id, files } => run_analyze(&cfg, &mail_id, &files).await?,
        Commands::Query {
            collection,
            subcollection,
            parent_filters,
            child_filters,
        } => {
            run_query(
                &cfg,
                &collection,
                &subcollection,
                &parent_filters,
                &child_filters,
            )
            .await?
        }
        Commands::Check => run_check(&cfg)?,
    }

    Ok(())
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    tracing::info!(path = %path.display(), "config file not found, using defaults");
    let mut cfg = Config::minimal();
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}

async fn run_analyze(cfg: &Config, mail_id: &str, files: &[PathBuf]) -> Result<()> {
    let client = create_client(&cfg.completion)?;
    let options = LoadOptions {
        extract_documents: cfg.attachments.extract_documents,
    };

    let mut attachments = Vec::with_capacity(files.len());
    for path in files {
        match load_path(path, options).await {
            Ok(a) => attachments.push(a),
            Err(e) => eprintln!("skipping {}: {}", path.display(), e),
        }
    }

    let response = process_mail(client.as_ref(), mail_id, &attachments).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_query(
    cfg: &Config,
    collection: &str,
    subcollection: &str,
    parent_filters: &[String],
    child_filters: &[String],
) -> Result<()> {
    let store = create_store(&cfg.store)?;

    let mut params = Vec::new();
    for (prefix, raw) in parent_filters
        .iter()
        .map(|f| (COLLECTION_PREFIX, f))
        .chain(child_filters.iter().map(|f| (SUBCOLLECTION_PREFIX, f)))
    {
        let (field, value) = raw
            .split_once('=')
            .with_context(|| format!("filter '{}' is not FIELD=VALUE", raw))?;
        params.push((format!("{}{}", prefix, field), value.to_string()));
    }

    let filters = parse_filters(params);
    let records = query_with_subcollection(store.as_ref(), collection, subcollection, &filters)
        .await?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn run_check(cfg: &Config) -> Result<()> {
    let client = create_client(&cfg.completion)?;
    let store = create_store(&cfg.store)?;
    let api_key = cfg.auth.resolve_key()?;

    println!("bind:         {}", cfg.server.bind);
    println!("max upload:   {}", format_size(cfg.server.max_upload_bytes));
    println!(
        "auth:         {}",
        if api_key.is_some() {
            "X-API-Key required"
        } else {
            "disabled"
        }
    );
    println!("completion:   {} ({})", cfg.completion.provider, client.model_name());
    println!("store:        {}", store.name());
    println!(
        "extraction:   {}",
        if cfg.attachments.extract_documents {
            "pdf/docx text enabled"
        } else {
            "utf-8 only"
        }
    );
    println!("OK");
    Ok(())
}
