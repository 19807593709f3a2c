use anyhow::{anyhow, Context, Result};
use bill_core::catalog::{self, BillFilter, CatalogQuery, SortOrder};
use bill_core::config::AppConfig;
use bill_core::detail::{self, HttpBillSource};
use bill_core::ingest::{self, SqliteBatchWriter};
use bill_core::progress;
use bill_core::schema::{BillSummary, FetchParams};
use bill_core::{db, favorites};
use clap::{Parser, Subcommand};
use schemars::schema_for;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "billsearch")]
#[command(about = "Legislative bill search: ingestion, catalog and detail cache", long_about = None)]
struct Cli {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "billsearch.toml")]
    config: PathBuf,

    /// Override the database path from the config
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export canonical JSON Schemas to the ./schemas directory
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
    /// Ingest a bulk bill CSV export into aggregate documents
    Ingest {
        file: PathBuf,

        /// Storage object name; checked against the upload filter before ingesting
        #[arg(long)]
        object_name: Option<String>,
    },
    /// Classify a latest-action string into a progress stage
    Classify { status: Option<String> },
    /// Search the ingested catalog
    Search {
        #[arg(long, default_value = "")]
        query: String,
        #[arg(long)]
        congress: Option<String>,
        #[arg(long)]
        sponsor: Option<String>,
        /// best | alphabetical | date
        #[arg(long, default_value = "best")]
        sort: SortOrder,
        /// Print the available filter values instead of results
        #[arg(long)]
        options: bool,
    },
    /// Show bill detail, served from cache while fresh
    Detail {
        #[arg(long)]
        congress: String,
        #[arg(long = "type")]
        bill_type: String,
        #[arg(long)]
        number: String,
    },
    /// Manage a user's favorite bills
    Favorites {
        #[command(subcommand)]
        command: FavoriteCommands,
    },
    /// Show a user's profile
    Profile {
        #[arg(long)]
        uid: String,
        #[arg(long)]
        email: Option<String>,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for canonical types
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum FavoriteCommands {
    /// Add a catalog bill to the user's favorites
    Add {
        #[arg(long)]
        uid: String,
        bill_id: String,
    },
    /// List the user's favorites
    List {
        #[arg(long)]
        uid: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(Some(&cli.config))?;
    if let Some(db_path) = cli.db {
        config.db_path = db_path;
    }

    match cli.command {
        Commands::Schema { command } => match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        },
        Commands::Ingest { file, object_name } => ingest_file(&config, file, object_name),
        Commands::Classify { status } => {
            let stage = progress::classify(status.as_deref());
            println!("{} {}", stage.index(), stage.label());
            Ok(())
        }
        Commands::Search {
            query,
            congress,
            sponsor,
            sort,
            options,
        } => {
            let query = CatalogQuery {
                text: query,
                filter: BillFilter { congress, sponsor },
                sort,
            };
            search(&config, &query, options)
        }
        Commands::Detail {
            congress,
            bill_type,
            number,
        } => show_detail(
            &config,
            FetchParams {
                congress,
                bill_type,
                number,
            },
        ),
        Commands::Favorites { command } => match command {
            FavoriteCommands::Add { uid, bill_id } => add_favorite(&config, &uid, &bill_id),
            FavoriteCommands::List { uid } => {
                let conn = db::open(&config.db_path)?;
                let favorites = favorites::get_favorites(&conn, &uid)?;
                println!("{}", serde_json::to_string_pretty(&favorites)?);
                Ok(())
            }
        },
        Commands::Profile { uid, email } => {
            let conn = db::open(&config.db_path)?;
            let profile = favorites::get_profile(&conn, &uid, email.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
    }
}

fn schema_export(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    let schemas = [
        ("BillRecord", schema_for!(bill_core::schema::BillRecord)),
        ("AggregateDocument", schema_for!(bill_core::schema::AggregateDocument)),
        ("BillSummary", schema_for!(bill_core::schema::BillSummary)),
        ("BillDetail", schema_for!(bill_core::schema::BillDetail)),
    ];
    for (name, schema) in schemas {
        let json = serde_json::to_string_pretty(&schema)?;
        fs::write(out_dir.join(format!("{name}.schema.json")), json)?;
    }

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}

fn ingest_file(config: &AppConfig, file: PathBuf, object_name: Option<String>) -> Result<()> {
    if let Some(object_name) = object_name.as_deref() {
        if let Some(reason) = ingest::skip_reason(object_name, &config.ingest) {
            info!("ignoring {object_name}: {reason}");
            return Ok(());
        }
    }

    let reader = BufReader::new(
        File::open(&file).with_context(|| format!("opening {}", file.display()))?,
    );
    let conn = db::open(&config.db_path)?;
    let mut writer = SqliteBatchWriter::new(&conn, config.ingest.collection.as_str());
    let report = ingest::ingest(
        reader,
        &mut writer,
        config.ingest.batch_size,
        OffsetDateTime::now_utc(),
    )?;

    println!(
        "Ingested {} bills ({} rows read, {} skipped) into {} aggregate documents",
        report.records, report.rows_read, report.rows_skipped, report.batches_written
    );
    Ok(())
}

fn load_summaries(config: &AppConfig) -> Result<Vec<BillSummary>> {
    let conn = db::open(&config.db_path)?;
    let bills = catalog::load_catalog(&conn, &config.ingest.collection)?;
    Ok(bills.iter().map(BillSummary::from_record).collect())
}

fn search(config: &AppConfig, query: &CatalogQuery, options: bool) -> Result<()> {
    let summaries = load_summaries(config)?;

    if options {
        let options = catalog::filter_options(&summaries);
        println!("Congress: {}", options.congresses.join(", "));
        println!("Sponsors: {}", options.sponsors.join(", "));
        return Ok(());
    }

    let hits = catalog::run_query(&summaries, query);
    for bill in &hits {
        let stage = progress::classify(Some(bill.last_action.description.as_str()));
        println!(
            "{:<16} {:<14} [{}] {}",
            bill.id,
            bill.introduced_date,
            stage.label(),
            bill.title
        );
    }
    println!("{} of {} bills", hits.len(), summaries.len());
    Ok(())
}

fn show_detail(config: &AppConfig, params: FetchParams) -> Result<()> {
    let conn = db::open(&config.db_path)?;
    let source = HttpBillSource::new()?;
    let detail = detail::get_bill_detail(&conn, &source, config, &params, OffsetDateTime::now_utc())
        .map_err(|err| anyhow!("detail request failed ({}): {err}", err.status()))?;

    let stage = progress::classify(Some(detail.meta.status.as_str()));
    println!("{}", serde_json::to_string_pretty(&detail)?);
    println!("Progress: {} ({}/5)", stage.label(), stage.index());
    Ok(())
}

fn add_favorite(config: &AppConfig, uid: &str, bill_id: &str) -> Result<()> {
    let summary = load_summaries(config)?
        .into_iter()
        .find(|bill| bill.id == bill_id)
        .ok_or_else(|| anyhow!("no bill {bill_id} in the catalog"))?;

    let conn = db::open(&config.db_path)?;
    let added = favorites::save_favorite(
        &conn,
        uid,
        &serde_json::to_value(&summary)?,
        OffsetDateTime::now_utc(),
    )?;
    if added {
        println!("Saved {bill_id} to favorites");
    } else {
        println!("{bill_id} is already a favorite");
    }
    Ok(())
}
