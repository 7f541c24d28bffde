use chrono::Utc;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use orderflow::application::engine::{Dependencies, FulfillmentEngine};
use orderflow::config::Config;
use orderflow::domain::ports::StoreRef;
use orderflow::infrastructure::in_memory::{InMemoryDirectory, InMemoryStore};
#[cfg(feature = "storage-rocksdb")]
use orderflow::infrastructure::rocksdb::RocksDBStore;
use orderflow::interfaces::csv::contact_reader::ContactReader;
use orderflow::interfaces::csv::product_reader::ProductReader;
use orderflow::interfaces::csv::report_writer::ReportWriter;
use orderflow::interfaces::script::ScriptRunner;
use orderflow::telemetry;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs a JSON-lines script of engine operations and prints the final
    /// product stock and order status as CSV.
    Run {
        /// Script file, one operation per line
        script: PathBuf,

        /// Catalog CSV (`id,name,price,stock,active`) imported before the script
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Runs one reminder sweep.
    Sweep {
        /// Customer contacts CSV (`user_id,email,name`) used to address reminders
        #[arg(long)]
        contacts: Option<PathBuf>,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

fn open_store(db_path: Option<PathBuf>) -> Result<StoreRef> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => Ok(Arc::new(RocksDBStore::open(path)?)),
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => Err(miette::miette!(
            "--db-path requires the storage-rocksdb feature"
        )),
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Run {
            script,
            catalog,
            db_path,
        } => {
            let store = open_store(db_path)?;
            let directory = Arc::new(InMemoryDirectory::new());
            let deps = Dependencies::from_config(&config, store, directory.clone())?;
            let engine = FulfillmentEngine::new(deps, &config);

            if let Some(catalog) = catalog {
                let file = File::open(catalog).into_diagnostic()?;
                let mut products = Vec::new();
                for product in ProductReader::new(file).products() {
                    match product {
                        Ok(product) => products.push(product),
                        Err(e) => warn!(error = %e, "Skipping catalog row"),
                    }
                }
                engine.inventory.import(products).await?;
            }

            let file = File::open(script).into_diagnostic()?;
            let mut runner = ScriptRunner::new(engine.clone(), directory);
            let summary = runner.run(BufReader::new(file)).await?;
            info!(executed = summary.executed, failed = summary.failed, "Script finished");

            let stdout = io::stdout();
            let mut writer = ReportWriter::new(stdout.lock());
            writer.write_products(&engine.inventory.products().await?)?;
            writer.write_orders(&engine.orders.orders().await?)?;
        }
        Command::Sweep { contacts, db_path } => {
            let store = open_store(db_path)?;
            let directory = Arc::new(InMemoryDirectory::new());
            if let Some(contacts) = contacts {
                let file = File::open(contacts).into_diagnostic()?;
                for contact in ContactReader::new(file).contacts() {
                    match contact {
                        Ok((user_id, contact)) => directory.register(user_id, contact).await,
                        Err(e) => warn!(error = %e, "Skipping contact row"),
                    }
                }
            }
            let deps = Dependencies::from_config(&config, store, directory)?;
            let engine = FulfillmentEngine::new(deps, &config);
            let report = engine.reminders.sweep(Utc::now()).await?;
            println!(
                "cart_reminders={} payment_reminders={} skipped={} failed={}",
                report.cart_reminders, report.payment_reminders, report.skipped, report.failed
            );
        }
    }

    Ok(())
}
