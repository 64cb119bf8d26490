use std::{io::Read, path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result};
use chrono::Duration;
use clap::{Args, Parser, Subcommand};
use sqlease::{Context, LeaseRecord, LeaseTable, Lessor, SqliteStore};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlease", version, about, long_about = None)]
struct Cli {
    /// SQLite database holding the lease table
    #[arg(long, env = "SQLEASE_DB")]
    db: PathBuf,

    #[command(flatten)]
    table: TableArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TableArgs {
    #[arg(long, default_value = "")]
    table: String,
    #[arg(long, default_value = "")]
    name_column: String,
    #[arg(long, default_value = "")]
    exp_column: String,
    #[arg(long, default_value = "")]
    key_column: String,
}

impl From<TableArgs> for LeaseTable {
    fn from(args: TableArgs) -> Self {
        LeaseTable {
            table: args.table,
            name: args.name_column,
            exp: args.exp_column,
            key: args.key_column,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Prints DDL for the lease table; run it yourself
    Schema,
    /// Acquires a lease and prints it as JSON
    Acquire {
        name: String,
        /// Seconds until the lease expires
        #[arg(long, default_value_t = 30)]
        ttl: i64,
    },
    /// Renews the lease read as JSON from stdin and prints the result
    Renew {
        #[arg(long, default_value_t = 30)]
        ttl: i64,
    },
    /// Releases the lease read as JSON from stdin
    Release,
}

fn read_record() -> Result<LeaseRecord> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading lease from stdin")?;
    serde_json::from_str(&input).context("parsing lease")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let table = LeaseTable::from(cli.table);

    if let Commands::Schema = cli.command {
        for ddl in table.recommended_schema() {
            println!("{ddl};");
        }
        return Ok(());
    }

    debug!(db = %cli.db.display(), table = table.table_name(), "opening store");
    let store = SqliteStore::open(&cli.db)
        .with_context(|| format!("opening {}", cli.db.display()))?;
    let lessor = Arc::new(Lessor::with_table(Arc::new(store), table));
    let ctx = Context::background();

    match cli.command {
        Commands::Schema => {}
        Commands::Acquire { name, ttl } => {
            let lease = lessor.acquire_for(&ctx, &name, Duration::seconds(ttl)).await?;
            println!("{}", serde_json::to_string(lease.record())?);
        }
        Commands::Renew { ttl } => {
            let mut lease = lessor.attach(read_record()?);
            lease.renew_for(&ctx, Duration::seconds(ttl)).await?;
            println!("{}", serde_json::to_string(lease.record())?);
        }
        Commands::Release => {
            lessor.attach(read_record()?).release(&ctx).await?;
        }
    }
    Ok(())
}
