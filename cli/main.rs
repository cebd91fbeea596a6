use clap::{Parser, Subcommand};
use photocollect::database::Pool;
use photocollect::prelude::*;
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "collect")]
#[command(about = "Query a photo catalog through its stored collection filters", long_about = None)]
pub struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:./db/catalog.db")]
    pub database: String,

    #[arg(long, env = "PHOTOCOLLECT_CONFIG", default_value = "./collect.conf")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the current collection statement, its count and the first ids.
    Query {
        #[arg(short, long, default_value_t = 20, help = "Number of ids to print")]
        limit: i64,
    },
    /// Install a serialized rule list and recompute the collection.
    Rules {
        #[arg(help = "Rule list, e.g. 1:0:1:%Canon%$")]
        serialized: String,

        #[arg(short, long, default_value_t = 20, help = "Number of ids to print")]
        limit: i64,
    },
    /// Print the stored rule list in its serialized form.
    DumpRules,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to open catalog {url}")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Arc::new(FileConfig::open(&cli.config)?);

    match cli.command {
        Commands::DumpRules => {
            println!("{}", RuleList::load(config.as_ref()).serialize());
            return Ok(());
        }
        Commands::Query { limit } => {
            let mut view = open_view(&cli.database, &config).await?;
            print_collection(&mut view, limit).await?;
        }
        Commands::Rules { serialized, limit } => {
            RuleList::deserialize(&serialized).store(config.as_ref());

            let mut view = open_view(&cli.database, &config).await?;
            let cameras = CameraIndex::load(view.database()).await?;
            view.update_query(&cameras).await?;
            print_collection(&mut view, limit).await?;
        }
    }

    config.save()?;

    Ok(())
}

async fn open_view(url: &str, config: &Arc<FileConfig>) -> Result<CatalogView, CliError> {
    let connect = |source| CliError::Connect {
        url: url.to_string(),
        source,
    };
    let pool = Pool::connect(url).await.map_err(connect)?;
    let db = Database::with_migration(pool).await.map_err(connect)?;

    let config: Arc<dyn ConfigStore> = config.clone();
    Ok(CatalogView::open(db, config, None).await?)
}

async fn print_collection(view: &mut CatalogView, limit: i64) -> Result<(), CliError> {
    println!("{}", view.query().await?);
    println!("{} images", view.count());

    for id in view.images(0, limit).await? {
        println!("{id}");
    }

    Ok(())
}
