mod aggregate;
mod config;
mod crypto;
mod database;
mod geo;
mod hub;
mod pool;
mod region;
mod registry;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use config::Config;
use hub::Hub;

#[derive(Parser, Debug)]
#[command(name = "uptide-hub", version, about = "Coordination hub for the Uptide validator network")]
struct Args {
    /// Path to the config file (defaults to $XDG_CONFIG_HOME/uptide/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the database path from the config file
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();

    let args = Args::parse();
    let mut config = Config::from_config(args.config.as_ref())?;
    if let Some(database) = args.database {
        config.database.path = database;
    }
    tracing::info!("{}", config);

    let pool = pool::build_pool(&config.database.path).await?;
    Hub::start(config, pool).await
}
