use anyhow::Result;
use clap::Parser;

use config::{Cli, Command, ExaminerConfig};

mod config;
mod dispatch;
mod error;
mod examiner;
mod gtfs_db;
mod gtfs_model;
mod import_gtfs;
mod next_trips;
mod sampling;
mod schedule;
mod service_day;
mod sink;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .with_module_level("sqlx", log::LevelFilter::Warn)
        .init()?;

    match cli.command {
        Command::Examine(args) => {
            let config = ExaminerConfig::from_args(args, &std::env::current_dir()?)?;
            log::debug!("{:?}", config.plan);
            examiner::examine(&config).await?;
        }
        Command::Import(args) => {
            import_gtfs::import_gtfs(&args.gtfs, &args.db).await?;
        }
    }
    Ok(())
}
