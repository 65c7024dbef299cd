//! Lotbook command-line entry point

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use lotbook_config::{Config, ConfigError};
use lotbook_core::{time, CoreError, Portfolio};
use lotbook_utils::format_money;
use log::{error, info, warn};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lotbook")]
#[command(version = "0.1.0")]
#[command(about = "Import QIF files into a FIFO lot ledger and value holdings at any date", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "lotbook.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a QIF file and rebuild the lot ledger
    Import {
        /// QIF file to import
        file: PathBuf,
    },
    /// Print holdings as of a date
    Holdings {
        /// Valuation date (YYYY-MM-DD), defaults to today
        #[arg(long, value_parser = parse_as_of)]
        as_of: Option<NaiveDate>,
        /// Restrict to these account ids
        #[arg(long = "account")]
        accounts: Vec<String>,
        /// Case-insensitive match on security name, symbol or account name
        #[arg(long)]
        filter: Option<String>,
    },
    /// Print the default configuration file
    InitConfig,
}

fn parse_as_of(value: &str) -> Result<NaiveDate, String> {
    time::parse_date(value).map_err(|e| e.to_string())
}

fn load_config(path: PathBuf) -> anyhow::Result<(Config, Option<ConfigError>)> {
    match Config::load(path) {
        Ok(config) => Ok((config, None)),
        Err(e @ ConfigError::FileNotFound { .. }) => Ok((Config::default(), Some(e))),
        Err(e) => Err(anyhow::anyhow!(e.to_details())),
    }
}

fn init_logging(config: &Config) {
    let env = env_logger::Env::default().default_filter_or(config.logging.level.as_str());
    env_logger::Builder::from_env(env).init();
}

fn report(err: CoreError) -> anyhow::Error {
    let details = err.to_details();
    error!("{}", details);
    anyhow::anyhow!(details)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Command::InitConfig = args.command {
        print!("{}", Config::generate_default());
        return Ok(());
    }

    let (config, missing) = load_config(args.config)?;
    init_logging(&config);
    if let Some(e) = missing {
        warn!("{}, using defaults", e);
    }

    info!("Opening database {}", config.database_path().display());
    let portfolio = Portfolio::open(config).map_err(report)?;

    match args.command {
        Command::Import { file } => {
            info!("Importing {}", file.display());
            let summary = portfolio.import_file(file).await.map_err(report)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Holdings {
            as_of,
            accounts,
            filter,
        } => {
            let as_of = as_of.unwrap_or_else(time::today);
            let mut query = portfolio.query(as_of);
            if !accounts.is_empty() {
                query = query.with_accounts(accounts);
            }
            if let Some(filter) = filter {
                query = query.with_filter(filter);
            }

            let holdings = portfolio.holdings(&query).map_err(report)?;
            let total: f64 = holdings.iter().map(|h| h.market_value).sum();
            info!(
                "{} holdings as of {}, market value {}",
                holdings.len(),
                time::format_date(as_of),
                format_money(total)
            );
            println!(
                "{}",
                serde_json::to_string_pretty(&holdings).context("serializing holdings")?
            );
        }
        Command::InitConfig => {}
    }

    Ok(())
}
