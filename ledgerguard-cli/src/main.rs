//! Ledgerguard operator CLI
//!
//! Schema migrations, balance cache rebuilds, failure listings, opening-balance imports,
//! fiscal period administration and the operator HTTP endpoint.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "ledgerguard")]
#[command(about = "Operator tool for the ledgerguard journal posting engine")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Database connection URL (overrides configuration)
    #[arg(long)]
    database_url: Option<String>,

    /// Configuration file
    #[arg(long, default_value = "config/ledgerguard.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending schema migrations
    Migrate {
        /// Only show applied and pending migrations
        #[arg(long)]
        status: bool,
    },

    /// Compare cached balances with posted lines, optionally fixing drift
    RebuildBalances {
        /// Limit to one account code
        #[arg(long)]
        account: Option<String>,

        /// Write corrected balances (default: dry run)
        #[arg(long)]
        apply: bool,
    },

    /// List journal posting failures
    Failures {
        /// Include resolved failures
        #[arg(long)]
        all: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Import opening balances from CSV (`account_code,amount[,description]`)
    OpeningBalances {
        #[arg(long)]
        file: PathBuf,

        /// Batch id; re-running the same batch posts nothing new
        #[arg(long)]
        batch: i64,

        /// Entry date (YYYY-MM-DD)
        #[arg(long)]
        date: chrono::NaiveDate,

        /// User id recorded as creator
        #[arg(long)]
        created_by: Option<uuid::Uuid>,
    },

    /// Fiscal period administration
    Period {
        #[command(subcommand)]
        action: PeriodAction,
    },

    /// Run the operator HTTP endpoint
    Serve {
        /// Listen address (default: `admin.bind` from configuration)
        #[arg(long)]
        bind: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PeriodAction {
    /// Create an open period
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        start: chrono::NaiveDate,
        #[arg(long)]
        end: chrono::NaiveDate,
    },
    /// Close an open period
    Close {
        id: i64,
        /// User id recorded as closer
        #[arg(long)]
        by: Option<uuid::Uuid>,
    },
    /// Lock a closed period
    Lock { id: i64 },
    /// List periods
    List,
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match commands::run(&cli) {
        Ok(()) => {
            if !cli.quiet {
                println!("{}", "✅ Success".green());
            }
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{} {:#}", "❌ Error:".red(), e);
            process::exit(1);
        }
    }
}
