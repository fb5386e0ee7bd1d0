//! Subcommand handlers

use crate::{Cli, Commands, PeriodAction};
use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use ledgerguard::admin;
use ledgerguard::connection::connect_with_config;
use ledgerguard::migration::Migrator;
use ledgerguard::model::NewFiscalPeriod;
use ledgerguard::workflow::{read_opening_balances, OpeningBalanceBatch};
use ledgerguard::{
    BalanceRebuilder, Dispatch, FailureTracker, LedgerConfig, LogNotifier,
    PeriodGuard, PgExecutor, PgStore, PostingOutcome, RebuildMode, Workflows,
};
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("opening balance file {0} has no rows")]
    EmptyImport(PathBuf),
    #[error("balances drifted on {0} account(s); re-run with --apply to correct them")]
    BalanceDrift(usize),
}

pub fn run(cli: &Cli) -> Result<()> {
    let mut config = LedgerConfig::load_from(&cli.config).context("loading configuration")?;
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }

    match &cli.command {
        Commands::Migrate { status } => handle_migrate(&config, *status),
        Commands::RebuildBalances { account, apply } => {
            handle_rebuild(&config, account.as_deref(), *apply)
        }
        Commands::Failures { all, json } => handle_failures(&config, *all, *json),
        Commands::OpeningBalances {
            file,
            batch,
            date,
            created_by,
        } => handle_opening_balances(&config, file, *batch, *date, *created_by),
        Commands::Period { action } => handle_period(&config, action),
        Commands::Serve { bind } => {
            let bind = bind.clone().unwrap_or_else(|| config.admin.bind.clone());
            handle_serve(&config, &bind)
        }
    }
}

fn store(config: &LedgerConfig) -> Result<PgStore> {
    PgStore::connect(&config.database).context("connecting to database")
}

fn handle_migrate(config: &LedgerConfig, status_only: bool) -> Result<()> {
    let client = connect_with_config(&config.database).context("connecting to database")?;
    let executor = PgExecutor::new(client);
    let migrator = Migrator::embedded(config.database.migration_lock_timeout_seconds);

    if status_only {
        let status = migrator.status(&executor)?;
        println!("\n📊 Migration Status\n");
        for record in &status.applied {
            println!(
                "  ✓ m{}_{} ({})",
                record.version,
                record.name,
                record.applied_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        for (version, name) in &status.pending {
            println!("  ⏳ m{version}_{name} (pending)");
        }
        println!(
            "\n📈 Summary: {} applied, {} pending",
            status.applied.len(),
            status.pending.len()
        );
        return Ok(());
    }

    let applied = migrator.up(&executor)?;
    if applied == 0 {
        println!("Schema is up to date");
    } else {
        println!("Applied {applied} migration(s)");
    }
    Ok(())
}

fn handle_rebuild(config: &LedgerConfig, account: Option<&str>, apply: bool) -> Result<()> {
    let store = store(config)?;
    let mode = if apply { RebuildMode::Apply } else { RebuildMode::DryRun };
    let report = BalanceRebuilder::new(&store).rebuild(account, mode)?;

    println!("Checked {} account(s)", report.accounts_checked);
    for correction in &report.corrections {
        println!(
            "  {} {:>10}  stored {:>14}  derived {:>14}  diff {:>14}",
            if report.applied { "fixed".green() } else { "drift".yellow() },
            correction.account_code,
            correction.stored,
            correction.derived,
            correction.difference()
        );
    }
    if !report.applied && !report.is_consistent() {
        return Err(CliError::BalanceDrift(report.corrections.len()).into());
    }
    Ok(())
}

fn handle_failures(config: &LedgerConfig, all: bool, json: bool) -> Result<()> {
    let store = store(config)?;
    let tracker = FailureTracker::new(&store, config.posting.failure_error_max_chars);
    let failures = if all { tracker.all()? } else { tracker.unresolved()? };

    if json {
        println!("{}", serde_json::to_string_pretty(&failures)?);
        return Ok(());
    }
    if failures.is_empty() {
        println!("No {}posting failures", if all { "" } else { "unresolved " });
        return Ok(());
    }
    for failure in &failures {
        let state = if failure.is_resolved() {
            "resolved".green()
        } else {
            "open".red()
        };
        println!(
            "{:<8} {:<40} attempts={:<3} last={}  {}",
            state,
            failure.source.to_string(),
            failure.attempts,
            failure.last_attempt_at.format("%Y-%m-%d %H:%M:%S"),
            failure.last_error
        );
    }
    Ok(())
}

fn handle_opening_balances(
    config: &LedgerConfig,
    file: &Path,
    batch_id: i64,
    entry_date: chrono::NaiveDate,
    created_by: Option<uuid::Uuid>,
) -> Result<()> {
    let reader = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let rows = read_opening_balances(reader).with_context(|| format!("reading {}", file.display()))?;
    if rows.is_empty() {
        return Err(CliError::EmptyImport(file.to_path_buf()).into());
    }

    let store = store(config)?;
    let notifier = LogNotifier;
    let mut workflows = Workflows::new(&store, &config.posting);
    if config.alerts.enabled {
        workflows = workflows.with_notifier(&notifier);
    }
    let batch = OpeningBalanceBatch {
        batch_id,
        entry_date,
        rows,
        created_by,
    };
    match workflows.post_opening_balances(&batch, Dispatch::Synchronous)? {
        PostingOutcome::Posted(outcome) if outcome.created => println!(
            "Posted {} for {}",
            outcome.entry.journal_number, outcome.entry.total_debit
        ),
        PostingOutcome::Posted(outcome) => println!(
            "Batch {batch_id} was already posted as {}",
            outcome.entry.journal_number
        ),
        PostingOutcome::Skipped(reason) => println!("Nothing posted: {reason:?}"),
        PostingOutcome::Deferred => println!("Posting deferred"),
    }
    Ok(())
}

fn handle_period(config: &LedgerConfig, action: &PeriodAction) -> Result<()> {
    let store = store(config)?;
    let guard = PeriodGuard::new(&store);
    match action {
        PeriodAction::Create { name, start, end } => {
            let period = guard.create_period(NewFiscalPeriod {
                name: name.clone(),
                start_date: *start,
                end_date: *end,
            })?;
            println!("Created period {} (id {})", period.name, period.id);
        }
        PeriodAction::Close { id, by } => {
            let period = guard.close_period(*id, *by)?;
            println!("Period {} is {}", period.name, period.status);
        }
        PeriodAction::Lock { id } => {
            let period = guard.lock_period(*id)?;
            println!("Period {} is {}", period.name, period.status);
        }
        PeriodAction::List => {
            for period in guard.list()? {
                println!(
                    "{:>4}  {:<12} {} .. {}  {}",
                    period.id, period.name, period.start_date, period.end_date, period.status
                );
            }
        }
    }
    Ok(())
}

fn handle_serve(config: &LedgerConfig, bind: &str) -> Result<()> {
    let pg = store(config)?;
    if !pg.executor().check_health().context("database health check")? {
        return Err(anyhow!("database health check returned no row"));
    }
    drop(pg);
    let server = admin::serve_database(config.database.clone(), bind)
        .with_context(|| format!("binding {bind}"))?;
    println!("📊 Admin endpoint running at http://{bind}/health");
    server
        .join()
        .map_err(|e| anyhow!("admin server stopped: {e:?}"))?;
    Ok(())
}
