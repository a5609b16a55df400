//! Operator entry point for the Stride scheduling engine.
//!
//! # Responsibility
//! - Apply migrations, run the periodic sweep, and inspect free slots and
//!   current pricing against a database file.
//! - Keep output line-oriented for scripting.

use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use stride_core::{
    open_db_with_timeout, CallType, EngineConfig, EngineContext, LogNotifier, OccupancyPricer,
    ReservationService, SweepService, SystemClock,
};

#[derive(Parser)]
#[command(name = "stride")]
#[command(about = "Recurring commitment scheduling and slot allocation engine")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "STRIDE_CONFIG")]
    config: Option<PathBuf>,

    /// Database file (overrides `[database].path`)
    #[arg(long, env = "STRIDE_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations and exit
    Migrate,
    /// Expire overdue task instances and generate missing cycle ranges
    Sweep,
    /// List free slots of a mentor calendar on one date
    Slots {
        #[arg(long)]
        mentor: i64,
        /// Calendar-local date, YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value = "mentorship")]
        call_type: CallType,
    },
    /// Quote the current mentorship price of a mentor
    Price {
        #[arg(long)]
        mentor: i64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config `{}`", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    stride_core::init_from_config(&config.logging).map_err(anyhow::Error::msg)?;

    let conn = open_db_with_timeout(&config.database.path, config.lock_timeout())
        .with_context(|| format!("opening database `{}`", config.database.path.display()))?;
    let clock = SystemClock;
    let notifier = LogNotifier;
    let ctx = EngineContext::new(&conn, &clock, &notifier, &config);

    match cli.command {
        Command::Migrate => {
            println!("schema_version={}", stride_core::db::migrations::latest_version());
        }
        Command::Sweep => {
            let report = SweepService::new(ctx).run()?;
            println!(
                "expired={} cycles_filled={} inserted={} failures={}",
                report.expired,
                report.cycles_filled,
                report.instances_inserted,
                report.failures.len()
            );
            for (cycle_id, code) in &report.failures {
                eprintln!("cycle_id={cycle_id} error_code={code}");
            }
            for failure in &report.action_failures {
                eprintln!(
                    "cycle_id={} action_id={} error_code={}",
                    failure.cycle_id, failure.action_id, failure.error_code
                );
            }
        }
        Command::Slots {
            mentor,
            date,
            call_type,
        } => {
            let slots = ReservationService::new(ctx).available_slots(mentor, date, call_type)?;
            for slot in &slots {
                println!(
                    "{} {}-{} starts_at={}",
                    slot.date,
                    slot.start,
                    slot.end,
                    slot.starts_at.to_rfc3339()
                );
            }
            info!(
                "event=cli_slots module=cli status=ok mentor_id={mentor} count={}",
                slots.len()
            );
        }
        Command::Price { mentor } => {
            let quote = OccupancyPricer::new(&config.pricing).price(&conn, mentor, ctx.now())?;
            println!(
                "mentor_id={} base_price={} booked={} booked_hours={:.1} capacity_hours={:.1} rate={:.2} multiplier={} final_price={}",
                quote.mentor_id,
                quote.base_price,
                quote.booked,
                quote.booked_hours,
                quote.capacity_hours,
                quote.occupancy_rate,
                quote.multiplier,
                quote.final_price
            );
        }
    }
    Ok(())
}
