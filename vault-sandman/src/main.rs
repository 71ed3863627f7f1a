// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use std::time::SystemTime;

use clap::Parser;
use tracing::{error, info, warn};

use vault_core::idm::UnixIdm;
use vault_core::{Config, Error};
use vault_db::{system_time_to_unix, Db, OpenMode};
use vault_sandman::drain::drain;
use vault_sandman::interrupt;
use vault_sandman::mail::PipePostman;
use vault_sandman::notify::notify;
use vault_sandman::sweep::Sweeper;
use vault_sandman::walk::{FilesystemWalker, StatListingWalker, Walker};
use vault_sandman::SweepError;

/// Exit codes shared with the user CLI.
const EXIT_OK: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_INVALID: i32 = 2;
const EXIT_NO_VAULT: i32 = 3;

#[derive(Parser)]
#[command(name = "sandman")]
#[command(about = "Sweep vault-covered trees and drain the archive backlog")]
struct Args {
    /// Log decisions without touching the filesystem or the database;
    /// the drain phase does not run
    #[arg(long)]
    dry_run: bool,

    /// Drain regardless of the staging threshold
    #[arg(long)]
    force_drain: bool,

    /// Walk a pre-computed, gzipped stat listing instead of the
    /// filesystem
    #[arg(long, value_name = "FILE")]
    stats: Option<PathBuf>,

    /// Directories to sweep; each must be covered by a vault
    #[arg(required = true, value_name = "DIR")]
    dirs: Vec<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    std::process::exit(run(args));
}

fn run(args: Args) -> i32 {
    interrupt::install();
    info!("Enter Sandman");
    if args.dry_run {
        info!("Dry run: the filesystem will not be affected and the drain phase will not run");
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return EXIT_INVALID;
        }
    };

    let mut db = match Db::open(&config.persistence.database, OpenMode::Create) {
        Ok(db) => db,
        Err(e) => {
            error!("{e}");
            return EXIT_FAILURE;
        }
    };

    let idm = UnixIdm;
    let now = system_time_to_unix(SystemTime::now());

    // Housekeeping from previous runs
    if let Err(e) = db.purge(now) {
        error!("{e}");
        return EXIT_FAILURE;
    }

    info!("Starting the sweep phase");
    let walker: Box<dyn Walker + '_> = match &args.stats {
        Some(stats) => {
            info!("Walking stat listing from {}", stats.display());
            warn!("Stat listing data may not be up to date");
            match StatListingWalker::new(stats, &args.dirs, &idm, now) {
                Ok(walker) => Box::new(walker),
                Err(e) => return walker_failure(e),
            }
        }
        None => {
            info!("Walking the filesystem directly");
            warn!("This is an expensive operation");
            match FilesystemWalker::new(&args.dirs, &idm, now) {
                Ok(walker) => Box::new(walker),
                Err(e) => return walker_failure(e),
            }
        }
    };

    let mut sweeper = match Sweeper::new(&config, &mut db, &idm, args.dry_run, now) {
        Ok(sweeper) => sweeper,
        Err(e) => {
            error!("{e}");
            return EXIT_FAILURE;
        }
    };
    match sweeper.sweep(walker.as_ref()) {
        Ok(()) => {}
        Err(SweepError::Interrupted) => {
            info!("Sweep interrupted; the in-flight decision was committed");
            return EXIT_OK;
        }
        Err(e) => {
            error!("Sweep aborted: {e}");
            return EXIT_FAILURE;
        }
    }

    let mut code = EXIT_OK;
    if !args.dry_run {
        let postman = PipePostman::new(&config.email.command, &config.email.sender);
        if let Err(e) = notify(&mut db, &config, &idm, &postman) {
            error!("Notification failed: {e}");
            return EXIT_FAILURE;
        }

        if let Err(e) = db.purge(now) {
            error!("{e}");
            return EXIT_FAILURE;
        }

        info!("Starting the drain phase");
        code = drain(&mut db, &config, args.force_drain);
    }

    info!("Off to Never, Neverland");
    code
}

fn walker_failure(e: SweepError) -> i32 {
    error!("{e}");
    match e {
        SweepError::Vault(Error::NoVault(_)) => EXIT_NO_VAULT,
        SweepError::Vault(Error::IsVault(_)) => EXIT_INVALID,
        _ => EXIT_FAILURE,
    }
}
