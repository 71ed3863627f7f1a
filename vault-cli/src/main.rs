// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

use vault_core::idm::UnixIdm;
use vault_core::{Branch, Config};

use vault_cli::actions::{gather, Session, ViewContext, EXIT_INVALID};

#[derive(Parser)]
#[command(name = "vault")]
#[command(about = "Annotate files for retention, archival or recovery")]
struct Cli {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// File retention operations
    Keep {
        /// View files annotated for retention
        #[arg(long, value_name = "CONTEXT", num_args = 0..=1, default_missing_value = "all")]
        view: Option<ViewContext>,

        /// Use absolute file paths
        #[arg(long)]
        absolute: bool,

        /// File of file names to keep
        #[arg(long, value_name = "FOFN", conflicts_with = "files")]
        fofn: Option<PathBuf>,

        /// Files to keep (at most 10)
        #[arg(value_name = "FILE")]
        files: Vec<PathBuf>,
    },

    /// File archival operations
    Archive {
        /// View files annotated for archival
        #[arg(long, value_name = "CONTEXT", num_args = 0..=1, default_missing_value = "all")]
        view: Option<ViewContext>,

        /// View files staged for archival; these will be archived soon
        #[arg(long, value_name = "CONTEXT", num_args = 0..=1, default_missing_value = "all", conflicts_with = "view")]
        view_staged: Option<ViewContext>,

        /// Archive without deleting the source file
        #[arg(long)]
        stash: bool,

        /// Use absolute file paths
        #[arg(long)]
        absolute: bool,

        /// File of file names to archive
        #[arg(long, value_name = "FOFN", conflicts_with = "files")]
        fofn: Option<PathBuf>,

        /// Files to archive (at most 10)
        #[arg(value_name = "FILE")]
        files: Vec<PathBuf>,
    },

    /// File recovery operations
    Recover {
        /// View recoverable files
        #[arg(long, value_name = "CONTEXT", num_args = 0..=1, default_missing_value = "all")]
        view: Option<ViewContext>,

        /// Use absolute file paths
        #[arg(long)]
        absolute: bool,

        /// Recover all recoverable files
        #[arg(long, conflicts_with_all = ["view", "files", "fofn"])]
        all: bool,

        /// File of file names to recover
        #[arg(long, value_name = "FOFN", conflicts_with = "files")]
        fofn: Option<PathBuf>,

        /// Files to recover
        #[arg(value_name = "FILE")]
        files: Vec<PathBuf>,
    },

    /// Untrack files annotated for retention or archival
    Untrack {
        /// File of file names to untrack
        #[arg(long, value_name = "FOFN", conflicts_with = "files")]
        fofn: Option<PathBuf>,

        /// Files to untrack
        #[arg(value_name = "FILE")]
        files: Vec<PathBuf>,
    },
}

/// The ≤10-file cap on annotation verbs; FOFN input is uncapped.
const FILE_CAP: usize = 10;

fn main() {
    tracing_subscriber::fmt().with_target(false).init();
    std::process::exit(run(Cli::parse()));
}

fn run(cli: Cli) -> i32 {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return EXIT_INVALID;
        }
    };

    let idm = UnixIdm;
    let session = Session {
        config: &config,
        idm: &idm,
        caller: nix::unistd::getuid().as_raw(),
    };

    match cli.action {
        Action::Keep {
            view,
            absolute,
            fofn,
            files,
        } => match view {
            Some(context) => session.view(Branch::Keep, context, absolute),
            None => {
                if absolute {
                    return invalid("--absolute requires --view");
                }
                with_files(&files, fofn.as_deref(), Some(FILE_CAP), |targets| {
                    session.add(Branch::Keep, targets)
                })
            }
        },

        Action::Archive {
            view,
            view_staged,
            stash,
            absolute,
            fofn,
            files,
        } => {
            if let Some(context) = view {
                return session.view(Branch::Archive, context, absolute);
            }
            if let Some(context) = view_staged {
                return session.view(Branch::Staged, context, absolute);
            }
            if absolute {
                return invalid("--absolute requires --view or --view-staged");
            }

            let branch = if stash { Branch::Stash } else { Branch::Archive };
            with_files(&files, fofn.as_deref(), Some(FILE_CAP), |targets| {
                session.add(branch, targets)
            })
        }

        Action::Recover {
            view,
            absolute,
            all,
            fofn,
            files,
        } => {
            if let Some(context) = view {
                return session.view(Branch::Limbo, context, absolute);
            }
            if absolute {
                return invalid("--absolute requires --view");
            }
            if all {
                return session.recover(true, &[]);
            }
            with_files(&files, fofn.as_deref(), None, |targets| {
                session.recover(false, targets)
            })
        }

        Action::Untrack { fofn, files } => {
            with_files(&files, fofn.as_deref(), None, |targets| {
                session.untrack(targets)
            })
        }
    }
}

fn with_files(
    files: &[PathBuf],
    fofn: Option<&std::path::Path>,
    cap: Option<usize>,
    action: impl FnOnce(&[PathBuf]) -> i32,
) -> i32 {
    match gather(files, fofn, cap) {
        Ok(targets) => action(&targets),
        Err(message) => invalid(&message),
    }
}

fn invalid(message: &str) -> i32 {
    error!("{message}");
    EXIT_INVALID
}
