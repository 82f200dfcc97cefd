use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rebac_core::tuple::{ObjectRef, SubjectRef};

#[derive(Debug, Parser)]
#[command(name = "rebac-server", version)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the index builder workers and the periodic reconciliation sweep.
    Worker,
    Migrate,
    /// Fill structured tuple fields from legacy composite columns.
    NormalizeTuples {
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Enqueue index jobs for drift between tuples and the actor index.
    Reconcile,
    Check {
        subject: SubjectRef,
        action: String,
        object: ObjectRef,
    },
    Grant {
        subject: SubjectRef,
        relation: String,
        object: ObjectRef,
    },
    Revoke {
        subject: SubjectRef,
        relation: String,
        object: ObjectRef,
    },
}
