use std::process::ExitCode;

use clap::{Parser, Subcommand};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::{
    dev::DevArgs,
    error::{ObservabilitySnafu, Result},
    provision::{ProvisionArgs, ReconcileArgs, RefreshQuotaArgs},
};

mod allocations;
mod args;
mod dev;
mod error;
mod provision;
mod session;

#[derive(Parser)]
#[command(name = "nese")]
#[command(about = "NESE bucket provisioner")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision buckets for pending allocations
    Provision {
        #[clap(flatten)]
        inner: ProvisionArgs,
    },
    /// Push the quota of an allocation to its bucket
    RefreshQuota {
        #[clap(flatten)]
        inner: RefreshQuotaArgs,
    },
    /// Correct bucket quotas that drifted from their allocation
    Reconcile {
        #[clap(flatten)]
        inner: ReconcileArgs,
    },
    /// Run the provisioner against in-memory backends
    Dev {
        #[clap(flatten)]
        inner: DevArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let ct = CancellationToken::new();

    let ct_clone = ct.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ct_clone.cancel();
    });

    match run(cli, ct).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.kind().exit_code();
            eprintln!("{}", snafu::Report::from_error(err));
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli, ct: CancellationToken) -> Result<()> {
    nese_observability::init_observability(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .context(ObservabilitySnafu)?;

    match cli.command {
        Commands::Provision { inner } => inner.run(ct).await,
        Commands::RefreshQuota { inner } => inner.run(ct).await,
        Commands::Reconcile { inner } => inner.run(ct).await,
        Commands::Dev { inner } => inner.run(ct).await,
    }
}
