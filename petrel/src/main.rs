use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::dev::DevArgs;

mod config;
mod dev;
mod error;
mod observability;

#[derive(Parser)]
#[command(name = "petrel")]
#[command(about = "Blob-container log ingestion engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the poll loop against an in-memory store seeded with sample blobs
    Dev {
        #[clap(flatten)]
        inner: DevArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    observability::init_observability();

    let cli = Cli::parse();

    let ct = CancellationToken::new();

    let ct_clone = ct.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ct_clone.cancel();
    });

    let result = match cli.command {
        Commands::Dev { inner } => inner.run(ct).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.kind().exit_code();
            eprintln!("{}", snafu::Report::from_error(err));
            ExitCode::from(code as u8)
        }
    }
}
