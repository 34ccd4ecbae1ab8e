mod config;

use std::io::Read;
use std::process::ExitCode;

use clap::Parser;
use lxc_reconcile::{ContainerParams, DesiredState};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Reconcile one Proxmox VE container toward a desired state.
///
/// Connection settings come from `PVE_*` environment variables (or `.env`).
#[derive(Parser, Debug)]
#[command(name = "lxc-ctl", version, about)]
struct Args {
    /// Desired state: active, present, started, stopped, restarted, absent or deleted
    #[arg(short, long)]
    state: DesiredState,

    /// Container parameters as a JSON file, `-` for stdin
    #[arg(short, long, default_value = "-")]
    params: String,

    /// Preferred node for new containers (overrides PVE_NODE)
    #[arg(long)]
    node: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("reading container params: {0}")]
    Read(#[from] std::io::Error),

    #[error("parsing container params: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct Failure {
    failed: bool,
    changed: bool,
    msg: String,
}

fn read_params(source: &str) -> Result<ContainerParams, CliError> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(source)?
    };
    Ok(serde_json::from_str(&raw)?)
}

fn emit(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "failed to render result"),
    }
}

fn fail(changed: bool, msg: String) -> ExitCode {
    emit(&Failure {
        failed: true,
        changed,
        msg,
    });
    ExitCode::FAILURE
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the JSON result only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let (mut connection, params) = match config::connection_from_env()
        .map_err(CliError::from)
        .and_then(|conn| Ok((conn, read_params(&args.params)?)))
    {
        Ok(pair) => pair,
        Err(e) => return fail(false, e.to_string()),
    };
    if args.node.is_some() {
        connection.node = args.node;
    }

    match lxc_reconcile::reconcile(args.state, &connection, &params).await {
        Ok(outcome) => {
            emit(&outcome);
            ExitCode::SUCCESS
        }
        Err(e) => fail(e.changed, e.to_string()),
    }
}
