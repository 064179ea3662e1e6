//! `tablesync` entry-point: loads configuration and runs one command.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;

use clap::Parser;
use color_eyre::eyre::{Context, Result, eyre};
use ortho_config::OrthoConfig;
use tokio::runtime::Builder;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

use tablesync::inbound::{CliArgs, ConnectionOverrides, run};

fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let args = CliArgs::parse();
    let overrides = ConnectionOverrides::load_from_iter([OsString::from("tablesync")])
        .map_err(|error| eyre!("failed to load TABLESYNC_* settings: {error}"))?;

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("create Tokio runtime")?;
    let outcome = runtime
        .block_on(run(&args, &overrides))
        .wrap_err_with(|| format!("{:?} failed", args.command))?;

    println!("{outcome}");
    Ok(())
}
