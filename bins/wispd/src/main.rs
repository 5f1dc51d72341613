use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

use crate::config::Config;
use crate::daemon::Daemon;

mod config;
mod daemon;
mod etx;
mod routes;
mod sysctl;

#[derive(Parser)]
#[command(name = "wispd", about = "OLSRv2 mesh routing daemon")]
struct Cli {
    /// Sets a custom config file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "/etc/wisp/wispd.toml"
    )]
    config: PathBuf,

    /// Enables verbose output on STDOUT
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let cfg = Config::from_file(&cli.config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let daemon = Daemon::new(cfg)?;
        daemon.run().await
    })
}
