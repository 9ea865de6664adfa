use anyhow::Result;
use clap::Parser;
use freshness::cli::{self, Cli, LogLevelArg};
use tokio::runtime::Runtime;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Routes all log::info!() etc. to the debug log file; mirrors to stderr
    // when RUST_LOG is set. CLI --log-level takes precedence over RUST_LOG.
    freshness::debug::init_log_bridge(cli.log_level.map(LogLevelArg::to_level_filter));

    let runtime = Runtime::new()?;
    let result = runtime.block_on(cli::run(cli));

    // A probe stuck in a blocking read must not hold the process open.
    runtime.shutdown_timeout(std::time::Duration::from_secs(2));

    match result {
        Ok(0) => Ok(()),
        // Non-zero exit: no state left to drop.
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("freshness: error: {e:#}");
            Err(e)
        }
    }
}
