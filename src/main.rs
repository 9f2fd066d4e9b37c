//! kind-harness binary
//!
//! Exits non-zero when the scenario fails.

use clap::Parser;

use kind_harness::telemetry::init_tracing;
use kind_harness::{Cli, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;
    cli.run().await
}
