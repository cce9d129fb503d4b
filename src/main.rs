use anyhow::Result;
use clap::Parser;
use tellerbook::cli::Cli;
use tellerbook::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);
    cli.run().await
}
