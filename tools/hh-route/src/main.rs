mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use hh_route::logging::init_logging;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format, "info");
    cli.run()
}
