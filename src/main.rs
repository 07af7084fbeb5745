//! functest - runs functional tests against the emulator, simulator or board

use clap::Parser;
use functest::cli::{self, Cli};
use functest::common::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.debug);

    let code = cli::run(cli).await;
    std::process::exit(code);
}
