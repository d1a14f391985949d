//! Stratus CLI: declarative AWS resources with waiters that know when work is done.

use clap::Parser;
use stratus::logging::LogFormat;

#[derive(Parser, Debug)]
#[command(
    name = "stratus",
    version,
    about = "Declarative AWS provisioning with BLAKE3 state and provenance events"
)]
struct Cli {
    /// Log level for stratus itself (STRATUS_LOG overrides)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: stratus::cli::Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = stratus::logging::init(&cli.log_level, cli.log_format) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = stratus::cli::dispatch(cli.command).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
