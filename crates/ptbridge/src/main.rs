mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;
use ptbridge_server::BridgeConfig;

use crate::cmd::Command;
use crate::exit::{bridge_error, CliResult};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ptbridge", version, about = "Passthru vehicle interface bridge")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Bridge timing and limits as a JSON file.
    #[arg(long, value_name = "PATH", env = "PTBRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn load_config(path: Option<&PathBuf>) -> CliResult<BridgeConfig> {
    match path {
        Some(path) => BridgeConfig::from_json_file(path)
            .map_err(|err| bridge_error(&format!("loading {}", path.display()), err)),
        None => Ok(BridgeConfig::default()),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result =
        load_config(cli.config.as_ref()).and_then(|config| cmd::run(cli.command, format, config));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
