use std::io;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use cmd::Status;

mod cmd;
mod config;
mod net;

/// Find the hardware address of an IPv4 host by pinging it over raw Ethernet.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(flatten)]
    ping: cmd::Ping,

    /// log more to stderr (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match usage_error(&err) {
            Some(msg) => {
                println!("{msg}");
                return ExitCode::from(Status::BadArgs.code());
            }
            None => {
                let _ = err.print();
                return ExitCode::SUCCESS;
            }
        },
    };
    init_logging(cli.verbose);

    let status = match cli.ping.exec() {
        Ok(status) => status,
        Err(err) => {
            println!("{err:#}");
            Status::InitFailed
        }
    };
    ExitCode::from(status.code())
}

/// Diagnostic for a command line that could not be used; `None` for help
/// and version requests.
fn usage_error(err: &clap::Error) -> Option<String> {
    err.use_stderr()
        .then(|| err.render().to_string().trim_end().to_owned())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_err(args: &[&str]) -> clap::Error {
        match Cli::try_parse_from(args) {
            Ok(_) => panic!("{args:?} parsed"),
            Err(err) => err,
        }
    }

    #[test]
    fn missing_host_is_a_usage_error() {
        let msg = usage_error(&parse_err(&["ethping"])).unwrap();
        assert!(msg.contains("<HOST>"), "{msg}");
    }

    #[test]
    fn help_is_not_a_usage_error() {
        assert!(usage_error(&parse_err(&["ethping", "--help"])).is_none());
        assert!(usage_error(&parse_err(&["ethping", "--version"])).is_none());
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["ethping", "-vv", "192.0.2.7"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
