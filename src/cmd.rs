use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use crossbeam_channel::{bounded, Receiver};
use tracing::debug;

use crate::config::{Config, Mode, OutgoingInterface, ReplyMatching, DEFAULT_RETRIES};
use crate::net::{resolver, InterfaceName};

mod ping;

/// How a run ended, mapped one to one onto the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Resolved,
    BadArgs,
    InitFailed,
    Unresolved,
    Interrupted,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Resolved => 0,
            Status::BadArgs => 1,
            Status::InitFailed => 2,
            Status::Unresolved => 3,
            Status::Interrupted => 130,
        }
    }
}

#[derive(Args, Debug)]
pub struct Ping {
    /// IPv4 address of the host, in dotted-decimal form.
    host: String,

    /// how the peer hardware address is learned.
    #[arg(long, value_enum, default_value_t = Mode::Raw)]
    mode: Mode,

    /// send from this interface instead of the first one discovered.
    #[arg(short, long, value_name = "NAME")]
    interface: Option<InterfaceName>,

    /// extra echo exchanges after a failed one.
    #[arg(long, default_value_t = DEFAULT_RETRIES)]
    retries: u32,

    /// receive timeout in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// only accept replies carrying our identifier and sequence.
    #[arg(long)]
    strict: bool,
}

impl Ping {
    pub fn exec(self) -> Result<Status> {
        let Some(target) = parse_target(&self.host) else {
            println!("Error. IPv4 address is not correct");
            return Ok(Status::BadArgs);
        };

        let config = self.config();
        debug!(?config, %target, "starting");

        let mut resolver = resolver::open(&config)
            .with_context(|| format!("fail to initialize {:?} mode", config.mode))?;
        let interrupts = ctrl_channel().context("fail to set Ctrl-C handler")?;

        let mut session = ping::Session::new(resolver.as_mut(), target, config.attempts());
        Ok(session.run(&interrupts))
    }

    fn config(&self) -> Config {
        Config {
            mode: self.mode,
            outgoing_interface: match self.interface {
                Some(name) => OutgoingInterface::Named(name),
                None => OutgoingInterface::FirstDiscovered,
            },
            reply_matching: if self.strict {
                ReplyMatching::Strict
            } else {
                ReplyMatching::Permissive
            },
            recv_timeout: Duration::from_secs(self.timeout),
            retries: self.retries,
        }
    }
}

/// Dotted-decimal IPv4 only; host names are not resolved.
fn parse_target(host: &str) -> Option<Ipv4Addr> {
    Ipv4Addr::from_str(host).ok()
}

fn ctrl_channel() -> Result<Receiver<()>, ctrlc::Error> {
    let (sender, receiver) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = sender.try_send(());
    })?;

    Ok(receiver)
}
