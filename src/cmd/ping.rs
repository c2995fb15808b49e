use std::net::Ipv4Addr;

use crossbeam_channel::{select, Receiver};
use tracing::{debug, info};

use super::Status;
use crate::net::PeerResolver;

/// Repeats whole echo exchanges until one yields the peer address.
pub struct Session<'a> {
    resolver: &'a mut dyn PeerResolver,
    target: Ipv4Addr,
    attempts: u32,
}

impl<'a> Session<'a> {
    pub fn new(resolver: &'a mut dyn PeerResolver, target: Ipv4Addr, attempts: u32) -> Self {
        Session {
            resolver,
            target,
            attempts,
        }
    }

    /// Prints the peer address on success, one diagnostic per failed
    /// attempt otherwise. An interrupt is only noticed between attempts.
    pub fn run(&mut self, interrupts: &Receiver<()>) -> Status {
        for attempt in 1..=self.attempts {
            let interrupted = select! {
                recv(interrupts) -> msg => msg.is_ok(),
                default => false,
            };
            if interrupted {
                info!(attempt, "interrupted");
                return Status::Interrupted;
            }

            match self.resolver.resolve(self.target) {
                Ok(mac) => {
                    debug!(attempt, target = %self.target, peer = %mac, "resolved");
                    println!("{mac}");
                    return Status::Resolved;
                }
                Err(err) => {
                    println!("{err}");
                    debug!(attempt, attempts = self.attempts, target = %self.target, "echo exchange failed");
                    if err.is_resource() {
                        break;
                    }
                }
            }
        }
        Status::Unresolved
    }
}
