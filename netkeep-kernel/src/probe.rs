//! Active reachability probing
//!
//! One ICMP echo per check. A probe that cannot run (no raw socket
//! permission, bad address) counts as "no reply", never as an error.

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence};
use tracing::{debug, warn};

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// `true` when the address answered within the probe's timeout.
    async fn responds(&self, ip: &str) -> bool;
}

pub struct IcmpProbe {
    timeout: Duration,
}

impl IcmpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for IcmpProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

fn ping_identifier() -> u16 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    ((nanos % 0xFFFF) as u16).wrapping_add(1)
}

#[async_trait]
impl ReachabilityProbe for IcmpProbe {
    async fn responds(&self, ip: &str) -> bool {
        let addr: IpAddr = match ip.parse() {
            Ok(addr) => addr,
            Err(_) => {
                debug!("[probe] {} is not an IP address", ip);
                return false;
            }
        };

        let config = match addr {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(surge_ping::ICMP::V6).build(),
        };
        let client = match Client::new(&config) {
            Ok(client) => client,
            Err(e) => {
                warn!("[probe] ICMP client unavailable ({}), treating {} as silent", e, ip);
                return false;
            }
        };

        let payload = [0u8; 56];
        let mut pinger = client.pinger(addr, PingIdentifier(ping_identifier())).await;
        pinger.timeout(self.timeout);
        match pinger.ping(PingSequence(0), &payload).await {
            Ok((_, rtt)) => {
                debug!("[probe] {} replied in {:?}", ip, rtt);
                true
            }
            Err(e) => {
                debug!("[probe] {} silent: {}", ip, e);
                false
            }
        }
    }
}
