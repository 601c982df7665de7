//! Zeroconf discovery of instruments on the local network.
//!
//! Instruments advertise their JSONL service over mDNS. A [`Discovery`]
//! session browses for the service type, resolves each advertisement into a
//! [`Endpoint::Net`] candidate and hands candidates out through a bounded
//! queue. A session lives for at most one collection window and is torn
//! down unconditionally afterwards, even on timeout.

use std::net::IpAddr;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;

use crate::endpoint::{DEFAULT_PORT, Endpoint};
use crate::error::{Error, Result};

/// mDNS service type instruments advertise under.
pub const SERVICE_TYPE: &str = "_tether-jsonl._tcp.local.";

/// A bounded-lifetime discovery session.
pub struct Discovery {
    // Taken on teardown so close stays idempotent.
    daemon: Option<ServiceDaemon>,
    found: mpsc::Receiver<Endpoint>,
}

impl Discovery {
    /// Start browsing for instruments. Candidates accumulate in the
    /// background until one of the `find_*` calls collects them.
    pub fn start() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;
        let browse = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| Error::Discovery(e.to_string()))?;
        let (tx, found) = mpsc::channel(4);

        tokio::spawn(async move {
            while let Ok(event) = browse.recv_async().await {
                let ServiceEvent::ServiceResolved(info) = event else {
                    continue;
                };
                tracing::debug!(fullname = %info.get_fullname(), "advertisement received");
                let Some(endpoint) = candidate(&info).await else {
                    continue;
                };
                // A closed queue means the collection window is already
                // over; late records are simply dropped.
                if tx.send(endpoint).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            daemon: Some(daemon),
            found,
        })
    }

    /// Session over a pre-wired candidate queue with no browser behind it.
    #[cfg(test)]
    fn from_channel(found: mpsc::Receiver<Endpoint>) -> Self {
        Self { daemon: None, found }
    }

    /// Wait for the first candidate or for the window to elapse, whichever
    /// happens first, then tear the session down.
    pub async fn find_one(mut self, window: Duration) -> Option<Endpoint> {
        let result = tokio::time::timeout(window, self.found.recv())
            .await
            .ok()
            .flatten();
        match &result {
            Some(endpoint) => tracing::debug!(%endpoint, "discovery decided"),
            None => tracing::debug!("discovery timed out"),
        }
        self.close();
        result
    }

    /// Collect every candidate that arrives within the window, then tear
    /// the session down.
    pub async fn find_all(mut self, window: Duration) -> Vec<Endpoint> {
        let deadline = tokio::time::Instant::now() + window;
        let mut results = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, self.found.recv()).await {
                Ok(Some(endpoint)) => results.push(endpoint),
                Ok(None) | Err(_) => break,
            }
        }
        self.close();
        results
    }

    fn close(&mut self) {
        let Some(daemon) = self.daemon.take() else {
            return;
        };
        if let Err(e) = daemon.stop_browse(SERVICE_TYPE) {
            tracing::debug!("stop_browse: {e}");
        }
        if let Err(e) = daemon.shutdown() {
            tracing::debug!("daemon shutdown: {e}");
        }
    }
}

/// A session dropped without collecting still stops the background browse.
impl Drop for Discovery {
    fn drop(&mut self) {
        self.close();
    }
}

/// Turn one advertisement into a network endpoint on the standard port.
async fn candidate(info: &ServiceInfo) -> Option<Endpoint> {
    let addresses = info.get_addresses();
    // Instruments announce v4 first and foremost; fall back to whatever
    // else is in the record.
    let announced = addresses
        .iter()
        .copied()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.iter().copied().next())?;
    let hostname = info.get_hostname();
    let resolved = resolve(hostname).await;
    Some(Endpoint::Net {
        host: pick_host(hostname, &resolved, announced),
        port: DEFAULT_PORT,
    })
}

async fn resolve(hostname: &str) -> Vec<IpAddr> {
    match tokio::net::lookup_host((hostname.trim_end_matches('.'), DEFAULT_PORT)).await {
        Ok(addrs) => addrs.map(|addr| addr.ip()).collect(),
        Err(_) => Vec::new(),
    }
}

/// Prefer the advertised hostname when it resolves to the announced
/// address: it is friendlier to display and survives DHCP lease changes.
/// Otherwise fall back to the raw announced address.
fn pick_host(hostname: &str, resolved: &[IpAddr], announced: IpAddr) -> String {
    if resolved.contains(&announced) {
        hostname.trim_end_matches('.').to_string()
    } else {
        announced.to_string()
    }
}
