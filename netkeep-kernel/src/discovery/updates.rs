use super::commands::{APT_UPGRADABLE_LISTING, PACKAGE_MANAGERS};
use super::parse::count_security_updates;
use crate::models::Host;
use crate::remote::Prober;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub package_manager: String,
    pub available: u32,
    /// Only known for apt
    pub security: Option<u32>,
}

/// Count pending updates with the first package manager present on the host.
pub async fn discover_updates(prober: &Prober, host: &Host) -> Option<UpdateSummary> {
    for (name, check, count_cmd) in PACKAGE_MANAGERS {
        match prober.run(host, check).await {
            Ok(path) if !path.trim().is_empty() => {}
            _ => continue,
        }
        debug!("[{}] package manager: {}", host.id, name);

        let available = match prober.run(host, count_cmd).await {
            Ok(out) => out.trim().parse().unwrap_or_else(|_| {
                warn!("[{}] unexpected {} update count output: {:?}", host.id, name, out);
                0
            }),
            Err(e) => {
                warn!("[{}] {} update count failed: {}", host.id, name, e);
                return None;
            }
        };

        let security = if *name == "apt" {
            prober
                .run(host, APT_UPGRADABLE_LISTING)
                .await
                .ok()
                .map(|listing| count_security_updates(&listing))
        } else {
            None
        };

        return Some(UpdateSummary {
            package_manager: name.to_string(),
            available,
            security,
        });
    }
    None
}
