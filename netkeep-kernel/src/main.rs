/**
 * NETKEEP KERNEL - Démon de synchronisation périodique
 *
 * RÔLE : Charge la configuration, ouvre le registre, puis lance sync_all_hosts
 * toutes les `sync_interval_secs` jusqu'à Ctrl-C.
 */

use anyhow::{Context, Result};
use netkeep_kernel::{load_config, NetKeep};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("netkeep_kernel=info")),
        )
        .init();

    info!("netkeep kernel starting...");

    let cfg = load_config().await;
    let interval_secs = cfg.discovery.sync_interval_secs.max(1);
    let netkeep = NetKeep::from_config(&cfg)
        .await
        .context("Failed to initialize netkeep")?;

    info!(
        "[kernel] {} hosts configured, sync every {}s",
        netkeep.hosts().list().len(),
        interval_secs
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = netkeep.sync_all_hosts().await;
                match report.data {
                    Some(report) => {
                        for failed in report.results.iter().filter(|r| !r.success) {
                            warn!(
                                "[kernel] {} failed: {}",
                                failed.host_id,
                                failed.error.as_deref().unwrap_or("unknown error")
                            );
                        }
                    }
                    None => error!("[kernel] sync failed: {}", report.error.unwrap_or_default()),
                }
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("[kernel] signal handler failed: {}", e);
                }
                info!("[kernel] shutting down");
                break;
            }
        }
    }

    Ok(())
}
