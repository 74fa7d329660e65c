//! System discovery for managed hosts
//!
//! This module handles:
//! - Running ~15 information categories through the `Prober`
//! - Optional structured extraction by an enrichment service
//! - Manual regex fallback (OS, hostname, kernel, architecture)
//! - Package update counts and a coarse health status

pub mod commands;
pub mod parse;
pub mod updates;

use crate::error::{Error, ExecError};
use crate::models::{Host, HostStatus};
use crate::remote::Prober;
use async_trait::async_trait;
use parse::{HealthSnapshot, RawFacts};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use updates::UpdateSummary;

/// Confidence reported when the manual fallback produced the structured fields.
pub const MANUAL_CONFIDENCE: f32 = 0.6;

/// Structured fields extracted by an enrichment service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichedFacts {
    pub os_name: Option<String>,
    pub hostname: Option<String>,
    pub kernel: Option<String>,
    pub architecture: Option<String>,
    pub summary: Option<String>,
    pub confidence: f32,
}

/// Best-effort structured extraction from raw system text.
#[async_trait]
pub trait SystemInfoEnricher: Send + Sync {
    async fn enrich(&self, raw: &RawFacts) -> Result<EnrichedFacts, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    Enriched,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemDiscovery {
    pub success: bool,
    pub host_id: String,
    /// Opaque advisory value, not a calibrated probability
    pub confidence: f32,
    pub method: Option<DiscoveryMethod>,
    pub os_name: Option<String>,
    pub hostname: Option<String>,
    pub kernel: Option<String>,
    pub architecture: Option<String>,
    pub summary: Option<String>,
    pub updates: Option<UpdateSummary>,
    pub health: HealthSnapshot,
    pub status: HostStatus,
    pub raw: RawFacts,
    pub error: Option<String>,
}

impl SystemDiscovery {
    fn failed(host: &Host, error: String) -> Self {
        Self {
            success: false,
            host_id: host.id.clone(),
            confidence: 0.0,
            method: None,
            os_name: None,
            hostname: None,
            kernel: None,
            architecture: None,
            summary: None,
            updates: None,
            health: HealthSnapshot::default(),
            status: HostStatus::Offline,
            raw: RawFacts::new(),
            error: Some(error),
        }
    }
}

pub struct SystemDiscoverer {
    prober: Prober,
    enricher: Option<Arc<dyn SystemInfoEnricher>>,
}

impl SystemDiscoverer {
    pub fn new(prober: Prober, enricher: Option<Arc<dyn SystemInfoEnricher>>) -> Self {
        Self { prober, enricher }
    }

    /// Collect every category; a connection failure aborts the whole fact sheet.
    pub async fn collect_raw(&self, host: &Host) -> Result<RawFacts, ExecError> {
        let mut raw = RawFacts::new();
        for (category, candidates) in commands::CATEGORIES {
            if let Some(output) = self.prober.probe_strict(host, candidates).await? {
                raw.insert(category.to_string(), output);
            } else {
                debug!("[{}] category {} unknown", host.id, category);
            }
        }
        Ok(raw)
    }

    pub async fn discover(&self, host: &Host) -> SystemDiscovery {
        info!("[{}] starting system discovery", host.id);

        let raw = match self.collect_raw(host).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("[{}] discovery failed: {}", host.id, e);
                return SystemDiscovery::failed(host, e.to_string());
            }
        };

        let updates = updates::discover_updates(&self.prober, host).await;
        let health = HealthSnapshot::from_facts(&raw);
        let status = health.status();

        let enriched = match &self.enricher {
            Some(enricher) => match enricher.enrich(&raw).await {
                Ok(facts) => Some(facts),
                Err(e) => {
                    warn!("[{}] enrichment failed, using manual parsing: {}", host.id, e);
                    None
                }
            },
            None => None,
        };

        let mut result = SystemDiscovery {
            success: true,
            host_id: host.id.clone(),
            confidence: MANUAL_CONFIDENCE,
            method: Some(DiscoveryMethod::Manual),
            os_name: None,
            hostname: None,
            kernel: None,
            architecture: None,
            summary: None,
            updates,
            health,
            status,
            raw,
            error: None,
        };

        match enriched {
            Some(facts) => {
                result.method = Some(DiscoveryMethod::Enriched);
                result.confidence = facts.confidence;
                result.summary = facts.summary;
                // Champs manquants complétés par le parsing manuel
                result.os_name = facts.os_name.or_else(|| parse::extract_os_name(&result.raw));
                result.hostname = facts.hostname.or_else(|| parse::extract_hostname(&result.raw));
                result.kernel = facts.kernel.or_else(|| parse::extract_kernel(&result.raw));
                result.architecture = facts.architecture.or_else(|| parse::extract_architecture(&result.raw));
            }
            None => {
                result.os_name = parse::extract_os_name(&result.raw);
                result.hostname = parse::extract_hostname(&result.raw);
                result.kernel = parse::extract_kernel(&result.raw);
                result.architecture = parse::extract_architecture(&result.raw);
            }
        }

        info!(
            "[{}] discovery complete - OS: {}, status: {:?}, {} categories",
            host.id,
            result.os_name.as_deref().unwrap_or("unknown"),
            result.status,
            result.raw.len()
        );
        result
    }
}
