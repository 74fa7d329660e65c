//! Manual extraction from the raw fact sheet
//!
//! Used when no enrichment service is configured or it fails, and for the
//! numeric health snapshot in every case.

use crate::models::HostStatus;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type RawFacts = BTreeMap<String, String>;

lazy_static! {
    static ref PRETTY_NAME: Regex = Regex::new(r#"(?m)^PRETTY_NAME="?([^"\n]+)"?"#).unwrap();
    static ref OS_NAME: Regex = Regex::new(r#"(?m)^NAME="?([^"\n]+)"?"#).unwrap();
    static ref VERSION_ID: Regex = Regex::new(r#"(?m)^VERSION_ID="?([^"\n]+)"?"#).unwrap();
    static ref LSB_DESCRIPTION: Regex = Regex::new(r"(?m)^Description:\s*(.+)$").unwrap();
    static ref PRODUCT_NAME: Regex = Regex::new(r"(?m)^ProductName:\s*(.+)$").unwrap();
    static ref PRODUCT_VERSION: Regex = Regex::new(r"(?m)^ProductVersion:\s*(.+)$").unwrap();
    static ref LINUX_VERSION: Regex = Regex::new(r"Linux version (\S+)").unwrap();
    static ref MEM_TOTAL: Regex = Regex::new(r"(?m)^MemTotal:\s+(\d+)").unwrap();
    static ref MEM_AVAILABLE: Regex = Regex::new(r"(?m)^MemAvailable:\s+(\d+)").unwrap();
    static ref LOAD_AVERAGE: Regex = Regex::new(r"load averages?:\s*([\d.]+)").unwrap();
    static ref LSCPU_COUNT: Regex = Regex::new(r"(?m)^CPU\(s\):\s*(\d+)").unwrap();
}

fn capture<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures(text)?.get(1).map(|m| m.as_str().trim())
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|l| !l.is_empty())
}

pub fn extract_os_name(raw: &RawFacts) -> Option<String> {
    let text = raw.get("os_release")?;
    if let Some(name) = capture(&PRETTY_NAME, text) {
        return Some(name.to_string());
    }
    if let Some(name) = capture(&OS_NAME, text) {
        let version = capture(&VERSION_ID, text);
        return Some(match version {
            Some(v) => format!("{name} {v}"),
            None => name.to_string(),
        });
    }
    if let Some(desc) = capture(&LSB_DESCRIPTION, text) {
        return Some(desc.to_string());
    }
    if let Some(product) = capture(&PRODUCT_NAME, text) {
        let version = capture(&PRODUCT_VERSION, text).unwrap_or_default();
        return Some(format!("{product} {version}").trim().to_string());
    }
    first_line(text).map(str::to_string)
}

pub fn extract_hostname(raw: &RawFacts) -> Option<String> {
    raw.get("hostname").and_then(|t| first_line(t)).map(str::to_string)
}

pub fn extract_kernel(raw: &RawFacts) -> Option<String> {
    let text = raw.get("kernel")?;
    if let Some(version) = capture(&LINUX_VERSION, text) {
        return Some(version.to_string());
    }
    first_line(text).map(str::to_string)
}

pub fn extract_architecture(raw: &RawFacts) -> Option<String> {
    raw.get("architecture").and_then(|t| first_line(t)).map(str::to_string)
}

/// Numeric health indicators parsed from the fact sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub memory_percent: Option<f32>,
    pub disk_percent: Option<f32>,
    pub load_1m: Option<f32>,
    pub cpu_count: Option<u32>,
}

impl HealthSnapshot {
    pub fn from_facts(raw: &RawFacts) -> Self {
        Self {
            memory_percent: raw.get("memory").and_then(|t| parse_memory_percent(t)),
            disk_percent: raw.get("disk").and_then(|t| parse_disk_percent(t)),
            load_1m: raw.get("load").and_then(|t| parse_load(t)),
            cpu_count: raw.get("cpu").and_then(|t| parse_cpu_count(t)),
        }
    }

    pub fn status(&self) -> HostStatus {
        let memory = self.memory_percent.unwrap_or(0.0);
        let disk = self.disk_percent.unwrap_or(0.0);
        if memory >= 95.0 || disk >= 95.0 {
            return HostStatus::Critical;
        }
        let overloaded = match (self.load_1m, self.cpu_count) {
            (Some(load), Some(cpus)) if cpus > 0 => load >= 2.0 * cpus as f32,
            _ => false,
        };
        if memory >= 85.0 || disk >= 85.0 || overloaded {
            return HostStatus::Warning;
        }
        HostStatus::Online
    }
}

fn percent(used: f64, total: f64) -> Option<f32> {
    if total <= 0.0 {
        return None;
    }
    Some((used / total * 100.0) as f32)
}

pub fn parse_memory_percent(text: &str) -> Option<f32> {
    // free -m
    if let Some(line) = text.lines().find(|l| l.trim_start().starts_with("Mem:")) {
        let cols: Vec<f64> = line.split_whitespace().skip(1).filter_map(|c| c.parse().ok()).collect();
        // total used free shared buff/cache available
        if cols.len() >= 6 {
            return percent(cols[0] - cols[5], cols[0]);
        }
        if cols.len() >= 2 {
            return percent(cols[1], cols[0]);
        }
    }
    // /proc/meminfo
    let total: f64 = capture(&MEM_TOTAL, text)?.parse().ok()?;
    let available: f64 = capture(&MEM_AVAILABLE, text)?.parse().ok()?;
    percent(total - available, total)
}

pub fn parse_disk_percent(text: &str) -> Option<f32> {
    text.lines()
        .skip(1)
        .flat_map(str::split_whitespace)
        .find_map(|col| col.strip_suffix('%').and_then(|v| v.parse::<f32>().ok()))
}

pub fn parse_load(text: &str) -> Option<f32> {
    if let Some(avg) = capture(&LOAD_AVERAGE, text) {
        return avg.parse().ok();
    }
    text.split_whitespace().next()?.parse().ok()
}

pub fn parse_cpu_count(text: &str) -> Option<u32> {
    if let Some(count) = capture(&LSCPU_COUNT, text) {
        return count.parse().ok();
    }
    first_line(text)?.parse().ok()
}

/// Upgradable lines from `apt list --upgradable` that come from a security pocket.
pub fn count_security_updates(listing: &str) -> u32 {
    listing
        .lines()
        .filter(|l| l.contains("upgradable") && l.to_ascii_lowercase().contains("security"))
        .count() as u32
}
