//! netkeep kernel: remote discovery and network reconciliation for homelab hosts
//!
//! Data flows upward:
//! executor → prober → discovery / inventory collectors → reconciler /
//! conflict resolver → migration planner → `NetKeep` facade.

pub mod config;
pub mod conflict;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod hosts;
pub mod inventory;
pub mod migration;
pub mod models;
pub mod probe;
pub mod reconcile;
pub mod registry;
pub mod remote;
pub mod service;
pub mod state;

pub use config::{load_config, KernelConfig};
pub use conflict::{ConflictChecker, ConflictResolver};
pub use error::{ConnectFailure, Error, ExecError, Result, StoreError};
pub use hosts::HostRegistry;
pub use models::*;
pub use probe::{IcmpProbe, ReachabilityProbe};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use registry::{DeviceRegistry, DeviceStore};
pub use remote::{Prober, RemoteExecutor};
pub use service::{NetKeep, OpResult, SyncReport};
