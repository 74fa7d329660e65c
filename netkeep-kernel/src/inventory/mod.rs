//! Live inventory collectors
//!
//! Each collector reads one source of truth on a host:
//! - `ContainerCollector`: Docker containers, ports, labels, networks
//! - `VmCollector`: libvirt guests and their addresses
//! - `InterfaceCollector`: the host's own interfaces
//!
//! Results are fresh per pass and never merged with a previous pass; merging
//! into the registry is the reconciler's job.

pub mod containers;
pub mod interfaces;
pub mod ports;
pub mod vms;

pub use containers::{ContainerCollector, ContainerHit, DiscoveredContainer, NetworkAttachment};
pub use interfaces::{HostInterface, InterfaceCollector};
pub use ports::{parse_port_list, parse_port_mapping, PortMapping};
pub use vms::{GuestAddress, VmCollector, VmGuest};

use crate::remote::Prober;

/// The three collectors sharing one prober.
#[derive(Clone)]
pub struct Inventory {
    pub containers: ContainerCollector,
    pub vms: VmCollector,
    pub interfaces: InterfaceCollector,
}

impl Inventory {
    pub fn new(prober: Prober) -> Self {
        Self {
            containers: ContainerCollector::new(prober.clone()),
            vms: VmCollector::new(prober.clone()),
            interfaces: InterfaceCollector::new(prober),
        }
    }
}
