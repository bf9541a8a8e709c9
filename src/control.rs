//! Port operations as the command line drives them: a port token in, a
//! control transfer on the right hub out.

use std::fmt;

use log::{info, warn};

use crate::error::Result;
use crate::host::{DeviceInfo, HostDevice, UsbHost};
use crate::hub::{self, IndicatorMode, PortReport};
use crate::locator::{self, LocatedHub};
use crate::topology::{self, PortAddress, PortCount, Topology, MAX_PORTS};

pub struct HubControl<'a, H> {
    host: &'a H,
    topology: Topology,
}

impl<'a, H: UsbHost> HubControl<'a, H> {
    pub fn new(host: &'a H, topology: Topology) -> Self {
        HubControl { host, topology }
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Translate a port token without touching the bus.
    pub fn address(&self, token: &str) -> Result<PortAddress> {
        let port = topology::parse_port(self.topology, token)?;
        Ok(topology::resolve(self.topology, port)?)
    }

    pub fn set_power(&self, token: &str, enabled: bool) -> Result<()> {
        let addr = self.address(token)?;
        let device = locator::find_hub(self.host, &self.topology.matcher(), addr.ordinal)?;
        info!(
            "{} port {token} (hub #{}, port {})",
            if enabled { "enabling" } else { "disabling" },
            addr.ordinal,
            addr.port
        );
        hub::set_port_power(&device, addr.port, enabled)
    }

    pub fn set_indicator(&self, token: &str, mode: IndicatorMode) -> Result<()> {
        let addr = self.address(token)?;
        let device = locator::find_hub(self.host, &self.topology.matcher(), addr.ordinal)?;
        info!(
            "setting indicator of port {token} (hub #{}, port {}) to {mode:?}",
            addr.ordinal, addr.port
        );
        hub::set_port_indicator(&device, addr.port, mode)
    }

    /// Status of every port on every matching hub. Failures are recorded in
    /// the report of the hub or port they belong to.
    pub fn list_ports(&self) -> Vec<HubReport> {
        locator::scan_hubs(self.host, &self.topology.matcher())
            .into_iter()
            .map(|located| self.report(located))
            .collect()
    }

    fn report(&self, located: LocatedHub<H::Device>) -> HubReport {
        let ports = located
            .device
            .open()
            .map_err(crate::Error::usb("open USB hub"))
            .and_then(|handle| {
                let count = match self.topology.port_count() {
                    PortCount::Fixed(n) => n,
                    PortCount::FromDescriptor => {
                        let count = hub::read_hub_descriptor(&handle)?.port_count;
                        if count > MAX_PORTS {
                            warn!("hub reports {count} ports, only {MAX_PORTS} are supported");
                        }
                        count.min(MAX_PORTS)
                    }
                };
                Ok(hub::read_port_statuses(&handle, count))
            });

        let role = self.topology.role_at(located.ordinal);
        let ports = ports.map(|reports| {
            reports
                .into_iter()
                .map(|report| PortEntry {
                    // Wiring swaps are their own inverse: physical -> logical.
                    label: role.map(|r| {
                        let number = self.topology.wiring(r).apply(report.port);
                        format!("{}{number}", r.letter())
                    }),
                    name: self.topology.port_name(located.ordinal, report.port),
                    report,
                })
                .collect()
        });

        HubReport {
            label: match role {
                Some(role) => role.label().to_owned(),
                None => format!(
                    "Unknown hub {}",
                    located.ordinal + 1 - self.topology.roles().len()
                ),
            },
            info: located.info,
            ports,
        }
    }
}

/// One port line of a listing.
#[derive(Debug)]
pub struct PortEntry {
    /// Logical name, e.g. `u2`, for hubs that have a role. `report.port`
    /// stays the physical port number.
    pub label: Option<String>,
    pub name: Option<&'static str>,
    pub report: PortReport,
}

/// One hub of a listing.
#[derive(Debug)]
pub struct HubReport {
    pub label: String,
    pub info: DeviceInfo,
    pub ports: Result<Vec<PortEntry>>,
}

impl fmt::Display for PortEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "   Port {}", self.report.port)?;
        if let Some(label) = &self.label {
            write!(f, " ({label})")?;
        }
        match &self.report.status {
            Ok(status) => write!(f, ": {status}")?,
            Err(e) => write!(f, ": <{e}>")?,
        }
        if let Some(name) = self.name {
            write!(f, " - {name}")?;
        }
        Ok(())
    }
}

impl fmt::Display for HubReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - Bus {:03} Device {:03}: ID {:04x}:{:04x}",
            self.label,
            self.info.bus_number,
            self.info.address,
            self.info.vendor_id,
            self.info.product_id
        )?;
        match &self.ports {
            Ok(ports) => {
                write!(f, "\nHub Status ({} ports):", ports.len())?;
                for port in ports {
                    write!(f, "\n{port}")?;
                }
                Ok(())
            }
            Err(e) => write!(f, "\n   <{e}>"),
        }
    }
}
