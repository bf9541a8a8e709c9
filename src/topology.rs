//! Logical port names and how they map onto hub ports.
//!
//! A port is written as a hub letter followed by the port number printed on
//! the board, e.g. `u3` or `e2`. Which letters exist, which hub each letter
//! selects and how the hub is wired depends on the board layout.

use std::fmt;

use crate::error::{InvalidPort, ParseError};

/// Genesys Logic, maker of the hub controllers on the board.
pub const HUB_VENDOR_ID: u16 = 0x05e3;
/// GL3520 hub controller.
pub const HUB_PRODUCT_ID: u16 = 0x0614;

/// Highest downstream port number a hub may have.
pub const MAX_PORTS: u8 = 4;

const NOVENA_PORT_NAMES: [&str; 8] = [
    "Side (near SD slot)",
    "100 Mbit Ethernet",
    "PCIe",
    "Downstream hub",
    "Side (away from SD slot)",
    "Front panel",
    "Near speakers",
    "LVDS board",
];

/// Board layout: which two hubs exist and what they are called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Topology {
    /// Two hubs named internal (`i`) and external (`e`).
    InternalExternal,
    /// An upstream hub (`u`) feeding a downstream hub (`d`).
    UpstreamDownstream,
}

impl Topology {
    /// Roles in hub enumeration order: the first role is the first matching
    /// hub found on the bus.
    pub fn roles(self) -> [Role; 2] {
        match self {
            Topology::InternalExternal => [Role::Internal, Role::External],
            Topology::UpstreamDownstream => [Role::Upstream, Role::Downstream],
        }
    }

    pub fn role_for_letter(self, letter: char) -> Option<Role> {
        self.roles().into_iter().find(|role| role.letter() == letter)
    }

    /// Position of the role's hub among matching hubs.
    pub fn ordinal(self, role: Role) -> Option<usize> {
        self.roles().iter().position(|r| *r == role)
    }

    pub fn role_at(self, ordinal: usize) -> Option<Role> {
        self.roles().get(ordinal).copied()
    }

    pub fn wiring(self, role: Role) -> Wiring {
        match (self, role) {
            // Ports 1 and 4 of the downstream hub have their wires swapped.
            (Topology::UpstreamDownstream, Role::Downstream) => Wiring::OuterSwapped,
            _ => Wiring::Straight,
        }
    }

    pub fn matcher(self) -> HubMatcher {
        HubMatcher {
            vendor_id: HUB_VENDOR_ID,
            product_id: Some(HUB_PRODUCT_ID),
            require_hub_class: true,
        }
    }

    pub fn port_count(self) -> PortCount {
        match self {
            Topology::InternalExternal => PortCount::Fixed(MAX_PORTS),
            Topology::UpstreamDownstream => PortCount::FromDescriptor,
        }
    }

    /// What is plugged into `port` (1-based) of the hub at `ordinal`, if known.
    pub fn port_name(self, ordinal: usize, port: u8) -> Option<&'static str> {
        let names: &[&str] = match self {
            Topology::InternalExternal => &[],
            Topology::UpstreamDownstream => &NOVENA_PORT_NAMES,
        };
        let index = ordinal
            .checked_mul(usize::from(MAX_PORTS))?
            .checked_add(usize::from(port.checked_sub(1)?))?;
        names.get(index).copied()
    }

    fn letters(self) -> String {
        let [a, b] = self.roles();
        format!("'{}' or '{}'", a.letter(), b.letter())
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::InternalExternal => f.write_str("internal/external"),
            Topology::UpstreamDownstream => f.write_str("upstream/downstream"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Internal,
    External,
    Upstream,
    Downstream,
}

impl Role {
    pub fn letter(self) -> char {
        match self {
            Role::Internal => 'i',
            Role::External => 'e',
            Role::Upstream => 'u',
            Role::Downstream => 'd',
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Internal => "Internal hub",
            Role::External => "External hub",
            Role::Upstream => "Upstream hub",
            Role::Downstream => "Downstream hub",
        }
    }
}

/// A port number as printed on the board, always within `1..=MAX_PORTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortNumber(u8);

impl PortNumber {
    pub fn new(number: u32) -> Result<Self, ParseError> {
        match u8::try_from(number) {
            Ok(n @ 1..=MAX_PORTS) => Ok(PortNumber(n)),
            _ => Err(ParseError::OutOfRange { number }),
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A parsed port token such as `d1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicalPort {
    pub role: Role,
    pub number: PortNumber,
}

impl fmt::Display for LogicalPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.role.letter(), self.number)
    }
}

/// Where a logical port lives on the bus: which matching hub, which physical
/// port of that hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortAddress {
    pub ordinal: usize,
    pub port: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wiring {
    Straight,
    /// Physical ports 1 and 4 are cabled to each other's connectors.
    OuterSwapped,
}

impl Wiring {
    pub fn apply(self, port: u8) -> u8 {
        match (self, port) {
            (Wiring::OuterSwapped, 1) => 4,
            (Wiring::OuterSwapped, 4) => 1,
            (_, port) => port,
        }
    }
}

/// How many ports to query when listing a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortCount {
    Fixed(u8),
    FromDescriptor,
}

/// Which devices on the bus count as one of the board's hubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubMatcher {
    pub vendor_id: u16,
    pub product_id: Option<u16>,
    pub require_hub_class: bool,
}

impl HubMatcher {
    pub fn matches(&self, info: &crate::host::DeviceInfo) -> bool {
        if self.require_hub_class && info.class_code != rusb::constants::LIBUSB_CLASS_HUB {
            return false;
        }
        info.vendor_id == self.vendor_id
            && self.product_id.is_none_or(|pid| pid == info.product_id)
    }
}

/// Parse a port token like `i4` or `d2`. Performs no I/O.
pub fn parse_port(topology: Topology, token: &str) -> Result<LogicalPort, ParseError> {
    let mut chars = token.chars();
    let letter = chars.next().ok_or(ParseError::Empty)?;
    let role = topology
        .role_for_letter(letter)
        .ok_or_else(|| ParseError::UnknownRole {
            letter,
            expected: topology.letters(),
        })?;

    let digits = chars.as_str();
    if digits.is_empty() {
        return Err(ParseError::MissingNumber { letter });
    }
    let number = digits
        .parse::<u32>()
        .map_err(|_| ParseError::NotANumber {
            text: digits.to_owned(),
        })?;

    Ok(LogicalPort {
        role,
        number: PortNumber::new(number)?,
    })
}

/// Map a logical port onto its hub ordinal and physical port number,
/// correcting for swapped wiring.
pub fn resolve(topology: Topology, port: LogicalPort) -> Result<PortAddress, InvalidPort> {
    let ordinal = topology.ordinal(port.role).ok_or(InvalidPort {
        role: port.role,
        topology,
    })?;
    Ok(PortAddress {
        ordinal,
        port: topology.wiring(port.role).apply(port.number.get()),
    })
}
