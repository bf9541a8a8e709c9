//! Power switching and status readout for the downstream ports of the
//! Genesys Logic hubs on the Novena board.

pub mod control;
pub mod error;
pub mod host;
pub mod hub;
pub mod locator;
pub mod topology;

pub use control::{HubControl, HubReport, PortEntry};
pub use error::{Error, InvalidPort, ParseError, Result};
pub use host::{ControlHandle, DeviceInfo, HostDevice, HostSession, UsbHost};
pub use hub::{IndicatorMode, PortStatus};
pub use topology::{LogicalPort, PortAddress, Role, Topology};
