//! USB hub class requests: port power, port indicators and port status.

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;
use bytes::Buf;
use log::{debug, warn};
use rusb::constants::{
    LIBUSB_REQUEST_CLEAR_FEATURE, LIBUSB_REQUEST_GET_DESCRIPTOR, LIBUSB_REQUEST_GET_STATUS,
    LIBUSB_REQUEST_SET_FEATURE,
};
use rusb::{Direction, Recipient, RequestType};

use crate::error::{Error, Result};
use crate::host::{ControlHandle, HostDevice};
use crate::topology::MAX_PORTS;

pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Size of the wPortStatus + wPortChange reply.
pub const PORT_STATUS_LEN: usize = 4;

/// Hub descriptor up to and including bHubContrCurrent.
const HUB_DESCRIPTOR_LEN: usize = 7;

const HUB_CHAR_LPSM: u16 = 0x0003;
const HUB_CHAR_PORTIND: u16 = 0x0080;

fn port_request(direction: Direction) -> u8 {
    rusb::request_type(direction, RequestType::Class, Recipient::Other)
}

fn hub_request(direction: Direction) -> u8 {
    rusb::request_type(direction, RequestType::Class, Recipient::Device)
}

/// Port feature selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PortFeature {
    Power = 8,
    Indicator = 22,
}

/// Port indicator LED selectors, sent in the high byte of wIndex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[repr(u8)]
pub enum IndicatorMode {
    Automatic = 0,
    Amber = 1,
    Green = 2,
    Off = 3,
}

fn set_port_feature<C: ControlHandle>(
    handle: &C,
    feature: PortFeature,
    index: u16,
    on: bool,
) -> Result<()> {
    let request = if on {
        LIBUSB_REQUEST_SET_FEATURE
    } else {
        LIBUSB_REQUEST_CLEAR_FEATURE
    };
    debug!(
        "send control message (request={request}, feature={}, index={index:#06x})",
        feature as u16
    );
    handle
        .write_control(
            port_request(Direction::Out),
            request,
            feature as u16,
            index,
            &[],
            CONTROL_TIMEOUT,
        )
        .map_err(Error::usb("send packet to USB hub"))?;
    Ok(())
}

/// Switch power to one port of the hub on or off.
///
/// The hub is opened for the duration of the request and closed again on
/// every path.
pub fn set_port_power<D: HostDevice>(device: &D, port: u8, enabled: bool) -> Result<()> {
    let handle = device.open().map_err(Error::usb("open USB hub"))?;
    set_port_feature(&handle, PortFeature::Power, u16::from(port), enabled)
}

pub fn set_port_indicator<D: HostDevice>(device: &D, port: u8, mode: IndicatorMode) -> Result<()> {
    let handle = device.open().map_err(Error::usb("open USB hub"))?;
    let index = (u16::from(mode as u8) << 8) | u16::from(port);
    set_port_feature(&handle, PortFeature::Indicator, index, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSwitching {
    Ganged,
    Individual,
    None,
}

/// The parts of the hub class descriptor the tool cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubDescriptor {
    pub port_count: u8,
    pub characteristics: u16,
}

impl HubDescriptor {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 3 {
            return Err(Error::ShortTransfer {
                op: "read hub descriptor",
                expected: 3,
                actual: data.len(),
            });
        }
        let mut buf = &data[2..];
        let port_count = buf.get_u8();
        let characteristics = if buf.remaining() >= 2 {
            buf.get_u16_le()
        } else {
            0
        };
        Ok(HubDescriptor {
            port_count,
            characteristics,
        })
    }

    pub fn power_switching(&self) -> PowerSwitching {
        match self.characteristics & HUB_CHAR_LPSM {
            0 => PowerSwitching::Ganged,
            1 => PowerSwitching::Individual,
            _ => PowerSwitching::None,
        }
    }

    pub fn has_port_indicators(&self) -> bool {
        self.characteristics & HUB_CHAR_PORTIND != 0
    }
}

pub fn read_hub_descriptor<C: ControlHandle>(handle: &C) -> Result<HubDescriptor> {
    let mut data = [0u8; HUB_DESCRIPTOR_LEN];
    let len = handle
        .read_control(
            hub_request(Direction::In),
            LIBUSB_REQUEST_GET_DESCRIPTOR,
            0,
            0,
            &mut data,
            CONTROL_TIMEOUT,
        )
        .map_err(Error::usb("read hub descriptor"))?;
    let desc = HubDescriptor::parse(&data[..len])?;
    debug!(
        "hub descriptor: {} ports, {:?} power switching, indicators: {}",
        desc.port_count,
        desc.power_switching(),
        desc.has_port_indicators()
    );
    Ok(desc)
}

bitflags! {
    /// wPortStatus
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortStatusBits: u16 {
        const CONNECTION = 0x0001;
        const ENABLE = 0x0002;
        const SUSPEND = 0x0004;
        const OVER_CURRENT = 0x0008;
        const RESET = 0x0010;
        const POWER = 0x0100;
        const LOW_SPEED = 0x0200;
        const HIGH_SPEED = 0x0400;
        const TEST = 0x0800;
        const INDICATOR = 0x1000;
    }
}

bitflags! {
    /// wPortChange
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortChangeBits: u16 {
        const C_CONNECTION = 0x0001;
        const C_ENABLE = 0x0002;
        const C_SUSPEND = 0x0004;
        const C_OVER_CURRENT = 0x0008;
        const C_RESET = 0x0010;
    }
}

/// Decoded GET_STATUS reply for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortStatus {
    pub status: PortStatusBits,
    pub change: PortChangeBits,
}

impl PortStatus {
    pub fn from_bytes(raw: [u8; PORT_STATUS_LEN]) -> Self {
        let mut buf = &raw[..];
        let status = buf.get_u16_le();
        let change = buf.get_u16_le();
        PortStatus {
            status: PortStatusBits::from_bits_retain(status),
            change: PortChangeBits::from_bits_retain(change),
        }
    }

    /// Names of the set flags, in the order they are printed.
    pub fn flag_names(&self) -> Vec<&'static str> {
        const CHANGE: [(PortChangeBits, &str); 5] = [
            (PortChangeBits::C_RESET, "C_RESET"),
            (PortChangeBits::C_OVER_CURRENT, "C_OC"),
            (PortChangeBits::C_SUSPEND, "C_SUSPEND"),
            (PortChangeBits::C_ENABLE, "C_ENABLE"),
            (PortChangeBits::C_CONNECTION, "C_CONNECT"),
        ];
        const STATUS: [(PortStatusBits, &str); 10] = [
            (PortStatusBits::INDICATOR, "indicator"),
            (PortStatusBits::TEST, "test"),
            (PortStatusBits::HIGH_SPEED, "highspeed"),
            (PortStatusBits::LOW_SPEED, "lowspeed"),
            (PortStatusBits::POWER, "power"),
            (PortStatusBits::RESET, "RESET"),
            (PortStatusBits::OVER_CURRENT, "oc"),
            (PortStatusBits::SUSPEND, "suspend"),
            (PortStatusBits::ENABLE, "enable"),
            (PortStatusBits::CONNECTION, "connect"),
        ];

        let change = CHANGE
            .iter()
            .filter(|(bit, _)| self.change.contains(*bit))
            .map(|(_, name)| *name);
        let status = STATUS
            .iter()
            .filter(|(bit, _)| self.status.contains(*bit))
            .map(|(_, name)| *name);
        change.chain(status).collect()
    }
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}.{:04x}", self.change.bits(), self.status.bits())?;
        for name in self.flag_names() {
            write!(f, " {name}")?;
        }
        Ok(())
    }
}

pub fn read_port_status<C: ControlHandle>(handle: &C, port: u8) -> Result<PortStatus> {
    let mut raw = [0u8; PORT_STATUS_LEN];
    let len = handle
        .read_control(
            port_request(Direction::In),
            LIBUSB_REQUEST_GET_STATUS,
            0,
            u16::from(port),
            &mut raw,
            CONTROL_TIMEOUT,
        )
        .map_err(Error::usb("read port status"))?;
    if len != PORT_STATUS_LEN {
        return Err(Error::ShortTransfer {
            op: "read port status",
            expected: PORT_STATUS_LEN,
            actual: len,
        });
    }
    Ok(PortStatus::from_bytes(raw))
}

/// Status of one port, or why it could not be read.
#[derive(Debug)]
pub struct PortReport {
    pub port: u8,
    pub status: Result<PortStatus>,
}

/// Read ports `1..=port_count`. A failing port is recorded and the
/// remaining ports are still read.
pub fn read_port_statuses<C: ControlHandle>(handle: &C, port_count: u8) -> Vec<PortReport> {
    (1..=port_count.min(MAX_PORTS))
        .map(|port| {
            let status = read_port_status(handle, port);
            if let Err(e) = &status {
                warn!("cannot read port {port} status: {e}");
            }
            PortReport { port, status }
        })
        .collect()
}

/// Open the hub and read the status of its first `port_count` ports.
pub fn read_device_port_statuses<D: HostDevice>(device: &D, port_count: u8) -> Result<Vec<PortReport>> {
    let handle = device.open().map_err(Error::usb("open USB hub"))?;
    Ok(read_port_statuses(&handle, port_count))
}

#[cfg(test)]
mod tests {
    use rusb::constants::LIBUSB_CLASS_HUB;

    use super::*;
    use crate::host::UsbHost;
    use crate::host::mock::{MockDeviceSpec, MockHost};

    const PORT_IN: u8 = 0xa3;
    const PORT_OUT: u8 = 0x23;

    fn hub(spec: MockDeviceSpec) -> MockHost {
        MockHost::new(vec![spec])
    }

    fn plain_hub() -> MockDeviceSpec {
        MockDeviceSpec::new(0x05e3, 0x0614, LIBUSB_CLASS_HUB)
    }

    #[test]
    fn power_on_sends_set_feature() {
        let host = hub(plain_hub());
        let device = host.devices().unwrap().remove(0);
        set_port_power(&device, 3, true).unwrap();
        set_port_power(&device, 2, false).unwrap();

        let transfers = host.transfers();
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].request_type, PORT_OUT);
        assert_eq!(transfers[0].request, LIBUSB_REQUEST_SET_FEATURE);
        assert_eq!(transfers[0].value, 8);
        assert_eq!(transfers[0].index, 3);
        assert_eq!(transfers[0].timeout, Duration::from_millis(1000));
        assert_eq!(transfers[1].request, LIBUSB_REQUEST_CLEAR_FEATURE);
        assert_eq!(transfers[1].index, 2);
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn failed_power_request_still_closes_handle() {
        let mut spec = plain_hub();
        spec.fail_writes = Some(rusb::Error::Pipe);
        let host = hub(spec);
        let device = host.devices().unwrap().remove(0);

        let err = set_port_power(&device, 1, true).unwrap_err();
        assert!(matches!(
            err,
            Error::Usb {
                source: rusb::Error::Pipe,
                ..
            }
        ));
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn indicator_mode_goes_in_index_high_byte() {
        let host = hub(plain_hub());
        let device = host.devices().unwrap().remove(0);
        set_port_indicator(&device, 2, IndicatorMode::Green).unwrap();

        let t = &host.transfers()[0];
        assert_eq!(t.request, LIBUSB_REQUEST_SET_FEATURE);
        assert_eq!(t.value, 22);
        assert_eq!(t.index, 0x0202);
    }

    #[test]
    fn decodes_single_connect_bit() {
        let status = PortStatus::from_bytes([0x01, 0x00, 0x00, 0x00]);
        assert_eq!(status.status, PortStatusBits::CONNECTION);
        assert!(status.change.is_empty());
        assert_eq!(status.flag_names(), ["connect"]);
    }

    #[test]
    fn decodes_status_and_change_words() {
        let status = PortStatus::from_bytes([0x03, 0x05, 0x11, 0x00]);
        assert_eq!(
            status.status,
            PortStatusBits::CONNECTION
                | PortStatusBits::ENABLE
                | PortStatusBits::POWER
                | PortStatusBits::HIGH_SPEED
        );
        assert_eq!(
            status.change,
            PortChangeBits::C_CONNECTION | PortChangeBits::C_RESET
        );
        assert_eq!(
            status.to_string(),
            "0011.0503 C_RESET C_CONNECT highspeed power enable connect"
        );
    }

    #[test]
    fn reads_connect_and_connect_change() {
        let spec = plain_hub().reply(LIBUSB_REQUEST_GET_STATUS, 1, Ok(vec![0x01, 0x00, 0x01, 0x00]));
        let host = hub(spec);
        let device = host.devices().unwrap().remove(0);
        let handle = device.open().unwrap();

        let status = read_port_status(&handle, 1).unwrap();
        assert_eq!(status.status, PortStatusBits::CONNECTION);
        assert_eq!(status.change, PortChangeBits::C_CONNECTION);
        assert_eq!(status.flag_names(), ["C_CONNECT", "connect"]);

        let t = &host.transfers()[0];
        assert_eq!(t.request_type, PORT_IN);
        assert_eq!((t.value, t.index), (0, 1));
    }

    #[test]
    fn one_failing_port_does_not_stop_the_rest() {
        let spec = plain_hub()
            .reply(LIBUSB_REQUEST_GET_STATUS, 1, Ok(vec![0x00, 0x01, 0x00, 0x00]))
            .reply(LIBUSB_REQUEST_GET_STATUS, 2, Err(rusb::Error::Timeout))
            .reply(LIBUSB_REQUEST_GET_STATUS, 3, Ok(vec![0x00, 0x01]))
            .reply(LIBUSB_REQUEST_GET_STATUS, 4, Ok(vec![0x01, 0x01, 0x00, 0x00]));
        let host = hub(spec);
        let device = host.devices().unwrap().remove(0);

        let reports = read_device_port_statuses(&device, 4).unwrap();
        assert_eq!(reports.len(), 4);
        assert!(reports[0].status.is_ok());
        assert!(matches!(
            reports[1].status,
            Err(Error::Usb {
                source: rusb::Error::Timeout,
                ..
            })
        ));
        assert!(matches!(
            reports[2].status,
            Err(Error::ShortTransfer { actual: 2, .. })
        ));
        assert_eq!(
            reports[3].status.as_ref().unwrap().status,
            PortStatusBits::CONNECTION | PortStatusBits::POWER
        );
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn never_reads_past_four_ports() {
        let host = hub(plain_hub());
        let device = host.devices().unwrap().remove(0);
        let reports = read_device_port_statuses(&device, 200).unwrap();
        assert_eq!(reports.len(), 4);
        assert_eq!(host.transfers().last().unwrap().index, 4);
    }

    #[test]
    fn parses_hub_descriptor() {
        let desc = HubDescriptor::parse(&[0x09, 0x29, 0x04, 0x89, 0x00, 0x32, 0x64]).unwrap();
        assert_eq!(desc.port_count, 4);
        assert_eq!(desc.power_switching(), PowerSwitching::Individual);
        assert!(desc.has_port_indicators());

        let short = HubDescriptor::parse(&[0x09, 0x29, 0x02]).unwrap();
        assert_eq!(short.port_count, 2);
        assert_eq!(short.power_switching(), PowerSwitching::Ganged);

        assert!(matches!(
            HubDescriptor::parse(&[0x09, 0x29]),
            Err(Error::ShortTransfer { actual: 2, .. })
        ));
    }

    #[test]
    fn hub_descriptor_request_targets_device() {
        let spec = plain_hub().reply(
            LIBUSB_REQUEST_GET_DESCRIPTOR,
            0,
            Ok(vec![0x09, 0x29, 0x03, 0x00, 0x00, 0x32, 0x64, 0xff, 0xff]),
        );
        let host = hub(spec);
        let device = host.devices().unwrap().remove(0);
        let handle = device.open().unwrap();

        assert_eq!(read_hub_descriptor(&handle).unwrap().port_count, 3);
        let t = &host.transfers()[0];
        assert_eq!(t.request_type, 0xa0);
        assert_eq!((t.value, t.index), (0, 0));
    }
}
