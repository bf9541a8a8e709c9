//! Finding the board's hubs among everything on the bus.

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::host::{DeviceInfo, HostDevice, UsbHost};
use crate::topology::HubMatcher;

/// A hub that matched and could be opened during a scan.
pub struct LocatedHub<D> {
    /// Position among matching hubs, in enumeration order.
    pub ordinal: usize,
    pub info: DeviceInfo,
    pub device: D,
}

/// Scan the bus for hubs the matcher accepts.
///
/// Every candidate is opened once to make sure it is usable; candidates that
/// cannot be opened (usually a permissions problem) are skipped and do not
/// take up an ordinal. A failed enumeration yields no hubs.
pub fn scan_hubs<H: UsbHost>(host: &H, matcher: &HubMatcher) -> Vec<LocatedHub<H::Device>> {
    let devices = match host.devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!("failed to access USB: {e}");
            return Vec::new();
        }
    };

    let mut hubs = Vec::new();
    for device in devices {
        let info = match device.info() {
            Ok(info) => info,
            Err(e) => {
                debug!("skipping device without readable descriptor: {e}");
                continue;
            }
        };
        if !matcher.matches(&info) {
            trace!(
                "Bus {:03} Device {:03}: ID {:04x}:{:04x} class {:#04x} is not a candidate",
                info.bus_number, info.address, info.vendor_id, info.product_id, info.class_code
            );
            continue;
        }
        if let Err(e) = device.open() {
            debug!(
                "Bus {:03} Device {:03}: cannot open hub, skipping: {e}",
                info.bus_number, info.address
            );
            continue;
        }

        let ordinal = hubs.len();
        trace!(
            "Bus {:03} Device {:03}: ID {:04x}:{:04x} is hub #{ordinal}",
            info.bus_number, info.address, info.vendor_id, info.product_id
        );
        hubs.push(LocatedHub {
            ordinal,
            info,
            device,
        });
    }
    hubs
}

/// The `ordinal`-th matching hub. The returned device owns its own
/// reference; the rest of the scan is released before returning.
pub fn find_hub<H: UsbHost>(host: &H, matcher: &HubMatcher, ordinal: usize) -> Result<H::Device> {
    scan_hubs(host, matcher)
        .into_iter()
        .nth(ordinal)
        .map(|hub| hub.device)
        .ok_or(Error::NotFound { ordinal })
}

#[cfg(test)]
mod tests {
    use rusb::constants::LIBUSB_CLASS_HUB;

    use super::*;
    use crate::host::mock::{MockDeviceSpec, MockHost};
    use crate::topology::{HUB_PRODUCT_ID, HUB_VENDOR_ID, Topology};

    const CLASS_VENDOR_SPEC: u8 = 0xff;

    fn novena_hub() -> MockDeviceSpec {
        MockDeviceSpec::new(HUB_VENDOR_ID, HUB_PRODUCT_ID, LIBUSB_CLASS_HUB)
    }

    fn matcher() -> HubMatcher {
        Topology::UpstreamDownstream.matcher()
    }

    #[test]
    fn finds_hubs_in_enumeration_order() {
        let host = MockHost::new(vec![
            MockDeviceSpec::new(0x1d6b, 0x0002, LIBUSB_CLASS_HUB),
            novena_hub(),
            MockDeviceSpec::new(0x0951, 0x1666, 0),
            novena_hub(),
        ]);

        let first = find_hub(&host, &matcher(), 0).unwrap();
        let second = find_hub(&host, &matcher(), 1).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 3);
        assert!(matches!(
            find_hub(&host, &matcher(), 2),
            Err(Error::NotFound { ordinal: 2 })
        ));
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn unopenable_hubs_do_not_take_an_ordinal() {
        let mut locked = novena_hub();
        locked.openable = false;
        let host = MockHost::new(vec![locked, novena_hub()]);

        let hubs = scan_hubs(&host, &matcher());
        assert_eq!(hubs.len(), 1);
        assert_eq!(hubs[0].ordinal, 0);
        assert_eq!(hubs[0].device.id, 1);
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn requires_hub_class_and_identity() {
        let host = MockHost::new(vec![
            MockDeviceSpec::new(HUB_VENDOR_ID, HUB_PRODUCT_ID, CLASS_VENDOR_SPEC),
            MockDeviceSpec::new(HUB_VENDOR_ID, 0x0608, LIBUSB_CLASS_HUB),
        ]);
        assert!(scan_hubs(&host, &matcher()).is_empty());
        assert_eq!(host.shared.borrow().opens, 0);

        let lax = HubMatcher {
            product_id: None,
            ..matcher()
        };
        assert_eq!(scan_hubs(&host, &lax).len(), 1);
    }

    #[test]
    fn enumeration_failure_means_no_hubs() {
        let mut host = MockHost::new(vec![novena_hub()]);
        host.enumeration_error = Some(rusb::Error::Access);
        assert!(scan_hubs(&host, &matcher()).is_empty());
        assert!(matches!(
            find_hub(&host, &matcher(), 0),
            Err(Error::NotFound { ordinal: 0 })
        ));
    }
}
