//! The slice of libusb the hub tooling needs, behind traits so the locator
//! and the hub protocol can run against something other than real hardware.

use std::time::Duration;

use rusb::UsbContext;

/// Descriptor fields used to pick hubs off the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub class_code: u8,
    pub bus_number: u8,
    pub address: u8,
}

/// Access to the devices currently attached to the host.
pub trait UsbHost {
    type Device: HostDevice;

    /// Snapshot of the attached devices. Each returned device holds its own
    /// reference and stays valid after the snapshot is gone.
    fn devices(&self) -> rusb::Result<Vec<Self::Device>>;
}

pub trait HostDevice {
    type Handle: ControlHandle;

    fn info(&self) -> rusb::Result<DeviceInfo>;

    /// Open the device. The handle is closed when dropped.
    fn open(&self) -> rusb::Result<Self::Handle>;
}

/// Control transfers on endpoint zero.
pub trait ControlHandle {
    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;
}

/// The process-wide libusb context. Created once at startup and handed to
/// everything that talks to the bus; libusb is shut down when it drops.
pub struct HostSession {
    context: rusb::Context,
}

impl HostSession {
    pub fn new(log_level: rusb::LogLevel) -> rusb::Result<Self> {
        let mut context = rusb::Context::new()?;
        context.set_log_level(log_level);
        Ok(HostSession { context })
    }
}

impl UsbHost for HostSession {
    type Device = rusb::Device<rusb::Context>;

    fn devices(&self) -> rusb::Result<Vec<Self::Device>> {
        // The list is freed on return; the collected devices keep their refs.
        Ok(self.context.devices()?.iter().collect())
    }
}

impl<C: UsbContext> HostDevice for rusb::Device<C> {
    type Handle = rusb::DeviceHandle<C>;

    fn info(&self) -> rusb::Result<DeviceInfo> {
        let desc = self.device_descriptor()?;
        Ok(DeviceInfo {
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            class_code: desc.class_code(),
            bus_number: self.bus_number(),
            address: self.address(),
        })
    }

    fn open(&self) -> rusb::Result<Self::Handle> {
        rusb::Device::open(self)
    }
}

impl<C: UsbContext> ControlHandle for rusb::DeviceHandle<C> {
    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        rusb::DeviceHandle::read_control(self, request_type, request, value, index, buf, timeout)
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        rusb::DeviceHandle::write_control(self, request_type, request, value, index, buf, timeout)
    }
}
