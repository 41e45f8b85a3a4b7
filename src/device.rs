//! Device discovery and inert device descriptors.

use std::fmt;
use std::sync::Arc;

use nusb::DeviceInfo;
use tracing::debug;

use crate::error::ResultExt as _;
use crate::{JayLink, Result};

const VID_SEGGER: u16 = 0x1366;

/// USB addresses.
///
/// The USB address is a way to identify devices and is tied to the USB Product ID (PID).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum UsbAddress {
    /// USB address 0 (Product ID 0x0101).
    Addr0 = 0,
    /// USB address 1 (Product ID 0x0102).
    Addr1 = 1,
    /// USB address 2 (Product ID 0x0103).
    Addr2 = 2,
    /// USB address 3 (Product ID 0x0104).
    Addr3 = 3,
}

impl UsbAddress {
    fn from_pid(pid: u16) -> Option<Self> {
        match pid {
            0x0101 => Some(UsbAddress::Addr0),
            0x0102 => Some(UsbAddress::Addr1),
            0x0103 => Some(UsbAddress::Addr2),
            0x0104 => Some(UsbAddress::Addr3),
            _ => None,
        }
    }
}

/// A context scoping device discovery.
///
/// All discovery happens through a live `Context`; dropping it ends the lifecycle. Log output is
/// emitted through [`tracing`] and filtered by whatever subscriber the embedding application
/// installs, so there is no log-level state on the context itself.
///
/// Multiple independent contexts (eg. in tests) do not interfere with each other.
#[derive(Debug)]
pub struct Context {
    _private: (),
}

impl Context {
    /// Creates a new discovery context.
    pub fn new() -> Result<Self> {
        Ok(Self { _private: () })
    }

    /// Scans the bus and returns all attached J-Link devices.
    ///
    /// Only devices with a known product identifier are returned. The returned descriptors are
    /// inert: no connection is opened until [`Device::open`] is called. They are shared
    /// references; call [`Device::clone`] to explicitly acquire another one.
    pub fn discover_devices(&self) -> Result<Vec<Device>> {
        let devices = nusb::list_devices()
            .jaylink_err_while("listing USB devices")?
            .filter(|info| info.vendor_id() == VID_SEGGER)
            .filter_map(|info| {
                let Some(usb_address) = UsbAddress::from_pid(info.product_id()) else {
                    debug!(
                        "skipping SEGGER device with unknown product ID {:#06x}",
                        info.product_id()
                    );
                    return None;
                };

                // The device reports its serial number as a decimal string.
                let serial = info.serial_number().and_then(|s| s.trim().parse().ok());

                Some(Device {
                    inner: Arc::new(DeviceInner {
                        source: DeviceSource::Usb(info),
                        usb_address,
                        serial,
                    }),
                })
            })
            .collect::<Vec<_>>();

        debug!("discovered {} devices", devices.len());
        Ok(devices)
    }
}

pub(crate) enum DeviceSource {
    Usb(DeviceInfo),
    #[cfg(test)]
    Synthetic,
}

pub(crate) struct DeviceInner {
    source: DeviceSource,
    usb_address: UsbAddress,
    serial: Option<u32>,
}

/// An inert descriptor of a discoverable device.
///
/// `Device` is a shared reference to the underlying descriptor; the descriptor itself is
/// immutable and freed when the last reference is dropped. Cloning is the explicit
/// "acquire reference" operation and is safe across threads.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Returns the serial number of the device, if it reports one.
    ///
    /// This is a pure read of the descriptor and performs no I/O.
    pub fn serial_number(&self) -> Option<u32> {
        self.inner.serial
    }

    /// Returns the USB address of the device.
    ///
    /// This is a pure read of the descriptor and performs no I/O.
    pub fn usb_address(&self) -> UsbAddress {
        self.inner.usb_address
    }

    /// Opens the device, returning a live [`JayLink`] session.
    pub fn open(&self) -> Result<JayLink> {
        JayLink::open_device(self)
    }

    pub(crate) fn usb_info(&self) -> Option<&DeviceInfo> {
        match &self.inner.source {
            DeviceSource::Usb(info) => Some(info),
            #[cfg(test)]
            DeviceSource::Synthetic => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn synthetic(usb_address: UsbAddress, serial: Option<u32>) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                source: DeviceSource::Synthetic,
                usb_address,
                serial,
            }),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("usb_address", &self.inner.usb_address)
            .field("serial", &self.inner.serial)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn descriptor_reads_are_pure() {
        let dev = Device::synthetic(UsbAddress::Addr2, Some(174200042));
        assert_eq!(dev.usb_address(), UsbAddress::Addr2);
        assert_eq!(dev.serial_number(), Some(174200042));

        let dev = Device::synthetic(UsbAddress::Addr0, None);
        assert_eq!(dev.serial_number(), None);
    }

    #[test]
    fn shared_references_keep_device_alive() {
        let dev = Device::synthetic(UsbAddress::Addr0, Some(1));
        let second = dev.clone();
        assert_eq!(Arc::strong_count(&dev.inner), 2);

        drop(dev);
        // Still alive and accessible through the remaining reference.
        assert_eq!(second.serial_number(), Some(1));
        assert_eq!(Arc::strong_count(&second.inner), 1);
    }

    #[test]
    fn concurrent_ref_unref_keeps_count_consistent() {
        const THREADS: usize = 8;
        const ITERATIONS: usize = 10_000;

        let dev = Device::synthetic(UsbAddress::Addr1, Some(42));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let dev = dev.clone();
                thread::spawn(move || {
                    for _ in 0..ITERATIONS {
                        let extra = dev.clone();
                        assert_eq!(extra.serial_number(), Some(42));
                        drop(extra);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(Arc::strong_count(&dev.inner), 1);
    }
}
