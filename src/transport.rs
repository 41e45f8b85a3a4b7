//! USB transport for the proprietary command/response protocol.
//!
//! The probe exposes a vendor-specific USB interface with one bulk IN and one bulk OUT endpoint.
//! All commands are written to the OUT endpoint and responses read back from the IN endpoint,
//! strictly half-duplex. Every blocking call is bounded by a timeout; there is no unbounded wait.

use std::time::Duration;

use async_io::{block_on, Timer};
use futures_lite::FutureExt;
use nusb::transfer::{Direction, EndpointType, RequestBuffer};
use nusb::DeviceInfo;
use tracing::{debug, trace, warn};

use crate::error::ResultExt as _;
use crate::{Error, ErrorKind, Result};

/// Default timeout bounding every physical transfer.
pub(crate) const TIMEOUT_DEFAULT: Duration = Duration::from_millis(500);

/// A byte-pipe to a device.
///
/// This seam exists so the command layer can be exercised against a scripted fake in tests; the
/// only production implementation is [`UsbTransport`].
pub(crate) trait Transport: Send {
    /// Writes the entire buffer or fails.
    fn write(&self, buf: &[u8], timeout: Duration) -> Result<()>;

    /// Performs a single bulk IN transfer into `buf`, returning the number of bytes received.
    ///
    /// May legitimately return fewer bytes than `buf.len()`; the caller is responsible for
    /// looping until a response is complete and for treating a 0-byte transfer as a short read.
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Releases the connection.
    ///
    /// The session guarantees this is called exactly once, on every exit path.
    fn close(&mut self);
}

/// [`Transport`] implementation over a claimed `nusb` interface.
pub(crate) struct UsbTransport {
    handle: nusb::Interface,
    read_ep: u8,
    write_ep: u8,
}

impl UsbTransport {
    /// Opens the vendor-specific interface of `usb_device` and claims it.
    pub(crate) fn open(usb_device: &DeviceInfo) -> Result<Self> {
        fn open_error(e: std::io::Error, while_: &'static str) -> Error {
            let inner: Box<dyn std::error::Error + Send + Sync> = if cfg!(windows) {
                format!(
                    "{} (this error may be caused by not having the \
                        WinUSB driver installed; use Zadig (https://zadig.akeo.ie/) to install it \
                        for the J-Link device; this will replace the SEGGER J-Link driver)",
                    e
                )
                .into()
            } else {
                Box::new(e)
            };

            Error::with_while(ErrorKind::Usb, inner, while_)
        }

        let handle = usb_device
            .open()
            .map_err(|e| open_error(e, "opening USB device"))?;

        let configs: Vec<_> = handle.configurations().collect();

        if configs.len() != 1 {
            warn!("device has {} configurations, expected 1", configs.len());
        }

        let conf = &configs[0];
        debug!("scanning {} interfaces", conf.interfaces().count());
        trace!("active configuration descriptor: {:#x?}", conf);

        let mut vendor_intf = None;
        for intf in conf.interfaces() {
            trace!("interface #{} descriptors:", intf.interface_number());

            for descr in intf.alt_settings() {
                trace!("{:#x?}", descr);

                // The proprietary interface is detected by the vendor-specific class codes and
                // the endpoint properties.
                if descr.class() == 0xff && descr.subclass() == 0xff && descr.protocol() == 0xff {
                    if let Some((intf, _, _)) = vendor_intf {
                        return Err(format!(
                            "found multiple matching USB interfaces ({} and {})",
                            intf,
                            descr.interface_number()
                        ))
                        .jaylink_err();
                    }

                    let endpoints: Vec<_> = descr.endpoints().collect();
                    trace!("endpoint descriptors: {:#x?}", endpoints);
                    if endpoints.len() != 2 {
                        warn!(
                            "vendor-specific interface with {} endpoints, expected 2 (skipping interface)",
                            endpoints.len()
                        );
                        continue;
                    }

                    if !endpoints
                        .iter()
                        .all(|ep| ep.transfer_type() == EndpointType::Bulk)
                    {
                        warn!(
                            "encountered non-bulk endpoints, skipping interface: {:#x?}",
                            endpoints
                        );
                        continue;
                    }

                    let (read_ep, write_ep) = if endpoints[0].direction() == Direction::In {
                        (endpoints[0].address(), endpoints[1].address())
                    } else {
                        (endpoints[1].address(), endpoints[0].address())
                    };

                    vendor_intf = Some((descr.interface_number(), read_ep, write_ep));
                    debug!("J-Link interface is #{}", descr.interface_number());
                }
            }
        }

        let Some((intf, read_ep, write_ep)) = vendor_intf else {
            return Err("device is not a J-Link device".to_string()).jaylink_err();
        };

        let handle = handle
            .claim_interface(intf)
            .map_err(|e| open_error(e, "taking control over USB device"))?;

        Ok(Self {
            handle,
            read_ep,
            write_ep,
        })
    }
}

impl Transport for UsbTransport {
    fn write(&self, buf: &[u8], timeout: Duration) -> Result<()> {
        let fut = async {
            let comp = self.handle.bulk_out(self.write_ep, buf.to_vec()).await;
            comp.status.jaylink_err_while("writing data to device")?;

            Ok(comp.data.actual_length())
        };

        let n = block_on(fut.or(async {
            Timer::after(timeout).await;
            Err(Error::new(
                ErrorKind::Timeout,
                format!("bulk write did not complete within {:?}", timeout),
            ))
        }))?;

        if n != buf.len() {
            return Err(Error::new(
                ErrorKind::Protocol,
                format!("incomplete write (expected {} bytes, wrote {})", buf.len(), n),
            ));
        }
        Ok(())
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut queue = self.handle.bulk_in_queue(self.read_ep);
        queue.submit(RequestBuffer::new(buf.len()));

        let Some(comp) = block_on(
            async { Some(queue.next_complete().await) }.or(async {
                Timer::after(timeout).await;
                None
            }),
        ) else {
            queue.cancel_all();
            let _ = block_on(queue.next_complete());
            return Err(Error::new(
                ErrorKind::Timeout,
                format!("bulk read did not complete within {:?}", timeout),
            ));
        };

        comp.status.jaylink_err_while("reading from device")?;
        let n = comp.data.len();
        buf[..n].copy_from_slice(&comp.data);
        Ok(n)
    }

    fn close(&mut self) {
        // The claimed interface is released when the handle drops; nothing to flush on the wire.
        trace!("closing USB transport");
    }
}
