//! A crate for talking to J-Link debug probes connected via USB.
//!
//! This crate allows access to the vendor-specific USB interface used to control JTAG / SWD
//! operations and other functionality. It does *not* provide access to the virtual COM port
//! functionality (which is a regular CDC device, so no special support is needed), it does not
//! implement a debugger, and it does not interpret what the exchanged bits mean to the target:
//! it is signal transport only.
//!
//! # Usage
//!
//! Devices are found through a [`Context`], which yields inert [`Device`] descriptors. Opening a
//! descriptor returns a live [`JayLink`] session over which the target interface is selected,
//! the clock configured, and bit-exact JTAG/SWD transactions driven.
//!
//! A session performs one command/response round trip at a time; drive distinct devices from
//! distinct threads if you need parallelism. If a transfer times out or comes back short, the
//! session is tainted and must be closed and reopened, since the protocol has no in-band way to
//! resynchronize.
//!
//! # Pinout
//!
//! The probes use a pinout based on the standard 20-pin ARM JTAG connector, extended for SWD
//! compatibility.
//!
//! JTAG pinout:
//!
//! ```notrust
//!            ┌───────────┐
//!     VTref  │ *  1  2 * │ NC
//!     nTRST  │ *  3  4 * │ GND
//!       TDI  │ *  5  6 * │ GND
//!       TMS  │ *  7  8 * │ GND
//!       TCK ┌┘ *  9 10 * │ GND
//!      RTCK └┐ * 11 12 * │ GND
//!       TDO  │ * 13 14 * │ GND
//!     RESET  │ * 15 16 * │ GND
//!     DBGRQ  │ * 17 18 * │ GND
//! 5V-Supply  │ * 19 20 * │ GND
//!            └───────────┘
//! ```
//!
//! SWD pinout:
//!
//! ```notrust
//!            ┌───────────┐
//!     VTref  │ *  1  2 * │ NC
//!         -  │ *  3  4 * │ GND
//!         -  │ *  5  6 * │ GND
//!     SWDIO  │ *  7  8 * │ GND
//!     SWCLK ┌┘ *  9 10 * │ GND
//!         - └┐ * 11 12 * │ GND
//!       SWO  │ * 13 14 * │ GND
//!     RESET  │ * 15 16 * │ GND
//!         -  │ * 17 18 * │ GND
//! 5V-Supply  │ * 19 20 * │ GND
//!            └───────────┘
//! ```
//!
//! # Reference
//!
//! Segger has released a PDF documenting the USB protocol: "Reference manual for J-Link USB
//! Protocol" (Document RM08001-R2). The archive.org version is the most up-to-date one.

#![warn(missing_debug_implementations, unreachable_pub)]
// We use explicit lifetimes to make APIs easier to understand (this also affects rustdoc)
#![allow(clippy::needless_lifetimes)]

mod bits;
mod capabilities;
mod device;
mod error;
mod interface;
mod transport;

pub use self::bits::BitIter;
pub use self::capabilities::{Capabilities, Capability, CAPS_SIZE, EXT_CAPS_SIZE};
pub use self::device::{Context, Device, UsbAddress};
pub use self::error::{Error, ErrorKind};
pub use self::interface::{Interface, Interfaces};

use self::bits::IteratorExt as _;
use self::transport::{Transport, UsbTransport, TIMEOUT_DEFAULT};
use byteorder::{LittleEndian, ReadBytesExt};
use std::cell::{Cell, RefCell, RefMut};
use std::{cmp, fmt};
use tracing::{debug, trace};

/// A result type with the error hardwired to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Target interface speed value selecting adaptive clocking.
///
/// Passing this to [`JayLink::set_speed`] requires the device to support
/// [`Capability::AdaptiveClocking`].
pub const SPEED_ADAPTIVE_CLOCKING: u16 = 0xFFFF;

/// Size of the raw configuration block in bytes.
pub const CONFIG_SIZE: usize = 256;

#[repr(u8)]
enum Command {
    Version = 0x01,
    SetSpeed = 0x05,
    GetState = 0x07,
    SetTargetPower = 0x08,
    SelectIf = 0xC7,
    HwJtag2 = 0xCE,
    HwJtag3 = 0xCF,
    GetFreeMemory = 0xD4,
    HwClearReset = 0xDC,
    HwSetReset = 0xDD,
    HwClearTrst = 0xDE,
    HwSetTrst = 0xDF,
    GetCaps = 0xE8,
    GetExtCaps = 0xED,
    GetHwVersion = 0xF0,
    ReadConfig = 0xF2,
    WriteConfig = 0xF3,
}

/// JTAG command versions.
///
/// The version only affects the communication protocol with the probe, not the behaviour of the
/// JTAG operation itself. The caller chooses the version; this library performs no negotiation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JtagVersion {
    /// JTAG command version 2. Obsolete for major hardware version 5 and above; use
    /// [`JtagVersion::V3`] for those.
    V2,
    /// JTAG command version 3. Mandatory for major hardware version 5 and above.
    V3,
}

/// A live session with an opened J-Link device.
///
/// This is the main interface type of this library. There are multiple ways of obtaining an
/// instance of it:
///
/// * [`JayLink::open_by_serial`]: Either opens the only J-Link device connected to the computer,
///   or opens a specific one by its serial number. Recommended for applications that interact
///   with one device only (ie. most of them).
/// * [`Device::open`]: Opens a specific device obtained from [`Context::discover_devices`].
pub struct JayLink {
    transport: Box<dyn Transport>,
    closed: bool,

    /// Set when a transport-level failure may have left a response half-consumed. All further
    /// commands are refused.
    tainted: Cell<bool>,

    cmd_buf: RefCell<Vec<u8>>,

    /// The capabilities reported by the device. The legacy mask is fetched when the device is
    /// opened; the extended mask is fetched lazily on first request.
    caps: Capabilities,

    /// The supported target interfaces, fetched once when opening the device.
    interfaces: Interfaces,

    /// The currently selected target interface. Unknown until [`JayLink::select_interface`] is
    /// called (probes remember the selection between reconnections).
    interface: Option<Interface>,
}

impl JayLink {
    /// Opens the only connected J-Link device, or the one matching `serial`.
    ///
    /// If `serial` is `None` and more than one device is connected, this refuses to guess and
    /// fails with [`ErrorKind::MultipleDevicesFound`].
    pub fn open_by_serial(serial: Option<u32>) -> Result<Self> {
        let context = Context::new()?;
        let mut devices: Vec<Device> = context
            .discover_devices()?
            .into_iter()
            .filter(|dev| match serial {
                Some(serial) => dev.serial_number() == Some(serial),
                None => true,
            })
            .collect();

        match devices.len() {
            0 => Err(Error::new(
                ErrorKind::DeviceNotFound,
                match serial {
                    Some(serial) => format!("no J-Link device with serial {} found", serial),
                    None => "no J-Link device found".to_string(),
                },
            )),
            1 => devices.remove(0).open(),
            n => Err(Error::new(
                ErrorKind::MultipleDevicesFound,
                format!(
                    "{} J-Link devices connected; specify a serial number to select one",
                    n
                ),
            )),
        }
    }

    pub(crate) fn open_device(device: &Device) -> Result<Self> {
        let info = device.usb_info().ok_or_else(|| {
            Error::new(ErrorKind::DeviceNotFound, "device has no USB backing")
        })?;

        let transport = UsbTransport::open(info)?;
        Self::with_transport(Box::new(transport))
    }

    fn with_transport(transport: Box<dyn Transport>) -> Result<Self> {
        let mut this = Self {
            transport,
            closed: false,
            tainted: Cell::new(false),
            cmd_buf: RefCell::new(Vec::new()),
            caps: Capabilities::from_raw_legacy([0; CAPS_SIZE]),
            interfaces: Interfaces::empty(),
            interface: None,
        };
        this.fill_capabilities()?;
        this.fill_interfaces()?;

        Ok(this)
    }

    /// Closes the session, releasing the USB connection.
    ///
    /// The connection is released exactly once, even if commands failed during the session's
    /// lifetime. Dropping the handle has the same effect.
    pub fn close(mut self) {
        self.transport.close();
        self.closed = true;
    }

    /// Reads the advertised legacy capabilities from the device.
    fn fill_capabilities(&mut self) -> Result<()> {
        self.write_cmd(&[Command::GetCaps as u8])?;

        let mut buf = [0; CAPS_SIZE];
        self.read(&mut buf)?;

        let caps = Capabilities::from_raw_legacy(buf);
        debug!("legacy caps: {:?}", caps);
        self.caps = caps;
        Ok(())
    }

    fn fill_interfaces(&mut self) -> Result<()> {
        if !self.caps.contains(Capability::SelectIf) {
            // Pre-SELECT_IF probes only support JTAG, and have it selected implicitly.
            self.interfaces = Interfaces::single(Interface::Jtag);
            self.interface = Some(Interface::Jtag);

            return Ok(());
        }

        self.write_cmd(&[Command::SelectIf as u8, 0xFF])?;

        let mut buf = [0; 4];
        self.read(&mut buf)?;

        self.interfaces = Interfaces::from_bits_warn(u32::from_le_bytes(buf));
        Ok(())
    }

    fn buf(&self, len: usize) -> RefMut<'_, Vec<u8>> {
        let mut vec = self.cmd_buf.borrow_mut();
        vec.resize(len, 0);
        vec
    }

    fn check_usable(&self) -> Result<()> {
        if self.tainted.get() {
            Err(Error::new(
                ErrorKind::TaintedSession,
                "a previous transfer failed; close the session and reopen the device",
            ))
        } else {
            Ok(())
        }
    }

    /// Marks the session tainted and passes the error through.
    fn taint(&self, error: Error) -> Error {
        self.tainted.set(true);
        error
    }

    fn write_cmd(&self, cmd: &[u8]) -> Result<()> {
        self.check_usable()?;
        trace!("write {} bytes: {:x?}", cmd.len(), cmd);

        self.transport
            .write(cmd, TIMEOUT_DEFAULT)
            .map_err(|e| self.taint(e))
    }

    /// Reads exactly `buf.len()` bytes, looping physical transfers as needed.
    fn read(&self, buf: &mut [u8]) -> Result<()> {
        self.check_usable()?;

        let mut total = 0;
        while total < buf.len() {
            let n = self
                .transport
                .read(&mut buf[total..], TIMEOUT_DEFAULT)
                .map_err(|e| self.taint(e))?;

            if n == 0 {
                return Err(self.taint(Error::new(
                    ErrorKind::ShortTransfer,
                    format!(
                        "device returned {} of {} expected bytes",
                        total,
                        buf.len()
                    ),
                )));
            }
            total += n;
        }

        trace!("read {} bytes: {:x?}", buf.len(), buf);

        Ok(())
    }

    fn require_capability(&self, cap: Capability) -> Result<()> {
        if self.caps.contains(cap) {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::MissingCapability,
                format!("device is missing capabilities ({:?}) for operation", cap),
            ))
        }
    }

    fn require_interface_selected(&self, intf: Interface) -> Result<()> {
        match self.interface {
            Some(current) if current == intf => Ok(()),
            Some(current) => Err(Error::new(
                ErrorKind::Argument,
                format!(
                    "interface {} must be selected for this operation (currently using interface {})",
                    intf, current
                ),
            )),
            None => Err(Error::new(
                ErrorKind::Argument,
                format!("interface {} must be selected before performing target I/O", intf),
            )),
        }
    }

    /// Reads the firmware version string from the device.
    ///
    /// The returned string is freshly allocated and owned by the caller. It describes the
    /// firmware build identity; use [`JayLink::capabilities`] for feature detection instead of
    /// parsing it.
    pub fn firmware_version(&self) -> Result<String> {
        self.write_cmd(&[Command::Version as u8])?;

        let mut buf = [0; 2];
        self.read(&mut buf)?;
        let num_bytes = u16::from_le_bytes(buf);
        let mut buf = self.buf(num_bytes.into());
        let buf = &mut buf[..usize::from(num_bytes)];
        self.read(buf)?;

        Ok(String::from_utf8_lossy(
            // The firmware version string returned may contain null bytes. If
            // this happens, only return the preceding bytes.
            match buf.iter().position(|&b| b == 0) {
                Some(pos) => &buf[..pos],
                None => buf,
            },
        )
        .into_owned())
    }

    /// Reads the hardware version from the device.
    ///
    /// This requires the device to support [`Capability::GetHwVersion`].
    pub fn hardware_version(&self) -> Result<HardwareVersion> {
        self.require_capability(Capability::GetHwVersion)?;

        self.write_cmd(&[Command::GetHwVersion as u8])?;

        let mut buf = [0; 4];
        self.read(&mut buf)?;

        Ok(HardwareVersion::from_u32(u32::from_le_bytes(buf)))
    }

    /// Reads the hardware status: target reference voltage and raw pin states.
    pub fn hardware_status(&self) -> Result<HardwareStatus> {
        self.write_cmd(&[Command::GetState as u8])?;

        let mut buf = [0; 8];
        self.read(&mut buf)?;
        let mut buf = &buf[..];

        Ok(HardwareStatus {
            target_voltage: buf.read_u16::<LittleEndian>().unwrap(),
            tck: buf.read_u8().unwrap(),
            tdi: buf.read_u8().unwrap(),
            tdo: buf.read_u8().unwrap(),
            tms: buf.read_u8().unwrap(),
            tres: buf.read_u8().unwrap(),
            trst: buf.read_u8().unwrap(),
        })
    }

    /// Reads the size of the device's free memory, in bytes.
    ///
    /// This requires the device to support [`Capability::GetFreeMemory`].
    pub fn free_memory(&self) -> Result<u32> {
        self.require_capability(Capability::GetFreeMemory)?;

        self.write_cmd(&[Command::GetFreeMemory as u8])?;

        let mut buf = [0; 4];
        self.read(&mut buf)?;

        Ok(u32::from_le_bytes(buf))
    }

    /// Returns the capabilities advertised by the device.
    ///
    /// This returns the cached snapshot and performs no I/O. The snapshot contains the legacy
    /// mask until [`JayLink::read_extended_capabilities`] widens it.
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Reads the extended capability mask from the device and widens the cached snapshot.
    ///
    /// This requires the device to support [`Capability::GetExtCaps`]; calling it on a device
    /// without that bit is an argument error, not a device round trip.
    pub fn read_extended_capabilities(&mut self) -> Result<Capabilities> {
        self.require_capability(Capability::GetExtCaps)?;

        if self.caps.is_extended() {
            return Ok(self.caps);
        }

        self.write_cmd(&[Command::GetExtCaps as u8])?;

        let mut buf = [0; EXT_CAPS_SIZE];
        self.read(&mut buf)?;

        let caps = Capabilities::from_raw_ex(buf);
        if !caps.contains_all(&self.caps) {
            return Err(Error::new(
                ErrorKind::Protocol,
                format!(
                    "extended caps are not a superset of legacy caps (legacy: {:?}, ex: {:?})",
                    self.caps, caps
                ),
            ));
        }
        debug!("extended caps: {:?}", caps);
        self.caps = caps;
        Ok(caps)
    }

    /// Sets the target communication speed in kHz.
    ///
    /// Valid values are `1..=0xFFFE`, or [`SPEED_ADAPTIVE_CLOCKING`] to let the probe derive the
    /// clock from the target. Adaptive clocking requires
    /// [`Capability::AdaptiveClocking`].
    ///
    /// Switching the selected target interface resets the speed to an unspecified default, so
    /// this should be called *after* [`JayLink::select_interface`].
    pub fn set_speed(&mut self, speed: u16) -> Result<()> {
        if speed == 0 {
            return Err(Error::new(
                ErrorKind::Argument,
                "speed of 0 kHz is invalid (use SPEED_ADAPTIVE_CLOCKING for adaptive clocking)",
            ));
        }
        if speed == SPEED_ADAPTIVE_CLOCKING {
            self.require_capability(Capability::AdaptiveClocking)?;
        }

        let mut buf = [Command::SetSpeed as u8, 0, 0];
        buf[1..3].copy_from_slice(&speed.to_le_bytes());
        self.write_cmd(&buf)?;

        Ok(())
    }

    /// Returns the set of target interfaces supported by the device.
    ///
    /// This returns the snapshot taken when the device was opened and performs no I/O.
    pub fn available_interfaces(&self) -> Interfaces {
        self.interfaces
    }

    /// Queries the currently selected target interface from the device.
    ///
    /// This requires the device to support [`Capability::SelectIf`].
    ///
    /// **Note**: There is no guarantee that the returned interface is actually supported (ie. it
    /// might not be in [`JayLink::available_interfaces`]). In particular, some embedded probes
    /// start up with JTAG selected, but only support SWD.
    pub fn selected_interface(&self) -> Result<Interface> {
        self.require_capability(Capability::SelectIf)?;

        self.write_cmd(&[Command::SelectIf as u8, 0xFE])?;

        let mut buf = [0; 4];
        self.read(&mut buf)?;
        let raw = u32::from_le_bytes(buf);

        u8::try_from(raw)
            .ok()
            .and_then(|raw| Interface::try_from(raw).ok())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::Protocol,
                    format!("device reported unknown selected interface {:#010x}", raw),
                )
            })
    }

    /// Selects the interface to use for talking to the target MCU.
    ///
    /// This requires the device to support [`Capability::SelectIf`], and `intf` to be contained
    /// in [`JayLink::available_interfaces`]; both are checked before any communication takes
    /// place.
    ///
    /// Switching interfaces resets the configured transfer speed, so [`JayLink::set_speed`]
    /// needs to be called *after* `select_interface`.
    ///
    /// **Note**: Selecting a different interface may cause the probe to perform target I/O!
    pub fn select_interface(&mut self, intf: Interface) -> Result<()> {
        if self.interface == Some(intf) {
            return Ok(());
        }

        self.require_capability(Capability::SelectIf)?;

        if !self.interfaces.contains_interface(intf) {
            return Err(Error::new(
                ErrorKind::InterfaceNotSupported,
                format!("device does not support target interface {}", intf),
            ));
        }

        self.write_cmd(&[Command::SelectIf as u8, intf.as_u8()])?;

        // Returns the previous interface, ignore it
        let mut buf = [0; 4];
        self.read(&mut buf)?;

        self.interface = Some(intf);

        Ok(())
    }

    /// Pulls the RESET pin low.
    ///
    /// RESET is an open-collector / open-drain output; clearing it pulls the line to ground.
    pub fn clear_reset(&mut self) -> Result<()> {
        self.write_cmd(&[Command::HwClearReset as u8])
    }

    /// Releases the RESET pin, letting the output float.
    pub fn set_reset(&mut self) -> Result<()> {
        self.write_cmd(&[Command::HwSetReset as u8])
    }

    /// Enables or disables the target power supply on pin 19.
    ///
    /// This requires the device to support [`Capability::SetTargetPower`].
    ///
    /// **Note**: Some embedded probes may not provide this feature or do not have the 5V supply
    /// routed to a pin. In that case this function might return an error, or it might return
    /// successfully, but without doing anything.
    pub fn set_target_power(&mut self, enable: bool) -> Result<()> {
        self.require_capability(Capability::SetTargetPower)?;
        self.write_cmd(&[Command::SetTargetPower as u8, enable as u8])?;
        Ok(())
    }

    /// Reads the raw 256-byte configuration block from the device.
    ///
    /// The contents are opaque to this library; interpretation is up to the caller. This
    /// requires the device to support [`Capability::ReadConfig`].
    pub fn read_raw_config(&self) -> Result<[u8; CONFIG_SIZE]> {
        self.require_capability(Capability::ReadConfig)?;

        self.write_cmd(&[Command::ReadConfig as u8])?;

        let mut buf = [0; CONFIG_SIZE];
        self.read(&mut buf)?;

        Ok(buf)
    }

    /// Writes the raw 256-byte configuration block to the device.
    ///
    /// The block is written atomically as a whole; this requires the device to support
    /// [`Capability::WriteConfig`].
    pub fn write_raw_config(&mut self, config: &[u8; CONFIG_SIZE]) -> Result<()> {
        self.require_capability(Capability::WriteConfig)?;

        let mut buf = self.buf(1 + CONFIG_SIZE);
        buf[0] = Command::WriteConfig as u8;
        buf[1..].copy_from_slice(config);
        self.write_cmd(&buf)?;

        Ok(())
    }

    /// Pulls the (n)TRST pin low.
    ///
    /// This only affects the JTAG target interface.
    pub fn jtag_clear_trst(&mut self) -> Result<()> {
        self.write_cmd(&[Command::HwClearTrst as u8])
    }

    /// Releases the (n)TRST pin.
    pub fn jtag_set_trst(&mut self) -> Result<()> {
        self.write_cmd(&[Command::HwSetTrst as u8])
    }

    /// Performs a JTAG I/O operation.
    ///
    /// This shifts out data on `TMS` (pin 7) and `TDI` (pin 5), while reading data shifted into
    /// `TDO` (pin 13). The data received on `TDO` is returned as an iterator yielding `bool`s,
    /// containing exactly as many bits as were shifted out; byte padding on the wire is never
    /// exposed.
    ///
    /// The JTAG interface must be selected (via [`JayLink::select_interface`]) before calling
    /// this. The caller also chooses the JTAG command `version` matching the connected hardware;
    /// no negotiation is performed.
    ///
    /// # Parameters
    ///
    /// * `tms`: TMS bits to transmit.
    /// * `tdi`: TDI bits to transmit.
    /// * `version`: the [`JtagVersion`] to encode the transfer with.
    ///
    /// # Errors
    ///
    /// `tms` and `tdi` must yield the same number of bits, and at most 65535 of them; violating
    /// either is an argument error, reported before any communication with the device. Shifting
    /// zero bits is a no-op that returns an empty iterator without any transport call.
    // NB: Explicit `'a` lifetime used to improve rustdoc output
    pub fn jtag_io<'a, M, D>(
        &'a mut self,
        tms: M,
        tdi: D,
        version: JtagVersion,
    ) -> Result<BitIter<'a>>
    where
        M: IntoIterator<Item = bool>,
        D: IntoIterator<Item = bool>,
    {
        self.require_interface_selected(Interface::Jtag)?;

        let (cmd, has_status_byte) = match version {
            JtagVersion::V2 => (Command::HwJtag2, false),
            JtagVersion::V3 => (Command::HwJtag3, true),
        };

        // Collect the bit iterators into the buffer. We don't know the length in advance.
        let tms = tms.into_iter();
        let tdi = tdi.into_iter();
        let bit_count_hint = cmp::max(tms.size_hint().0, tdi.size_hint().0);
        let capacity = 1 + 1 + 2 + ((bit_count_hint + 7) / 8) * 2;
        let mut buf = self.buf(capacity);
        buf.resize(4, 0);
        buf[0] = cmd as u8;
        // buf[1] is dummy data for alignment
        // buf[2..=3] is the bit count, which we'll fill in later
        let mut tms_bit_count = 0;
        buf.extend(tms.inspect(|_| tms_bit_count += 1).collapse_bytes());
        let mut tdi_bit_count = 0;
        buf.extend(tdi.inspect(|_| tdi_bit_count += 1).collapse_bytes());

        if tms_bit_count != tdi_bit_count {
            return Err(Error::new(
                ErrorKind::Argument,
                format!(
                    "TMS and TDI must have the same number of bits ({} vs {})",
                    tms_bit_count, tdi_bit_count
                ),
            ));
        }

        if tms_bit_count == 0 {
            return Ok(BitIter::new(&[], 0));
        }

        let bit_count = u16::try_from(tms_bit_count).map_err(|_| {
            Error::new(
                ErrorKind::Argument,
                format!(
                    "too much data to transfer in one operation ({} bits, max is 65535)",
                    tms_bit_count
                ),
            )
        })?;

        // JTAG3 and JTAG2 use the same request format.
        buf[2..=3].copy_from_slice(&bit_count.to_le_bytes());

        self.write_cmd(&buf)?;

        // Round bit count up to a multiple of 8 to get the number of response bytes.
        let num_resp_bytes = (tms_bit_count + 7) / 8;
        trace!(
            "{} TMS/TDI bits sent; reading {} response bytes",
            tms_bit_count,
            num_resp_bytes
        );

        // Response is `num_resp_bytes` TDO data bytes and, for the JTAG3 command, one status
        // byte.
        let mut read_len = num_resp_bytes;

        if has_status_byte {
            read_len += 1;
        }

        self.read(&mut buf[..read_len])?;

        if has_status_byte && buf[read_len - 1] != 0 {
            return Err(Error::new(
                ErrorKind::Protocol,
                format!(
                    "probe I/O command returned error code {:#x}",
                    buf[read_len - 1]
                ),
            ));
        }

        drop(buf);

        Ok(BitIter::new(
            &self.cmd_buf.get_mut()[..num_resp_bytes],
            tms_bit_count,
        ))
    }

    /// Performs an SWD I/O operation.
    ///
    /// SWD is half-duplex with per-cycle direction switching: for every clock cycle, the
    /// corresponding `dir` bit decides whether the probe drives SWDIO (`true`) or samples it
    /// (`false`).
    ///
    /// The SWD interface must be selected (via [`JayLink::select_interface`]) before calling
    /// this.
    ///
    /// # Parameters
    ///
    /// * `dir`: transfer direction of each SWDIO bit (`true` = output, `false` = input).
    /// * `swdio`: SWD data bits to drive where `dir` is set; ignored where it is clear.
    ///
    /// # Return Value
    ///
    /// An iterator over the `SWDIO` bits is returned. Bits that were sent to the target (where
    /// `dir` = `true`) are undefined; bits that were read from the target (`dir` = `false`)
    /// have whatever value the target sent.
    ///
    /// # Errors
    ///
    /// The same argument rules as [`JayLink::jtag_io`] apply: equal bit counts, at most 65535
    /// bits, and a zero-bit transfer is a no-op without any transport call.
    // NB: Explicit `'a` lifetime used to improve rustdoc output
    pub fn swd_io<'a, D, S>(&'a mut self, dir: D, swdio: S) -> Result<BitIter<'a>>
    where
        D: IntoIterator<Item = bool>,
        S: IntoIterator<Item = bool>,
    {
        self.require_interface_selected(Interface::Swd)?;

        // Collect the bit iterators into the buffer. We don't know the length in advance.
        let dir = dir.into_iter();
        let swdio = swdio.into_iter();
        let bit_count_hint = cmp::max(dir.size_hint().0, swdio.size_hint().0);
        let capacity = 1 + 1 + 2 + ((bit_count_hint + 7) / 8) * 2;
        let mut buf = self.buf(capacity);
        buf.resize(4, 0);
        buf[0] = Command::HwJtag3 as u8;
        // buf[1] is dummy data for alignment
        // buf[2..=3] is the bit count, which we'll fill in later
        let mut dir_bit_count = 0;
        buf.extend(dir.inspect(|_| dir_bit_count += 1).collapse_bytes());
        let mut swdio_bit_count = 0;
        buf.extend(swdio.inspect(|_| swdio_bit_count += 1).collapse_bytes());

        if dir_bit_count != swdio_bit_count {
            return Err(Error::new(
                ErrorKind::Argument,
                format!(
                    "`dir` and `swdio` must have the same number of bits ({} vs {})",
                    dir_bit_count, swdio_bit_count
                ),
            ));
        }

        if dir_bit_count == 0 {
            return Ok(BitIter::new(&[], 0));
        }

        let bit_count = u16::try_from(dir_bit_count).map_err(|_| {
            Error::new(
                ErrorKind::Argument,
                format!(
                    "too much data to transfer in one operation ({} bits, max is 65535)",
                    dir_bit_count
                ),
            )
        })?;

        buf[2..=3].copy_from_slice(&bit_count.to_le_bytes());
        let num_bytes = (dir_bit_count + 7) / 8;

        self.write_cmd(&buf)?;

        // Response is `num_bytes` SWDIO data bytes and one status byte.
        self.read(&mut buf[..num_bytes + 1])?;

        if buf[num_bytes] != 0 {
            return Err(Error::new(
                ErrorKind::Protocol,
                format!("probe I/O command returned error code {:#x}", buf[num_bytes]),
            ));
        }

        drop(buf);

        Ok(BitIter::new(
            &self.cmd_buf.get_mut()[..num_bytes],
            dir_bit_count,
        ))
    }
}

impl Drop for JayLink {
    fn drop(&mut self) {
        if !self.closed {
            self.transport.close();
            self.closed = true;
        }
    }
}

impl fmt::Debug for JayLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JayLink")
            .field("caps", &self.caps)
            .field("interfaces", &self.interfaces)
            .field("interface", &self.interface)
            .finish()
    }
}

/// A hardware version returned by [`JayLink::hardware_version`].
///
/// Note that the reported hardware version does not allow reliable feature detection, since
/// embedded probes might return a hardware version of 1.0.0 despite supporting SWD and other
/// much newer features. Use [`JayLink::capabilities`] instead.
#[derive(Debug)]
pub struct HardwareVersion(u32);

impl HardwareVersion {
    fn from_u32(raw: u32) -> Self {
        HardwareVersion(raw)
    }

    /// Returns the type of hardware (or `None` if the hardware type is unknown).
    pub fn hardware_type(&self) -> Option<HardwareType> {
        Some(match (self.0 / 1000000) % 100 {
            0 => HardwareType::JLink,
            1 => HardwareType::JTrace,
            2 => HardwareType::Flasher,
            3 => HardwareType::JLinkPro,
            _ => return None,
        })
    }

    /// The major version.
    pub fn major(&self) -> u8 {
        // Decimal coded Decimal, cool cool
        (self.0 / 10000) as u8
    }

    /// The minor version.
    pub fn minor(&self) -> u8 {
        ((self.0 % 10000) / 100) as u8
    }

    /// The hardware revision.
    pub fn revision(&self) -> u8 {
        (self.0 % 100) as u8
    }
}

impl fmt::Display for HardwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(hw) = self.hardware_type() {
            write!(f, "{} ", hw)?;
        }
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.revision())
    }
}

/// The hardware/product type of the device.
#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HardwareType {
    JLink,
    JTrace,
    Flasher,
    JLinkPro,
}

impl fmt::Display for HardwareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HardwareType::JLink => "J-Link",
            HardwareType::JTrace => "J-Trace",
            HardwareType::Flasher => "J-Flash",
            HardwareType::JLinkPro => "J-Link Pro",
        })
    }
}

/// Hardware status returned by [`JayLink::hardware_status`].
#[derive(Debug)]
pub struct HardwareStatus {
    /// Target reference voltage in mV.
    pub target_voltage: u16,
    /// TCK pin state.
    pub tck: u8,
    /// TDI pin state.
    pub tdi: u8,
    /// TDO pin state.
    pub tdo: u8,
    /// TMS pin state.
    pub tms: u8,
    /// TRES pin state.
    pub tres: u8,
    /// TRST pin state.
    pub trst: u8,
}
