use std::fmt;

use bitflags::bitflags;

use crate::{Error, ErrorKind};

/// List of target interfaces.
///
/// A probe advertises the subset it supports; see [`crate::JayLink::available_interfaces`].
#[non_exhaustive]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Interface {
    /// JTAG interface (IEEE 1149.1). Supported by most probes (some embedded probes might only
    /// support SWD).
    Jtag = 0,
    /// SWD interface (Serial Wire Debug), used by most Cortex-M chips, and supported by almost
    /// all probes.
    Swd = 1,
    /// Background Debug Mode 3, a single-wire debug interface used on some NXP microcontrollers.
    Bdm3 = 2,
    /// FINE, a two-wire debugging interface used by Renesas RX MCUs.
    Fine = 3,
    /// 2-wire In-Circuit System Programming (ICSP) interface of PIC32 chips.
    Pic32Icsp = 4,
}

impl Interface {
    /// Highest valid interface number.
    pub(crate) const MAX: u8 = Interface::Pic32Icsp as u8;

    const ALL: &'static [Self] = &[
        Self::Jtag,
        Self::Swd,
        Self::Bdm3,
        Self::Fine,
        Self::Pic32Icsp,
    ];

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    fn mask(self) -> Interfaces {
        Interfaces::from_bits_truncate(1 << self as u32)
    }
}

impl TryFrom<u8> for Interface {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Interface::Jtag),
            1 => Ok(Interface::Swd),
            2 => Ok(Interface::Bdm3),
            3 => Ok(Interface::Fine),
            4 => Ok(Interface::Pic32Icsp),
            _ => Err(Error::new(
                ErrorKind::Argument,
                format!(
                    "invalid target interface number {} (max is {})",
                    value,
                    Interface::MAX
                ),
            )),
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Interface::Jtag => "JTAG",
            Interface::Swd => "SWD",
            Interface::Bdm3 => "BDM3",
            Interface::Fine => "FINE",
            Interface::Pic32Icsp => "PIC32 ICSP",
        })
    }
}

bitflags! {
    /// A set of supported target interfaces.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct Interfaces: u32 {
        const JTAG = 1 << 0;
        const SWD = 1 << 1;
        const BDM3 = 1 << 2;
        const FINE = 1 << 3;
        const PIC32_ICSP = 1 << 4;
    }
}

impl Interfaces {
    pub(crate) fn from_bits_warn(raw: u32) -> Self {
        let flags = Self::from_bits_truncate(raw);
        if flags.bits() != raw {
            tracing::debug!(
                "unknown bits in interface mask: {raw:#010x} truncated to {:#010x}",
                flags.bits()
            );
        }
        flags
    }

    pub(crate) fn single(interface: Interface) -> Self {
        interface.mask()
    }

    /// Returns whether `interface` is contained in `self`.
    pub fn contains_interface(&self, interface: Interface) -> bool {
        self.contains(interface.mask())
    }

    /// Returns an iterator over the contained [`Interface`]s.
    pub fn iter_interfaces(&self) -> impl Iterator<Item = Interface> + '_ {
        Interface::ALL
            .iter()
            .copied()
            .filter(|intf| self.contains_interface(*intf))
    }
}

impl fmt::Debug for Interfaces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter_interfaces()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_from_rejects_out_of_range() {
        assert_eq!(Interface::try_from(0).unwrap(), Interface::Jtag);
        assert_eq!(Interface::try_from(4).unwrap(), Interface::Pic32Icsp);

        for raw in [5, 6, 0x7F, 0xFF] {
            let err = Interface::try_from(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Argument);
        }
    }

    #[test]
    fn set_membership() {
        let set = Interfaces::from_bits_warn(0b00011);
        assert!(set.contains_interface(Interface::Jtag));
        assert!(set.contains_interface(Interface::Swd));
        assert!(!set.contains_interface(Interface::Fine));
        assert_eq!(
            set.iter_interfaces().collect::<Vec<_>>(),
            [Interface::Jtag, Interface::Swd]
        );
    }

    #[test]
    fn unknown_bits_are_dropped() {
        let set = Interfaces::from_bits_warn(0xFFFF_FFFF);
        assert_eq!(set, Interfaces::all());
    }
}
