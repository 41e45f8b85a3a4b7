//! Device capabilities.
//!
//! Optional protocol commands are advertised as bits in a capability mask. The legacy mask is
//! 4 bytes; devices that set [`Capability::GetExtCaps`] additionally support a 32-byte extended
//! mask that is a superset of the legacy one.

use std::fmt;

/// Number of bytes in the legacy capability mask.
pub const CAPS_SIZE: usize = 4;

/// Number of bytes in the extended capability mask.
pub const EXT_CAPS_SIZE: usize = 32;

/// List of capabilities that may be advertised by a device.
///
/// Capability identifiers are sparse: the gaps hold bits whose meaning is unknown or that gate
/// commands outside the scope of this library.
#[non_exhaustive]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum Capability {
    /// Device supports retrieval of the hardware version.
    GetHwVersion = 1,
    /// Device supports adaptive clocking.
    AdaptiveClocking = 3,
    /// Device supports reading the raw configuration block.
    ReadConfig = 4,
    /// Device supports writing the raw configuration block.
    WriteConfig = 5,
    /// Device supports retrieval of the free memory size.
    GetFreeMemory = 11,
    /// Device supports switching the target power supply.
    SetTargetPower = 13,
    /// Device supports target interface selection.
    SelectIf = 17,
    /// Device supports retrieval of the extended capability mask.
    GetExtCaps = 31,
}

impl Capability {
    const ALL: &'static [Self] = &[
        Self::GetHwVersion,
        Self::AdaptiveClocking,
        Self::ReadConfig,
        Self::WriteConfig,
        Self::GetFreeMemory,
        Self::SetTargetPower,
        Self::SelectIf,
        Self::GetExtCaps,
    ];
}

/// A set of capabilities advertised by a device.
///
/// This is a plain bit vector over the raw mask bytes, so it can represent capability bits this
/// library knows nothing about (newer firmware may set them).
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Capabilities {
    bytes: [u8; EXT_CAPS_SIZE],
    /// Number of valid bits. Either `CAPS_SIZE * 8` or `EXT_CAPS_SIZE * 8`.
    bits: usize,
}

impl Capabilities {
    /// Creates a `Capabilities` instance from the 4-byte legacy mask.
    pub(crate) fn from_raw_legacy(raw: [u8; CAPS_SIZE]) -> Self {
        let mut bytes = [0; EXT_CAPS_SIZE];
        bytes[..CAPS_SIZE].copy_from_slice(&raw);
        Self {
            bytes,
            bits: CAPS_SIZE * 8,
        }
    }

    /// Creates a `Capabilities` instance from the 32-byte extended mask.
    pub(crate) fn from_raw_ex(raw: [u8; EXT_CAPS_SIZE]) -> Self {
        Self {
            bytes: raw,
            bits: EXT_CAPS_SIZE * 8,
        }
    }

    /// Creates a `Capabilities` instance from a raw mask buffer.
    ///
    /// This is a pure function and does not require an open device: it can be used to inspect
    /// capability data obtained elsewhere (eg. a stored configuration dump). Bytes beyond the
    /// extended mask size are ignored.
    pub fn from_raw_bytes(raw: &[u8]) -> Self {
        let len = raw.len().min(EXT_CAPS_SIZE);
        let mut bytes = [0; EXT_CAPS_SIZE];
        bytes[..len].copy_from_slice(&raw[..len]);
        Self {
            bytes,
            bits: len * 8,
        }
    }

    /// Determines whether `self` contains capability `cap`.
    pub fn contains(&self, cap: Capability) -> bool {
        self.contains_id(cap as u32)
    }

    /// Determines whether the capability bit `id` is set.
    ///
    /// An `id` at or beyond the width of the stored mask is simply not contained, so probing
    /// forward-compatible capability identifiers on older devices is not an error.
    pub fn contains_id(&self, id: u32) -> bool {
        let id = id as usize;
        if id >= self.bits {
            return false;
        }

        self.bytes[id / 8] & (1 << (id % 8)) != 0
    }

    /// Determines whether `self` contains every bit set in `other`.
    pub(crate) fn contains_all(&self, other: &Capabilities) -> bool {
        other
            .bytes
            .iter()
            .zip(&self.bytes)
            .all(|(theirs, ours)| ours & theirs == *theirs)
    }

    /// Returns whether this snapshot already includes the extended mask.
    pub(crate) fn is_extended(&self) -> bool {
        self.bits == EXT_CAPS_SIZE * 8
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for cap in Capability::ALL {
            if self.contains(*cap) {
                set.entry(cap);
            }
        }

        // Bits we have no name for still show up, as raw indices.
        for id in 0..self.bits as u32 {
            if self.contains_id(id) && !Capability::ALL.iter().any(|c| *c as u32 == id) {
                set.entry(&id);
            }
        }
        set.finish()
    }
}
