//! Bit-level (un)packing between logical signal sequences and the packed wire format.
//!
//! The device expects arbitrary-length bit sequences packed LSb-first: bit `i` of a logical
//! sequence is stored in bit `i % 8` of byte `i / 8`. Pad bits in a trailing partial byte are
//! zero on the way out and must never be surfaced on the way in.

use std::fmt;

/// An iterator over a received bit stream.
///
/// Yields exactly the number of bits the originating transaction clocked, regardless of the
/// byte-padding used on the wire.
#[derive(Clone)]
pub struct BitIter<'a> {
    buf: &'a [u8],
    next_bit: u8,
    bits_left: usize,
}

impl<'a> BitIter<'a> {
    pub(crate) fn new(buf: &'a [u8], total_bits: usize) -> Self {
        assert!(
            buf.len() * 8 >= total_bits,
            "cannot pull {} bits out of {} bytes",
            total_bits,
            buf.len()
        );

        Self {
            buf,
            next_bit: 0,
            bits_left: total_bits,
        }
    }

    /// Returns the number of bits left in `self`.
    pub fn bits_left(&self) -> usize {
        self.bits_left
    }
}

impl Iterator for BitIter<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        if self.bits_left == 0 {
            return None;
        }

        let byte = self.buf.first().unwrap();
        let bit = byte & (1 << self.next_bit) != 0;
        if self.next_bit < 7 {
            self.next_bit += 1;
        } else {
            self.next_bit = 0;
            self.buf = &self.buf[1..];
        }

        self.bits_left -= 1;
        Some(bit)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.bits_left, Some(self.bits_left))
    }
}

impl ExactSizeIterator for BitIter<'_> {}

impl fmt::Debug for BitIter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self
            .clone()
            .map(|bit| if bit { '1' } else { '0' })
            .collect::<String>();
        write!(f, "BitIter({})", s)
    }
}

pub(crate) trait IteratorExt: Sized {
    fn collapse_bytes(self) -> ByteIter<Self>;
}

impl<I: Iterator<Item = bool>> IteratorExt for I {
    fn collapse_bytes(self) -> ByteIter<Self> {
        ByteIter { inner: self }
    }
}

/// Packs a bit iterator into bytes, LSb-first, zero-padding the final partial byte.
pub(crate) struct ByteIter<I> {
    inner: I,
}

impl<I: Iterator<Item = bool>> Iterator for ByteIter<I> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let mut byte = 0;
        let mut has_data = false;
        for (pos, bit) in self.inner.by_ref().take(8).enumerate() {
            has_data = true;
            byte |= (bit as u8) << pos;
        }

        has_data.then_some(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn collapse_bytes() {
        fn collapse<const N: usize>(v: [bool; N]) -> Vec<u8> {
            v.into_iter().collapse_bytes().collect()
        }

        assert_eq!(collapse([]), [] as [u8; 0]);
        assert_eq!(collapse([true]), [0x01]);
        assert_eq!(collapse([false, true]), [0x02]);
        assert_eq!(collapse([true, false]), [0x01]);
        assert_eq!(collapse([false]), [0x00]);
        assert_eq!(collapse([false; 8]), [0x00]);
        assert_eq!(collapse([true; 8]), [0xFF]);
        assert_eq!(collapse([true; 7]), [0x7F]);
        assert_eq!(collapse([true; 9]), [0xFF, 0x01]);
    }

    #[test]
    fn padding_bits_are_zero() {
        let bytes: Vec<u8> = [true; 3].into_iter().collapse_bytes().collect();
        assert_eq!(bytes, [0x07]);
    }

    #[test]
    fn bit_iter() {
        fn bit_iter<const N: usize>(b: [u8; N], num: usize) -> Vec<bool> {
            BitIter::new(&b, num).collect()
        }

        assert_eq!(bit_iter([], 0), Vec::<bool>::new());
        assert_eq!(bit_iter([0xFF], 0), Vec::<bool>::new());
        assert_eq!(bit_iter([0xFF, 0xFF], 0), Vec::<bool>::new());
        assert_eq!(bit_iter([0xFF], 1), [true]);
        assert_eq!(bit_iter([0x00], 1), [false]);
        assert_eq!(bit_iter([0x01], 1), [true]);
        assert_eq!(bit_iter([0x01], 2), [true, false]);
        assert_eq!(bit_iter([0x02], 2), [false, true]);
        assert_eq!(bit_iter([0x02], 3), [false, true, false]);

        assert_eq!(
            bit_iter([0x01, 0x01], 9),
            [true, false, false, false, false, false, false, false, true]
        );
    }

    #[test]
    fn round_trip_all_lengths() {
        // Packing then unpacking must reproduce the exact input for any bit length, and pad
        // bits must never leak into the result.
        let mut rng = rand::thread_rng();
        for len in 0..=4096 {
            let bits: Vec<bool> = (0..len).map(|_| rng.gen()).collect();
            let packed: Vec<u8> = bits.iter().copied().collapse_bytes().collect();
            assert_eq!(packed.len(), (len + 7) / 8);

            let unpacked: Vec<bool> = BitIter::new(&packed, len).collect();
            assert_eq!(unpacked, bits, "round trip failed for length {}", len);
        }
    }
}
