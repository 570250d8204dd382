//! Impulse Tracker compressed-sample decoder.
//!
//! Samples are stored as a sequence of independently decodable blocks,
//! each prefixed with its compressed byte length (u16 LE). Within a
//! block, bits are consumed LSB-first and decoded at a varying width
//! `w` (starting at 9 for 8-bit samples, 17 for 16-bit); escape values
//! grow, shrink or reset `w`, everything else is a signed delta added
//! to a running accumulator that wraps at the sample bit width. IT 2.15
//! files apply the delta filter twice.

use crate::FormatError;

const BLOCK_SAMPLES_8: usize = 0x8000;
const BLOCK_SAMPLES_16: usize = 0x4000;
/// Widths below this use the all-ones escape.
const LOW_WIDTH: u32 = 7;

/// LSB-first bit reader over one compressed block.
struct BitReader<'a> {
    data: &'a [u8],
    byte: usize,
    bit: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, byte: 0, bit: 0 }
    }

    /// Read `n` bits (n <= 32). Returns None once the block is exhausted.
    fn read(&mut self, n: u32) -> Option<u32> {
        let mut value = 0u32;
        for i in 0..n {
            if self.byte >= self.data.len() {
                return None;
            }
            let bit = (self.data[self.byte] >> self.bit) & 1;
            value |= (bit as u32) << i;
            self.bit += 1;
            if self.bit == 8 {
                self.bit = 0;
                self.byte += 1;
            }
        }
        Some(value)
    }
}

/// Decompress an 8-bit IT sample to `length` frames.
///
/// `it215` enables the double-delta filter used by IT 2.15 files.
pub fn decompress_it_8bit(
    data: &[u8],
    length: usize,
    it215: bool,
) -> Result<Vec<i8>, FormatError> {
    let mut out: Vec<i8> = Vec::with_capacity(length);
    let mut pos = 0usize;

    while out.len() < length {
        if pos >= data.len() {
            // Input exhausted; caller pads the remainder.
            break;
        }
        if pos + 2 > data.len() {
            return Err(FormatError::UnexpectedEof);
        }
        let block_len = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2;
        if pos + block_len > data.len() {
            return Err(FormatError::UnexpectedEof);
        }
        let block = &data[pos..pos + block_len];
        pos += block_len;

        let want = (length - out.len()).min(BLOCK_SAMPLES_8);
        decompress_block_8(block, want, it215, &mut out)?;
    }

    Ok(out)
}

fn decompress_block_8(
    block: &[u8],
    want: usize,
    it215: bool,
    out: &mut Vec<i8>,
) -> Result<(), FormatError> {
    let mut bits = BitReader::new(block);
    let mut width: u32 = 9;
    let mut acc: i8 = 0;
    let mut acc2: i8 = 0;
    let mut produced = 0usize;

    while produced < want {
        let raw = match bits.read(width) {
            Some(v) => v,
            // Input exhausted before the requested length: stop cleanly,
            // the caller pads the remainder with silence.
            None => break,
        };

        if width < LOW_WIDTH {
            // All-ones value widens by one, everything else is a delta
            // biased around zero.
            if raw == (1u32 << width) - 1 {
                width += 1;
                continue;
            }
            let delta = raw as i32 - ((1i32 << (width - 1)) - 1);
            acc = acc.wrapping_add(delta as i8);
        } else if width < 9 {
            let hi = 1u32 << (width - 1);
            if raw == hi {
                width += 1;
                continue;
            }
            if raw == hi + 1 {
                let new_w = bits.read(8).ok_or(FormatError::UnexpectedEof)?;
                if new_w == 0 || new_w > 9 {
                    return Err(FormatError::Corrupt("bad sample bit width"));
                }
                width = new_w;
                continue;
            }
            let delta = if raw < hi {
                raw as i32
            } else {
                raw as i32 - 2 * hi as i32
            };
            acc = acc.wrapping_add(delta as i8);
        } else {
            // Maximum width: low values are literal samples, the 0x100
            // range selects the next width.
            if raw < 0x100 {
                acc = raw as u8 as i8;
            } else {
                let new_w = (raw & 0xFF) + 1;
                if new_w > 9 {
                    return Err(FormatError::Corrupt("bad sample bit width"));
                }
                width = new_w;
                continue;
            }
        }

        let sample = if it215 {
            acc2 = acc2.wrapping_add(acc);
            acc2
        } else {
            acc
        };
        out.push(sample);
        produced += 1;
    }

    Ok(())
}

/// Decompress a 16-bit IT sample to `length` frames.
pub fn decompress_it_16bit(
    data: &[u8],
    length: usize,
    it215: bool,
) -> Result<Vec<i16>, FormatError> {
    let mut out: Vec<i16> = Vec::with_capacity(length);
    let mut pos = 0usize;

    while out.len() < length {
        if pos >= data.len() {
            break;
        }
        if pos + 2 > data.len() {
            return Err(FormatError::UnexpectedEof);
        }
        let block_len = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2;
        if pos + block_len > data.len() {
            return Err(FormatError::UnexpectedEof);
        }
        let block = &data[pos..pos + block_len];
        pos += block_len;

        let want = (length - out.len()).min(BLOCK_SAMPLES_16);
        decompress_block_16(block, want, it215, &mut out)?;
    }

    Ok(out)
}

fn decompress_block_16(
    block: &[u8],
    want: usize,
    it215: bool,
    out: &mut Vec<i16>,
) -> Result<(), FormatError> {
    let mut bits = BitReader::new(block);
    let mut width: u32 = 17;
    let mut acc: i16 = 0;
    let mut acc2: i16 = 0;
    let mut produced = 0usize;

    while produced < want {
        let raw = match bits.read(width) {
            Some(v) => v,
            None => break,
        };

        if width < LOW_WIDTH {
            if raw == (1u32 << width) - 1 {
                width += 1;
                continue;
            }
            let delta = raw as i32 - ((1i32 << (width - 1)) - 1);
            acc = acc.wrapping_add(delta as i16);
        } else if width < 17 {
            let hi = 1u32 << (width - 1);
            if raw == hi {
                width += 1;
                continue;
            }
            if raw == hi + 1 {
                let new_w = bits.read(8).ok_or(FormatError::UnexpectedEof)?;
                if new_w == 0 || new_w > 17 {
                    return Err(FormatError::Corrupt("bad sample bit width"));
                }
                width = new_w;
                continue;
            }
            let delta = if raw < hi {
                raw as i32
            } else {
                raw as i32 - 2 * hi as i32
            };
            acc = acc.wrapping_add(delta as i16);
        } else {
            if raw < 0x10000 {
                acc = raw as u16 as i16;
            } else {
                let new_w = (raw & 0xFF) + 1;
                if new_w > 17 {
                    return Err(FormatError::Corrupt("bad sample bit width"));
                }
                width = new_w;
                continue;
            }
        }

        let sample = if it215 {
            acc2 = acc2.wrapping_add(acc);
            acc2
        } else {
            acc
        };
        out.push(sample);
        produced += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// LSB-first bit writer mirroring the decoder's reader.
    struct BitWriter {
        bytes: Vec<u8>,
        bit: u32,
    }

    impl BitWriter {
        fn new() -> Self {
            Self { bytes: Vec::new(), bit: 0 }
        }

        fn write(&mut self, value: u32, n: u32) {
            for i in 0..n {
                if self.bit == 0 {
                    self.bytes.push(0);
                }
                let b = (value >> i) & 1;
                let last = self.bytes.len() - 1;
                self.bytes[last] |= (b as u8) << self.bit;
                self.bit = (self.bit + 1) % 8;
            }
        }

        /// Wrap the bitstream in a length-prefixed block.
        fn into_block(self) -> Vec<u8> {
            let mut out = (self.bytes.len() as u16).to_le_bytes().to_vec();
            out.extend(self.bytes);
            out
        }
    }

    #[test]
    fn literal_samples_at_max_width() {
        let mut w = BitWriter::new();
        w.write(10, 9);
        w.write(250, 9); // 250 as u8 = -6
        let data = w.into_block();
        let out = decompress_it_8bit(&data, 2, false).unwrap();
        assert_eq!(out, vec![10, -6]);
    }

    #[test]
    fn width_decrease_then_deltas() {
        // Start at max width 9: emit literal 10, then switch to width 4
        // (escape 0x100 | 3), then delta-code around it.
        let mut w = BitWriter::new();
        w.write(10, 9); // literal 10
        w.write(0x100 | 3, 9); // new width = 3 + 1 = 4
        w.write(3, 4); // delta = 3 - 7 = -4 -> 6
        w.write(7, 4); // delta = 7 - 7 = 0 -> 6
        let data = w.into_block();
        let out = decompress_it_8bit(&data, 3, false).unwrap();
        assert_eq!(out, vec![10, 6, 6]);
    }

    #[test]
    fn width_increase_via_all_ones() {
        let mut w = BitWriter::new();
        w.write(0x100 | 3, 9); // width := 4
        w.write(0xF, 4); // all ones: width := 5
        w.write(20, 5); // delta = 20 - 15 = +5 -> 5
        let data = w.into_block();
        let out = decompress_it_8bit(&data, 1, false).unwrap();
        assert_eq!(out, vec![5]);
    }

    #[test]
    fn mid_width_escapes() {
        let mut w = BitWriter::new();
        w.write(0x100 | 6, 9); // width := 7 (mid range)
        let hi = 1u32 << 6;
        w.write(5, 7); // delta +5 -> 5
        w.write(hi, 7); // width := 8
        w.write(0x30, 8); // delta +0x30 -> 53
        let data = w.into_block();
        let out = decompress_it_8bit(&data, 2, false).unwrap();
        assert_eq!(out, vec![5, 53]);
    }

    #[test]
    fn mid_width_explicit_width_reset() {
        let mut w = BitWriter::new();
        w.write(0x100 | 6, 9); // width := 7
        let hi = 1u32 << 6;
        w.write(hi + 1, 7); // explicit width follows
        w.write(9, 8); // width := 9 again
        w.write(77, 9); // literal
        let data = w.into_block();
        let out = decompress_it_8bit(&data, 1, false).unwrap();
        assert_eq!(out, vec![77]);
    }

    #[test]
    fn negative_mid_width_delta() {
        let mut w = BitWriter::new();
        w.write(0x100 | 6, 9); // width := 7
        let hi = 1i32 << 6;
        w.write(50, 7); // +50
        w.write((2 * hi - 3) as u32, 7); // delta = -3 -> 47
        let data = w.into_block();
        let out = decompress_it_8bit(&data, 2, false).unwrap();
        assert_eq!(out, vec![50, 47]);
    }

    #[test]
    fn it215_double_delta() {
        let mut w = BitWriter::new();
        w.write(1, 9); // acc = 1, acc2 = 1
        w.write(1, 9); // acc = 1, acc2 = 2
        w.write(2, 9); // acc = 2, acc2 = 4
        let data = w.into_block();
        let out = decompress_it_8bit(&data, 3, true).unwrap();
        assert_eq!(out, vec![1, 2, 4]);
    }

    #[test]
    fn sixteen_bit_literals_and_deltas() {
        let mut w = BitWriter::new();
        w.write(1000, 17); // literal 1000
        w.write(0x10000 | 7, 17); // width := 8 (mid range)
        w.write(5, 8); // +5 -> 1005
        w.write(0xFB, 8); // -5 -> 1000
        let data = w.into_block();
        let out = decompress_it_16bit(&data, 3, false).unwrap();
        assert_eq!(out, vec![1000, 1005, 1000]);
    }

    #[test]
    fn truncated_block_is_an_error() {
        let data = [0x10, 0x00, 0xAA]; // claims 16 bytes, has 1
        assert_eq!(
            decompress_it_8bit(&data, 4, false),
            Err(FormatError::UnexpectedEof)
        );
    }

    #[test]
    fn exhausted_bits_stop_cleanly() {
        // A valid block that simply runs out of bits: decoder returns
        // what it produced rather than erroring.
        let mut w = BitWriter::new();
        w.write(9, 9);
        let data = w.into_block();
        let out = decompress_it_8bit(&data, 1, false).unwrap();
        assert_eq!(out, vec![9]);
    }
}
