//! PCM normalization helpers.
//!
//! Decoders hand raw sample bytes through these to get the canonical
//! signed 8/16-bit buffers, and use the placeholder constructors for
//! missing or corrupt slots so one bad sample never fails a decode.

use rm_ir::{Instrument, Sample, SampleData};

/// Signed 8-bit PCM, as stored.
pub fn signed8(raw: &[u8]) -> Vec<i8> {
    raw.iter().map(|&b| b as i8).collect()
}

/// Unsigned 8-bit PCM: flip the top bit.
pub fn unsigned8(raw: &[u8]) -> Vec<i8> {
    raw.iter().map(|&b| (b ^ 0x80) as i8).collect()
}

/// Signed little-endian 16-bit PCM. A trailing odd byte is dropped.
pub fn signed16_le(raw: &[u8]) -> Vec<i16> {
    raw.chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Unsigned little-endian 16-bit PCM, re-centered around zero.
pub fn unsigned16_le(raw: &[u8]) -> Vec<i16> {
    raw.chunks_exact(2)
        .map(|c| (u16::from_le_bytes([c[0], c[1]]) as i32 - 32768) as i16)
        .collect()
}

/// Signed big-endian 16-bit PCM.
pub fn signed16_be(raw: &[u8]) -> Vec<i16> {
    raw.chunks_exact(2)
        .map(|c| i16::from_be_bytes([c[0], c[1]]))
        .collect()
}

/// Unsigned big-endian 16-bit PCM, re-centered around zero.
pub fn unsigned16_be(raw: &[u8]) -> Vec<i16> {
    raw.chunks_exact(2)
        .map(|c| (u16::from_be_bytes([c[0], c[1]]) as i32 - 32768) as i16)
        .collect()
}

/// XM-style delta-coded 8-bit PCM: each byte is a signed delta from the
/// previous sample.
pub fn delta8(raw: &[u8]) -> Vec<i8> {
    let mut acc = 0i8;
    raw.iter()
        .map(|&b| {
            acc = acc.wrapping_add(b as i8);
            acc
        })
        .collect()
}

/// XM-style delta-coded little-endian 16-bit PCM.
pub fn delta16_le(raw: &[u8]) -> Vec<i16> {
    let mut acc = 0i16;
    raw.chunks_exact(2)
        .map(|c| {
            acc = acc.wrapping_add(i16::from_le_bytes([c[0], c[1]]));
            acc
        })
        .collect()
}

/// A silent zero-length placeholder sample for a missing/corrupt slot.
pub fn placeholder_sample(name: &str) -> Sample {
    let mut s = Sample::new(name);
    s.data = SampleData::Mono8(Vec::new());
    s.default_volume = 0;
    s
}

/// A silent placeholder instrument for a missing/corrupt slot.
pub fn placeholder_instrument(name: &str) -> Instrument {
    let mut inst = Instrument::placeholder(name);
    if let rm_ir::InstrumentKind::Sampled { samples, .. } = &mut inst.kind {
        samples[0].default_volume = 0;
    }
    inst
}
