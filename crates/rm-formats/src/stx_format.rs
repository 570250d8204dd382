//! ST Music Interface Kit STX decoder.
//!
//! STX sits between STM and S3M: an S3M-style header with SCRM at 0x3C
//! plus a converter tag at offset 20, S3M instrument headers and row
//! packing, but fixed 4-channel 64-row patterns and 5-byte order
//! entries. Early converter output omits the per-pattern length prefix;
//! the header's pattern-size field tells the two layouts apart.

use rm_ir::{Cell, Note, Pattern, Song, SourceFormat, VolumeCommand};

use crate::effect::parse_s3m;
use crate::normalize;
use crate::reader::{magic_at, ByteReader};
use crate::s3m_format;
use crate::FormatError;

const CHANNELS: u8 = 4;
const TAGS: [&[u8; 8]; 3] = [b"!Scream!", b"BMOD2STM", b"WUZAMOD!"];

pub fn detect(data: &[u8]) -> bool {
    if !magic_at(data, 0x3C, b"SCRM") || data.len() < 0x40 {
        return false;
    }
    TAGS.iter().any(|t| &data[20..28] == *t)
}

pub fn load_stx(data: &[u8]) -> Result<Song, FormatError> {
    if !detect(data) {
        return Err(FormatError::InvalidHeader);
    }

    let mut r = ByteReader::new(data);
    let title = r.read_string(20)?;
    r.skip(8)?; // converter tag
    let pat_size = r.read_u16_le()?;
    r.skip(2)?;
    let pp_pat = r.read_u16_le()? as usize * 16;
    let pp_ins = r.read_u16_le()? as usize * 16;
    let pp_ord = r.read_u16_le()? as usize * 16;
    r.skip(4)?;
    let _global_vol = r.read_u8()?;
    let tempo = r.read_u8()?;
    r.skip(4)?;
    let pat_num = r.read_u16_le()? as usize;
    let ins_num = r.read_u16_le()? as usize;
    let ord_num = r.read_u16_le()? as usize;

    if pat_num > 64 || ins_num > 31 || ord_num > 256 {
        return Err(FormatError::Corrupt("header counts out of range"));
    }

    let mut song = Song::with_channels(&title, SourceFormat::Stx, CHANNELS);
    // Tempo byte packs speed in the high nibble, STM-style.
    song.initial_speed = if tempo >> 4 == 0 { 6 } else { tempo >> 4 };
    song.initial_tempo = 125;

    // Orders: 5-byte entries, pattern index in the first byte.
    let mut o = ByteReader::new(data);
    o.seek(pp_ord)?;
    for _ in 0..ord_num {
        let pat = o.read_u8()?;
        o.skip(4)?;
        if pat < 99 {
            song.positions.push(pat);
        }
    }

    let mut i = ByteReader::new(data);
    i.seek(pp_ins)?;
    for idx in 0..ins_num {
        let para = i.read_u16_le()? as usize * 16;
        match s3m_format::parse_instrument(data, para, false) {
            Ok(inst) => song.instruments.push(inst),
            Err(e) => {
                log::warn!("STX instrument {} failed ({}), substituting silence", idx, e);
                song.instruments
                    .push(normalize::placeholder_instrument(&format!("Instrument {}", idx + 1)));
            }
        }
    }

    // The early converter wrote patterns without the leading packed
    // length; its header pattern-size field is 0x1A in that case.
    let length_prefixed = pat_size != 0x1A;

    let mut p = ByteReader::new(data);
    p.seek(pp_pat)?;
    for idx in 0..pat_num {
        let para = p.read_u16_le()? as usize * 16;
        match parse_pattern(data, para, length_prefixed) {
            Ok(pat) => song.patterns.push(pat),
            Err(e) => {
                log::warn!("STX pattern {} failed ({}), substituting empty", idx, e);
                song.patterns.push(Pattern::new(64, CHANNELS));
            }
        }
    }

    let pat_count = song.patterns.len() as u8;
    song.positions.retain(|&pos| pos < pat_count);

    Ok(song)
}

fn parse_pattern(data: &[u8], offset: usize, length_prefixed: bool) -> Result<Pattern, FormatError> {
    let mut pattern = Pattern::new(64, CHANNELS);
    if offset == 0 {
        return Ok(pattern);
    }

    let mut r = ByteReader::new(data);
    r.seek(offset)?;
    if length_prefixed {
        r.skip(2)?;
    }

    let mut row = 0u16;
    while row < 64 {
        if r.remaining() == 0 {
            break;
        }
        let what = r.read_u8()?;
        if what == 0 {
            row += 1;
            continue;
        }

        let channel = what & 0x1F;
        let mut cell = Cell::empty();
        if what & 0x20 != 0 {
            cell.note = s3m_format::s3m_note(r.read_u8()?);
            cell.instrument = r.read_u8()?;
        }
        if what & 0x40 != 0 {
            let vol = r.read_u8()?;
            if vol <= 64 {
                cell.volume = VolumeCommand::Volume(vol);
            }
        }
        if what & 0x80 != 0 {
            let cmd = r.read_u8()?;
            let info = r.read_u8()?;
            cell.effect = parse_s3m(cmd, info);
        }

        if channel < CHANNELS {
            *pattern.cell_mut(row, channel) = cell;
        }
    }

    Ok(pattern)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rm_ir::Effect;

    pub(crate) fn build_test_stx() -> Vec<u8> {
        let mut d = vec![0u8; 0x40];
        d[..4].copy_from_slice(b"chip");
        d[20..28].copy_from_slice(b"!Scream!");
        d[28..30].copy_from_slice(&0x1Au16.to_le_bytes()); // no length prefix
        d[32..34].copy_from_slice(&5u16.to_le_bytes()); // pp_pat -> 80
        d[34..36].copy_from_slice(&6u16.to_le_bytes()); // pp_ins -> 96
        d[36..38].copy_from_slice(&7u16.to_le_bytes()); // pp_ord -> 112
        d[43] = 0x60; // tempo: speed 6
        d[48..50].copy_from_slice(&1u16.to_le_bytes()); // patterns
        d[50..52].copy_from_slice(&1u16.to_le_bytes()); // instruments
        d[52..54].copy_from_slice(&1u16.to_le_bytes()); // orders
        d[0x3C..0x40].copy_from_slice(b"SCRM");

        d.resize(80, 0);
        d.extend_from_slice(&8u16.to_le_bytes()); // pattern parapointer -> 128
        d.resize(96, 0);
        d.extend_from_slice(&10u16.to_le_bytes()); // instrument parapointer -> 160
        d.resize(112, 0);
        d.extend_from_slice(&[0, 0, 0, 0, 0]); // order 0

        // Pattern at 128, no length prefix
        d.resize(128, 0);
        d.push(0x20 | 0x80); // channel 0, note+effect
        d.push((3 << 4) | 2); // D, octave 3
        d.push(1);
        d.push(1); // A = set speed
        d.push(4);
        d.push(0); // end row 0

        // Instrument at 160: PCM header with no stored sample data
        d.resize(160, 0);
        let mut inst = vec![0u8; 80];
        inst[0] = 1;
        inst[16..20].copy_from_slice(&0u32.to_le_bytes());
        inst[28] = 64;
        inst[32..36].copy_from_slice(&8363u32.to_le_bytes());
        inst[48..53].copy_from_slice(b"strng");
        d.extend_from_slice(&inst);
        d
    }

    #[test]
    fn detect_needs_both_markers() {
        assert!(detect(&build_test_stx()));
        let mut no_tag = build_test_stx();
        no_tag[20..28].copy_from_slice(b"XXXXXXXX");
        assert!(!detect(&no_tag));
        assert!(!detect(&vec![0u8; 256]));
    }

    #[test]
    fn decodes_unprefixed_pattern() {
        let song = load_stx(&build_test_stx()).unwrap();
        song.check_invariants().unwrap();
        assert_eq!(song.title.as_str(), "chip");
        assert_eq!(song.num_channels, 4);
        assert_eq!(song.initial_speed, 6);
        assert_eq!(song.positions, vec![0]);

        let c = song.patterns[0].cell(0, 0);
        assert_eq!(c.note, Note::On(3 * 12 + 2 + 1));
        assert_eq!(c.instrument, 1);
        assert_eq!(c.effect, Effect::SetSpeed(4));
    }

    #[test]
    fn decodes_instrument_name() {
        let song = load_stx(&build_test_stx()).unwrap();
        assert_eq!(song.instruments[0].name.as_str(), "strng");
    }

    #[test]
    fn truncated_file_does_not_panic() {
        let data = build_test_stx();
        for cut in [8, 0x30, 0x40, 90, 130] {
            let _ = load_stx(&data[..cut]);
        }
    }
}
