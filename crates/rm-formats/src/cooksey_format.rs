//! Mark Cooksey game-score decoder.
//!
//! Cooksey scores open with a three-entry offset table (positions,
//! patterns, instruments) instead of a magic tag. Detection demands the
//! offsets be ascending and in range, the reserved pad zero and every
//! count within its documented maximum; any miss means "not this
//! format".

use rm_ir::{Cell, Effect, Instrument, LoopType, Note, Pattern, Sample, SampleData, Song, SourceFormat, VolumeCommand};

use crate::normalize;
use crate::reader::ByteReader;
use crate::FormatError;

const CHANNELS: u8 = 4;
const PATTERN_ROWS: u16 = 32;
/// Per-channel stream of (note, instrument/effect) pairs.
const PATTERN_BYTES: usize = PATTERN_ROWS as usize * CHANNELS as usize * 2;
const HEADER_LEN: usize = 12;

struct Header {
    positions_at: usize,
    patterns_at: usize,
    instruments_at: usize,
    patterns: usize,
    instruments: usize,
    speed: u8,
}

fn parse_header(data: &[u8]) -> Option<Header> {
    if data.len() < HEADER_LEN + 2 {
        return None;
    }
    let off = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]) as usize;
    let positions_at = off(0);
    let patterns_at = off(2);
    let instruments_at = off(4);

    // Table sanity: ascending, past the header, inside the buffer.
    if positions_at < HEADER_LEN
        || patterns_at <= positions_at
        || instruments_at <= patterns_at
        || instruments_at >= data.len()
    {
        return None;
    }

    let patterns = data[6] as usize;
    let instruments = data[7] as usize;
    let speed = data[8];
    if !(1..=64).contains(&patterns) || !(1..=15).contains(&instruments) || !(1..=15).contains(&speed)
    {
        return None;
    }
    if data[9..12] != [0, 0, 0] {
        return None;
    }
    // The declared pattern block must fit between its offset and the
    // instrument table.
    if patterns_at + patterns * PATTERN_BYTES > instruments_at {
        return None;
    }

    Some(Header {
        positions_at,
        patterns_at,
        instruments_at,
        patterns,
        instruments,
        speed,
    })
}

pub fn detect(data: &[u8]) -> bool {
    parse_header(data).is_some()
}

pub fn load_cooksey(data: &[u8]) -> Result<Song, FormatError> {
    let header = parse_header(data).ok_or(FormatError::InvalidHeader)?;

    let mut song = Song::with_channels("", SourceFormat::MarkCooksey, CHANNELS);
    song.initial_speed = header.speed;
    song.initial_tempo = 125;

    // Position list: bytes until 0xFF or the pattern table.
    let mut r = ByteReader::new(data);
    r.seek(header.positions_at)?;
    while r.pos() < header.patterns_at {
        let p = r.read_u8()?;
        if p == 0xFF {
            break;
        }
        song.positions.push(p);
    }

    for idx in 0..header.patterns {
        let start = header.patterns_at + idx * PATTERN_BYTES;
        // Bounds proven in parse_header
        song.patterns.push(parse_pattern(&data[start..start + PATTERN_BYTES]));
    }

    let mut r = ByteReader::new(data);
    r.seek(header.instruments_at)?;
    let mut headers = Vec::with_capacity(header.instruments);
    for _ in 0..header.instruments {
        let words = r.read_u16_be()? as usize;
        let loop_words = r.read_u16_be()? as u32;
        let volume = r.read_u8()?.min(64);
        r.skip(3)?;
        headers.push((words * 2, loop_words * 2, volume));
    }
    for (idx, (frames, loop_len, volume)) in headers.into_iter().enumerate() {
        let name = format!("Instrument {}", idx + 1);
        let pcm = r.read_bytes(frames.min(r.remaining()))?;
        let mut sample = Sample::new(&name);
        sample.data = SampleData::Mono8(normalize::signed8(pcm));
        sample.default_volume = volume;
        sample.c4_speed = 8363;
        if loop_len > 2 {
            sample.loop_start = 0;
            sample.loop_end = loop_len;
            sample.loop_type = LoopType::Forward;
        }
        sample.sanitize_loop();
        song.instruments.push(Instrument::sampled(&name, sample));
    }

    let pat_count = song.patterns.len() as u8;
    song.positions.retain(|&p| p < pat_count);

    Ok(song)
}

/// Channel-sequential (note, info) pairs; the info byte packs the
/// instrument in its low nibble and a coarse effect in the high one.
fn parse_pattern(grid: &[u8]) -> Pattern {
    let mut pattern = Pattern::new(PATTERN_ROWS, CHANNELS);
    for ch in 0..CHANNELS {
        let base = ch as usize * PATTERN_ROWS as usize * 2;
        for row in 0..PATTERN_ROWS {
            let at = base + row as usize * 2;
            let note = grid[at];
            let info = grid[at + 1];

            *pattern.cell_mut(row, ch) = Cell {
                note: match note {
                    0 => Note::None,
                    0xFE => Note::Off,
                    n if n <= rm_ir::NOTE_MAX => Note::On(n),
                    _ => Note::None,
                },
                instrument: info & 0x0F,
                volume: VolumeCommand::None,
                effect: match info >> 4 {
                    0 => Effect::None,
                    1 => Effect::PortaUp(1),
                    2 => Effect::PortaDown(1),
                    3 => Effect::VolumeSlide(-1),
                    _ => Effect::None,
                },
                effect2: Effect::None,
            };
        }
    }
    pattern
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn build_test_cooksey() -> Vec<u8> {
        let positions_at = HEADER_LEN;
        let patterns_at = positions_at + 3; // 2 entries + terminator
        let instruments_at = patterns_at + PATTERN_BYTES * 2;

        let mut d = vec![0u8; HEADER_LEN];
        d[0..2].copy_from_slice(&(positions_at as u16).to_be_bytes());
        d[2..4].copy_from_slice(&(patterns_at as u16).to_be_bytes());
        d[4..6].copy_from_slice(&(instruments_at as u16).to_be_bytes());
        d[6] = 2; // patterns
        d[7] = 1; // instruments
        d[8] = 4; // speed

        d.extend_from_slice(&[0, 1, 0xFF]); // positions

        let mut grid = vec![0u8; PATTERN_BYTES];
        grid[0] = 25; // ch 0 row 0 note
        grid[1] = 0x11; // effect 1, instrument 1
        d.extend_from_slice(&grid);
        d.extend_from_slice(&vec![0u8; PATTERN_BYTES]);

        d.extend_from_slice(&1u16.to_be_bytes()); // 2 frames
        d.extend_from_slice(&0u16.to_be_bytes());
        d.push(32);
        d.extend_from_slice(&[0, 0, 0]);
        d.extend_from_slice(&[0x7F, 0x80]);
        d
    }

    #[test]
    fn detect_requires_table_sanity() {
        assert!(detect(&build_test_cooksey()));
        assert!(!detect(&vec![0u8; 512]));

        let mut descending = build_test_cooksey();
        descending[2..4].copy_from_slice(&4u16.to_be_bytes());
        assert!(!detect(&descending));

        let mut bad_pad = build_test_cooksey();
        bad_pad[10] = 1;
        assert!(!detect(&bad_pad));
    }

    #[test]
    fn decodes_pairs() {
        let song = load_cooksey(&build_test_cooksey()).unwrap();
        song.check_invariants().unwrap();
        assert_eq!(song.positions, vec![0, 1]);
        let c = song.patterns[0].cell(0, 0);
        assert_eq!(c.note, Note::On(25));
        assert_eq!(c.instrument, 1);
        assert_eq!(c.effect, Effect::PortaUp(1));

        let s = song.instruments[0].first_sample().unwrap();
        assert_eq!(s.data, SampleData::Mono8(vec![127, -128]));
    }

    #[test]
    fn truncated_file_does_not_panic() {
        let data = build_test_cooksey();
        for cut in [2, 11, 20, 200, data.len() - 1] {
            let _ = load_cooksey(&data[..cut]);
        }
    }
}
