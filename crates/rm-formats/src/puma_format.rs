//! PumaTracker decoder.
//!
//! Puma modules carry no magic tag; detection leans on a battery of
//! structural checks over the header and position table. Pattern data is
//! run-length grouped: each group is (note, instrument+effect,
//! parameter, run length) and paints `run length` consecutive rows of
//! one channel. A run that would overflow the 32-row pattern is a
//! format violation and costs that pattern, never its neighbours.

use rm_ir::{Cell, Effect, Instrument, LoopType, Note, Pattern, Sample, SampleData, Song, SourceFormat, VolumeCommand};

use crate::normalize;
use crate::reader::ByteReader;
use crate::FormatError;

const CHANNELS: u8 = 4;
const PATTERN_ROWS: u16 = 32;
const HEADER_LEN: usize = 8;
const NOTE_OFF_RAW: u8 = 0xFF;

pub fn detect(data: &[u8]) -> bool {
    parse_header(data).is_some()
}

struct Header {
    positions: usize,
    patterns: usize,
    instruments: usize,
    speed: u8,
}

/// All-or-nothing header validation; any failed check means "not this
/// format".
fn parse_header(data: &[u8]) -> Option<Header> {
    if data.len() < HEADER_LEN {
        return None;
    }
    let positions = u16::from_be_bytes([data[0], data[1]]) as usize;
    let patterns = u16::from_be_bytes([data[2], data[3]]) as usize;
    let instruments = u16::from_be_bytes([data[4], data[5]]) as usize;
    let speed = data[6];
    let reserved = data[7];

    if !(1..=128).contains(&positions)
        || !(1..=64).contains(&patterns)
        || !(1..=31).contains(&instruments)
        || !(1..=15).contains(&speed)
        || reserved != 0
    {
        return None;
    }
    let table = data.get(HEADER_LEN..HEADER_LEN + positions)?;
    if table.iter().any(|&p| p as usize >= patterns) {
        return None;
    }
    // The first pattern block must open with a plausible group count.
    let first = HEADER_LEN + positions;
    let count = u16::from_be_bytes([*data.get(first)?, *data.get(first + 1)?]);
    if count == 0 || count > 128 {
        return None;
    }

    Some(Header {
        positions,
        patterns,
        instruments,
        speed,
    })
}

pub fn load_puma(data: &[u8]) -> Result<Song, FormatError> {
    let header = parse_header(data).ok_or(FormatError::InvalidHeader)?;

    let mut song = Song::with_channels("", SourceFormat::PumaTracker, CHANNELS);
    song.initial_speed = header.speed;
    song.initial_tempo = 125;

    let mut r = ByteReader::new(data);
    r.skip(HEADER_LEN)?;
    song.positions = r.read_bytes(header.positions)?.to_vec();

    for idx in 0..header.patterns {
        match parse_pattern(&mut r) {
            Ok(p) => song.patterns.push(p),
            Err(e @ FormatError::Corrupt(_)) => {
                // The violating pattern was consumed in full, so the
                // stream cursor is still aligned for its neighbours.
                log::warn!("Puma pattern {} failed ({}), substituting empty", idx, e);
                song.patterns.push(Pattern::new(PATTERN_ROWS, CHANNELS));
            }
            Err(e) => {
                log::warn!("Puma pattern stream broken at {} ({})", idx, e);
                while song.patterns.len() < header.patterns {
                    song.patterns.push(Pattern::new(PATTERN_ROWS, CHANNELS));
                }
                break;
            }
        }
    }

    let mut headers = Vec::with_capacity(header.instruments);
    for _ in 0..header.instruments {
        headers.push(parse_instrument_header(&mut r)?);
    }
    for (name, frames, loop_start, loop_len, volume) in headers {
        let avail = frames.min(r.remaining());
        let pcm = r.read_bytes(avail)?;
        let mut sample = Sample::new(&name);
        sample.data = SampleData::Mono8(normalize::signed8(pcm));
        sample.default_volume = volume;
        sample.c4_speed = 8363;
        if loop_len > 2 {
            sample.loop_start = loop_start;
            sample.loop_end = loop_start + loop_len;
            sample.loop_type = LoopType::Forward;
        }
        sample.sanitize_loop();
        song.instruments.push(Instrument::sampled(&name, sample));
    }

    Ok(song)
}

/// One pattern: four sequential channel streams of run-length groups.
///
/// A run-length violation rejects the pattern with `Corrupt` but keeps
/// consuming its remaining groups, so the caller can substitute an empty
/// pattern and carry on with an aligned cursor. Only a group count
/// outside any plausible range is unrecoverable.
fn parse_pattern(r: &mut ByteReader) -> Result<Pattern, FormatError> {
    let mut pattern = Pattern::new(PATTERN_ROWS, CHANNELS);
    let mut violation: Option<&'static str> = None;

    for channel in 0..CHANNELS {
        let group_count = r.read_u16_be()?;
        if group_count == 0 || group_count > 128 {
            return Err(FormatError::InvalidHeader);
        }

        let mut row = 0u16;
        for _ in 0..group_count {
            let note_raw = r.read_u8()?;
            let packed = r.read_u8()?;
            let param = r.read_u8()?;
            let run = r.read_u8()? as u16;
            if violation.is_some() {
                continue;
            }

            if run == 0 || row + run > PATTERN_ROWS {
                violation = Some("run length overflows pattern");
                continue;
            }

            let cell = Cell {
                note: puma_note(note_raw),
                instrument: packed & 0x1F,
                volume: VolumeCommand::None,
                effect: puma_effect(packed >> 5, param),
                effect2: Effect::None,
            };

            // The triggering cell lands on the first row of the run; the
            // remaining rows hold the note without retriggering.
            *pattern.cell_mut(row, channel) = cell;
            let mut hold = cell;
            hold.note = Note::None;
            hold.instrument = 0;
            for held_row in row + 1..row + run {
                *pattern.cell_mut(held_row, channel) = hold;
            }
            row += run;
        }
        if violation.is_none() && row != PATTERN_ROWS {
            violation = Some("runs do not cover the pattern");
        }
    }

    match violation {
        Some(msg) => Err(FormatError::Corrupt(msg)),
        None => Ok(pattern),
    }
}

fn puma_note(raw: u8) -> Note {
    match raw {
        0 => Note::None,
        NOTE_OFF_RAW => Note::Off,
        n if n <= rm_ir::NOTE_MAX => Note::On(n),
        _ => Note::None,
    }
}

/// Three-bit effect column.
fn puma_effect(code: u8, param: u8) -> Effect {
    match code {
        0 => Effect::None,
        1 => Effect::PortaUp(param),
        2 => Effect::PortaDown(param),
        3 => Effect::SetVolume(param.min(64)),
        4 => Effect::SetSpeed(param & 0x1F),
        5 => Effect::Vibrato {
            speed: param >> 4,
            depth: param & 0x0F,
        },
        6 => Effect::PositionJump(param),
        _ => Effect::PatternBreak(0),
    }
}

/// 16-byte instrument header: name, geometry in words, volume.
fn parse_instrument_header(
    r: &mut ByteReader,
) -> Result<(String, usize, u32, u32, u8), FormatError> {
    let name = r.read_string(8)?;
    let words = r.read_u16_be()? as usize;
    let loop_start = r.read_u16_be()? as u32;
    let loop_words = r.read_u16_be()? as u32;
    let volume = r.read_u8()?.min(64);
    r.skip(1)?;
    Ok((name, words * 2, loop_start * 2, loop_words * 2, volume))
}
