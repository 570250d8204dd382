//! Cinemaware game-score decoder.
//!
//! Cinemaware titles embed their scores with a tiny fixed prologue, no
//! real magic number. Detection needs the prologue fields, a secondary
//! "SNG!" marker somewhere inside the declared header window, and
//! range-sane counts; patterns are flat 3-byte-cell grids after the
//! header.

use rm_ir::{Cell, Effect, Instrument, LoopType, Note, Pattern, Sample, SampleData, Song, SourceFormat, VolumeCommand};

use crate::normalize;
use crate::reader::ByteReader;
use crate::FormatError;

const CHANNELS: u8 = 4;
const PATTERN_ROWS: u16 = 32;
const CELL_BYTES: usize = 3;
const PATTERN_BYTES: usize = PATTERN_ROWS as usize * CHANNELS as usize * CELL_BYTES;
const MARKER: &[u8] = b"SNG!";

struct Header {
    header_size: usize,
    patterns: usize,
    instruments: usize,
    speed: u8,
}

fn parse_header(data: &[u8]) -> Option<Header> {
    if data.len() < 16 {
        return None;
    }
    // Prologue: zero byte, header size, voice count fixed at 4.
    if data[0] != 0 {
        return None;
    }
    let header_size = data[1] as usize;
    if !(16..=64).contains(&header_size) || header_size > data.len() {
        return None;
    }
    if data[4] != 4 {
        return None;
    }
    let patterns = data[5] as usize;
    let instruments = data[6] as usize;
    let speed = data[7];
    if !(1..=64).contains(&patterns) || !(1..=31).contains(&instruments) || !(1..=15).contains(&speed)
    {
        return None;
    }
    // Secondary marker must sit inside the declared header window.
    if !data[8..header_size].windows(MARKER.len()).any(|w| w == MARKER) {
        return None;
    }
    Some(Header {
        header_size,
        patterns,
        instruments,
        speed,
    })
}

pub fn detect(data: &[u8]) -> bool {
    parse_header(data).is_some()
}

pub fn load_cinemaware(data: &[u8]) -> Result<Song, FormatError> {
    let header = parse_header(data).ok_or(FormatError::InvalidHeader)?;

    let mut song = Song::with_channels("", SourceFormat::Cinemaware, CHANNELS);
    song.initial_speed = header.speed;
    song.initial_tempo = 125;

    let mut r = ByteReader::new(data);
    r.seek(header.header_size)?;

    let position_count = r.read_u8()? as usize;
    if position_count == 0 || position_count > 128 {
        return Err(FormatError::Corrupt("position count out of range"));
    }
    song.positions = r.read_bytes(position_count)?.to_vec();

    for idx in 0..header.patterns {
        match r.read_bytes(PATTERN_BYTES) {
            Ok(grid) => song.patterns.push(parse_pattern(grid)),
            Err(e) => {
                log::warn!("Cinemaware pattern {} failed ({}), substituting empty", idx, e);
                song.patterns.push(Pattern::new(PATTERN_ROWS, CHANNELS));
            }
        }
    }

    let mut headers = Vec::with_capacity(header.instruments);
    for _ in 0..header.instruments {
        let words = r.read_u16_be()? as usize;
        let loop_start = r.read_u16_be()? as u32;
        let loop_words = r.read_u16_be()? as u32;
        let volume = r.read_u8()?.min(64);
        r.skip(1)?;
        headers.push((words * 2, loop_start * 2, loop_words * 2, volume));
    }
    for (idx, (frames, loop_start, loop_len, volume)) in headers.into_iter().enumerate() {
        let name = format!("Instrument {}", idx + 1);
        let pcm = r.read_bytes(frames.min(r.remaining()))?;
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

    let pat_count = song.patterns.len() as u8;
    song.positions.retain(|&p| p < pat_count);

    Ok(song)
}

fn parse_pattern(grid: &[u8]) -> Pattern {
    let mut pattern = Pattern::new(PATTERN_ROWS, CHANNELS);
    for row in 0..PATTERN_ROWS {
        for ch in 0..CHANNELS {
            let at = (row as usize * CHANNELS as usize + ch as usize) * CELL_BYTES;
            let note = grid[at];
            let inst = grid[at + 1];
            let fx = grid[at + 2];

            *pattern.cell_mut(row, ch) = Cell {
                note: match note {
                    0 => Note::None,
                    0xFE => Note::Off,
                    n if n <= rm_ir::NOTE_MAX => Note::On(n),
                    _ => Note::None,
                },
                instrument: inst & 0x1F,
                volume: VolumeCommand::None,
                effect: cell_effect(fx),
                effect2: Effect::None,
            };
        }
    }
    pattern
}

fn cell_effect(fx: u8) -> Effect {
    let param = fx & 0x0F;
    match fx >> 4 {
        0 => Effect::None,
        1 => Effect::SetVolume(param * 4),
        2 => Effect::VolumeSlide(-(param as i8)),
        3 => Effect::VolumeSlide(param as i8),
        4 => Effect::PortaUp(param),
        5 => Effect::PortaDown(param),
        6 => Effect::SetSpeed(param),
        _ => Effect::None,
    }
}
