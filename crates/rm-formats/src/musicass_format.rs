//! Music Assembler decoder.
//!
//! Music Assembler songs ship as compiled 68k player code with the data
//! tables linked in at arbitrary offsets. Nothing sits at a fixed
//! location: the order, pattern and instrument tables are found by
//! scanning the code for the player's three pc-relative LEA instructions
//! and resolving their displacement operands. Detection is
//! all-or-nothing: the prologue, every scan, every derived offset and
//! every count must check out, or the file is not this format.

use rm_ir::{Cell, Effect, Instrument, LoopType, Note, Pattern, Sample, SampleData, Song, SourceFormat, VolumeCommand};

use crate::normalize;
use crate::scan::{BoundedScanner, ValidOffset};
use crate::FormatError;

const CHANNELS: u8 = 4;
const PATTERN_ROWS: u16 = 32;
const CELL_BYTES: usize = 3;
const PATTERN_BYTES: usize = PATTERN_ROWS as usize * CHANNELS as usize * CELL_BYTES;

/// BRA.W: the player code always opens with a branch over its data.
const PROLOGUE: [u8; 2] = [0x60, 0x00];
/// LEA d16(PC),A3 / A4 / A5: order, pattern and instrument table loads.
const LEA_ORDERS: [u8; 2] = [0x47, 0xFA];
const LEA_PATTERNS: [u8; 2] = [0x49, 0xFA];
const LEA_INSTRUMENTS: [u8; 2] = [0x4B, 0xFA];

/// Scan window for the LEA sequence: the player routine sits near the
/// front of the file.
const SCAN_LIMIT: usize = 2048;

struct Tables {
    orders: ValidOffset,
    order_count: usize,
    patterns: ValidOffset,
    pattern_count: usize,
    instruments: ValidOffset,
    instrument_count: usize,
}

pub fn detect(data: &[u8]) -> bool {
    resolve_tables(data).is_some()
}

/// Locate all three tables, or decide this is not the format. Every
/// failure path is a clean `None`.
fn resolve_tables(data: &[u8]) -> Option<Tables> {
    if data.len() < 64 || data[..2] != PROLOGUE {
        return None;
    }
    let s = BoundedScanner::new(data);

    let resolve = |lea: &[u8; 2], need: usize| -> Option<ValidOffset> {
        let at = s.find_seq(lea, 2, SCAN_LIMIT)?.get();
        // Displacement operand follows the opcode word; 68k pc-relative
        // addressing resolves against the operand's own address.
        s.rel_offset_be(at + 2, at + 2, need)
    };

    let orders = resolve(&LEA_ORDERS, 1)?;
    let order_count = s.u8_at(orders.get())? as usize;
    if !(1..=128).contains(&order_count) {
        return None;
    }
    let orders_body = s.offset(orders.get() + 1, order_count)?;

    let patterns = resolve(&LEA_PATTERNS, 1)?;
    let pattern_count = s.u8_at(patterns.get())? as usize;
    if !(1..=64).contains(&pattern_count) {
        return None;
    }
    // The whole pattern block must fit.
    s.offset(patterns.get() + 1, pattern_count * PATTERN_BYTES)?;

    let instruments = resolve(&LEA_INSTRUMENTS, 1)?;
    let instrument_count = s.u8_at(instruments.get())? as usize;
    if !(1..=31).contains(&instrument_count) {
        return None;
    }
    s.offset(instruments.get() + 1, instrument_count * 12)?;

    // Every order entry must name a stored pattern.
    for i in 0..order_count {
        if s.u8_at(orders_body.get() + i)? as usize >= pattern_count {
            return None;
        }
    }

    Some(Tables {
        orders: orders_body,
        order_count,
        patterns: s.offset(patterns.get() + 1, pattern_count * PATTERN_BYTES)?,
        pattern_count,
        instruments: s.offset(instruments.get() + 1, instrument_count * 12)?,
        instrument_count,
    })
}

pub fn load_musicass(data: &[u8]) -> Result<Song, FormatError> {
    let tables = resolve_tables(data).ok_or(FormatError::InvalidHeader)?;
    let s = BoundedScanner::new(data);

    let mut song = Song::with_channels("", SourceFormat::MusicAssembler, CHANNELS);
    song.initial_speed = 6;
    song.initial_tempo = 125;

    for i in 0..tables.order_count {
        if let Some(p) = s.u8_at(tables.orders.get() + i) {
            song.positions.push(p);
        }
    }

    for idx in 0..tables.pattern_count {
        let start = tables.patterns.get() + idx * PATTERN_BYTES;
        song.patterns.push(parse_pattern(data, start));
    }

    for idx in 0..tables.instrument_count {
        let base = tables.instruments.get() + idx * 12;
        match parse_instrument(&s, data, base, idx) {
            Some(inst) => song.instruments.push(inst),
            None => {
                log::warn!("Music Assembler instrument {} unresolvable, substituting silence", idx);
                song.instruments
                    .push(normalize::placeholder_instrument(&format!("Instrument {}", idx + 1)));
            }
        }
    }

    Ok(song)
}

/// 3-byte cells, channel-major rows: note, instrument, effect nibble +
/// parameter nibble packed into the third byte.
fn parse_pattern(data: &[u8], start: usize) -> Pattern {
    let mut pattern = Pattern::new(PATTERN_ROWS, CHANNELS);
    for row in 0..PATTERN_ROWS {
        for ch in 0..CHANNELS {
            let at = start + (row as usize * CHANNELS as usize + ch as usize) * CELL_BYTES;
            let note = data[at];
            let inst = data[at + 1];
            let fx = data[at + 2];

            *pattern.cell_mut(row, ch) = Cell {
                note: match note {
                    0 => Note::None,
                    0xFF => Note::Off,
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
        1 => Effect::PortaUp(param),
        2 => Effect::PortaDown(param),
        3 => Effect::SetVolume(param * 4),
        4 => Effect::SetSpeed(param),
        5 => Effect::Arpeggio { x: param, y: 0 },
        6 => Effect::VolumeSlide(-(param as i8)),
        7 => Effect::VolumeSlide(param as i8),
        other => {
            log::warn!("Music Assembler effect {:X}{:X} outside the known set", other, param);
            Effect::None
        }
    }
}

/// 12-byte instrument record: pc-relative PCM displacement, geometry in
/// words, volume.
fn parse_instrument(
    s: &BoundedScanner,
    data: &[u8],
    base: usize,
    index: usize,
) -> Option<Instrument> {
    let frames = s.u16_be_at(base + 2)? as usize * 2;
    let loop_start = s.u16_be_at(base + 4)? as u32 * 2;
    let loop_len = s.u16_be_at(base + 6)? as u32 * 2;
    let volume = s.u8_at(base + 8)?.min(64);

    let pcm = s.rel_offset_be(base, base, frames)?;
    let raw = &data[pcm.get()..pcm.get() + frames];

    let name = format!("Instrument {}", index + 1);
    let mut sample = Sample::new(&name);
    sample.data = SampleData::Mono8(normalize::signed8(raw));
    sample.default_volume = volume;
    sample.c4_speed = 8363;
    if loop_len > 2 {
        sample.loop_start = loop_start;
        sample.loop_end = loop_start + loop_len;
        sample.loop_type = LoopType::Forward;
    }
    sample.sanitize_loop();
    Some(Instrument::sampled(&name, sample))
}
