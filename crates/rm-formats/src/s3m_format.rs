//! Scream Tracker 3 S3M decoder.
//!
//! S3M addresses its instrument and pattern blocks through parapointers,
//! 16-byte-paragraph offsets from the start of the file. Patterns use a
//! channel-mask row packing shared (in spirit) with IT.

use rm_ir::{Cell, Effect, Instrument, LoopType, Note, Pattern, Sample, SampleData, Song, SourceFormat, VolumeCommand};

use crate::effect::parse_s3m;
use crate::normalize;
use crate::reader::{magic_at, ByteReader};
use crate::FormatError;

const MAGIC_OFFSET: usize = 0x2C;
const ORDER_END: u8 = 255;
const ORDER_MARKER: u8 = 254;

pub fn detect(data: &[u8]) -> bool {
    magic_at(data, MAGIC_OFFSET, b"SCRM")
}

pub fn load_s3m(data: &[u8]) -> Result<Song, FormatError> {
    if !detect(data) {
        return Err(FormatError::InvalidHeader);
    }

    let mut r = ByteReader::new(data);
    let title = r.read_string(28)?;
    r.skip(4)?; // 0x1A, type, reserved
    let order_count = r.read_u16_le()? as usize;
    let inst_count = r.read_u16_le()? as usize;
    let pat_count = r.read_u16_le()? as usize;
    let _flags = r.read_u16_le()?;
    let _tracker_version = r.read_u16_le()?;
    let sample_format = r.read_u16_le()?; // 1 = signed, 2 = unsigned
    r.skip(4)?; // "SCRM"
    let _global_volume = r.read_u8()?;
    let speed = r.read_u8()?;
    let tempo = r.read_u8()?;
    let _master_volume = r.read_u8()?;
    r.skip(1)?; // ultraclick removal
    let default_pan_flag = r.read_u8()?;
    r.skip(10)?; // reserved + special pointer

    if order_count > 256 || inst_count > 99 || pat_count > 256 {
        return Err(FormatError::Corrupt("header counts out of range"));
    }

    let channel_settings = r.read_bytes(32)?.to_vec();
    let num_channels = active_channels(&channel_settings);
    if num_channels == 0 {
        return Err(FormatError::Corrupt("no enabled channels"));
    }

    let orders = r.read_bytes(order_count)?.to_vec();
    let mut inst_paras = Vec::with_capacity(inst_count);
    for _ in 0..inst_count {
        inst_paras.push(r.read_u16_le()? as usize * 16);
    }
    let mut pat_paras = Vec::with_capacity(pat_count);
    for _ in 0..pat_count {
        pat_paras.push(r.read_u16_le()? as usize * 16);
    }

    let mut song = Song::with_channels(&title, SourceFormat::S3m, num_channels);
    song.initial_speed = if speed == 0 { 6 } else { speed };
    song.initial_tempo = if tempo < 33 { 125 } else { tempo };

    // Channel map: pan hard left/right per the setting byte, optional
    // stored pan table overrides it.
    apply_channel_settings(&mut song, &channel_settings);
    if default_pan_flag == 252 {
        if let Ok(pans) = r.read_bytes(32) {
            for (ch, &p) in pans.iter().take(num_channels as usize).enumerate() {
                if p & 0x20 != 0 {
                    song.channels[ch].initial_pan = pan_nibble(p & 0x0F);
                }
            }
        }
    }

    song.positions = orders
        .iter()
        .copied()
        .filter(|&o| o != ORDER_END && o != ORDER_MARKER)
        .collect();

    for (idx, &para) in inst_paras.iter().enumerate() {
        match parse_instrument(data, para, sample_format == 2) {
            Ok(inst) => song.instruments.push(inst),
            Err(e) => {
                log::warn!("S3M instrument {} failed ({}), substituting silence", idx, e);
                song.instruments
                    .push(normalize::placeholder_instrument(&format!("Instrument {}", idx + 1)));
            }
        }
    }

    for (idx, &para) in pat_paras.iter().enumerate() {
        match parse_pattern(data, para, num_channels, &channel_settings) {
            Ok(p) => song.patterns.push(p),
            Err(e) => {
                log::warn!("S3M pattern {} failed ({}), substituting empty", idx, e);
                song.patterns.push(Pattern::new(64, num_channels));
            }
        }
    }

    let pat_count = song.patterns.len() as u8;
    song.positions.retain(|&p| p < pat_count);

    Ok(song)
}

/// Count channels enabled in the 32-byte settings table. Disabled
/// channels (bit 7, or the 255 filler) are skipped; the canonical song
/// keeps only the enabled prefix remap.
fn active_channels(settings: &[u8]) -> u8 {
    let mut last = 0;
    for (i, &s) in settings.iter().enumerate() {
        if s != 255 && s & 0x80 == 0 {
            last = i + 1;
        }
    }
    last.min(32) as u8
}

fn apply_channel_settings(song: &mut Song, settings: &[u8]) {
    for (ch, state) in song.channels.iter_mut().enumerate() {
        let s = settings[ch];
        if s == 255 || s & 0x80 != 0 {
            state.muted = true;
            continue;
        }
        // 0-7 left speaker, 8-15 right, 16+ Adlib (center)
        state.initial_pan = match s & 0x1F {
            0..=7 => -48,
            8..=15 => 48,
            _ => 0,
        };
    }
}

fn pan_nibble(n: u8) -> i8 {
    // 0..15 -> -64..+64
    ((n as i16) * 128 / 15 - 64) as i8
}

pub(crate) fn parse_instrument(
    data: &[u8],
    offset: usize,
    unsigned: bool,
) -> Result<Instrument, FormatError> {
    let mut r = ByteReader::new(data);
    r.seek(offset)?;
    let inst_type = r.read_u8()?;
    r.skip(12)?; // DOS filename
    let memseg_hi = r.read_u8()? as usize;
    let memseg_lo = r.read_u16_le()? as usize;
    let length = r.read_u32_le()? as usize & 0xFFFF;
    let loop_start = r.read_u32_le()? & 0xFFFF;
    let loop_end = r.read_u32_le()? & 0xFFFF;
    let volume = r.read_u8()?.min(64);
    r.skip(1)?;
    let pack = r.read_u8()?;
    let flags = r.read_u8()?;
    let c2spd = r.read_u32_le()?;
    r.skip(12)?;
    let name = r.read_string(28)?;

    if inst_type != 1 {
        // Adlib melody/drum or empty slot: keep the name, no PCM
        return Ok(normalize::placeholder_instrument(&name));
    }
    if pack != 0 {
        return Err(FormatError::Unsupported("packed S3M sample"));
    }
    if flags & 0x04 != 0 {
        return Err(FormatError::Unsupported("16-bit S3M sample"));
    }

    let mut sample = Sample::new(&name);
    sample.default_volume = volume;
    sample.c4_speed = if c2spd == 0 { 8363 } else { c2spd };
    sample.loop_start = loop_start;
    sample.loop_end = loop_end;
    sample.loop_type = if flags & 1 != 0 { LoopType::Forward } else { LoopType::None };

    let pcm_offset = ((memseg_hi << 16) | memseg_lo) * 16;
    let end = pcm_offset
        .checked_add(length)
        .ok_or(FormatError::Corrupt("sample offset overflow"))?;
    if pcm_offset > 0 && pcm_offset < data.len() && length > 0 {
        let avail = end.min(data.len());
        let raw = &data[pcm_offset..avail];
        sample.data = if unsigned {
            SampleData::Mono8(normalize::unsigned8(raw))
        } else {
            SampleData::Mono8(normalize::signed8(raw))
        };
    }
    sample.sanitize_loop();

    Ok(Instrument::sampled(&name, sample))
}

fn parse_pattern(
    data: &[u8],
    offset: usize,
    num_channels: u8,
    settings: &[u8],
) -> Result<Pattern, FormatError> {
    let mut pattern = Pattern::new(64, num_channels);
    if offset == 0 {
        return Ok(pattern); // unstored pattern, play empty
    }

    let mut r = ByteReader::new(data);
    r.seek(offset)?;
    let packed_len = r.read_u16_le()? as usize;
    let packed = r.read_bytes(packed_len.saturating_sub(2))?;
    let mut p = ByteReader::new(packed);

    // Song channels mirror file channel slots; disabled slots are muted
    // in the channel map and their cells dropped here.
    let mut keep = [false; 32];
    for (i, &s) in settings.iter().enumerate() {
        keep[i] = s != 255 && s & 0x80 == 0 && (i as u8) < num_channels;
    }

    let mut row = 0u16;
    while row < 64 {
        if p.remaining() == 0 {
            break;
        }
        let what = p.read_u8()?;
        if what == 0 {
            row += 1;
            continue;
        }

        let file_channel = (what & 0x1F) as usize;
        let mut cell = Cell::empty();
        if what & 0x20 != 0 {
            let note = p.read_u8()?;
            let inst = p.read_u8()?;
            cell.note = s3m_note(note);
            cell.instrument = inst;
        }
        if what & 0x40 != 0 {
            let vol = p.read_u8()?;
            if vol <= 64 {
                cell.volume = VolumeCommand::Volume(vol);
            }
        }
        if what & 0x80 != 0 {
            let cmd = p.read_u8()?;
            let info = p.read_u8()?;
            cell.effect = parse_s3m(cmd, info);
        }

        if keep[file_channel] {
            *pattern.cell_mut(row, file_channel as u8) = cell;
        }
    }

    Ok(pattern)
}

/// S3M packs notes as octave in the high nibble, semitone in the low.
pub(crate) fn s3m_note(raw: u8) -> Note {
    match raw {
        255 => Note::None,
        254 => Note::Off, // ^^ note cut stops the voice
        _ => {
            let octave = raw >> 4;
            let semitone = raw & 0x0F;
            if semitone < 12 {
                Note::from_octave_semitone(octave, semitone)
            } else {
                Note::None
            }
        }
    }
}
