//! ProTracker MOD decoder and signature detection.

use rm_ir::{Cell, Instrument, LoopType, Pattern, Sample, SampleData, Song, SourceFormat};

use crate::effect::parse_protracker;
use crate::normalize;
use crate::period::{finetune_to_c4speed, nibble_finetune, period_to_note};
use crate::reader::ByteReader;
use crate::FormatError;

const HEADER_LEN: usize = 1084;
const SIGNATURE_OFFSET: usize = 1080;

/// Channel count for a known MOD signature.
fn channels_for_signature(sig: &[u8]) -> Option<u8> {
    match sig {
        b"M.K." | b"M!K!" | b"FLT4" => Some(4),
        b"6CHN" => Some(6),
        b"8CHN" | b"OCTA" | b"FLT8" => Some(8),
        _ => None,
    }
}

/// Detect a signed MOD file by its signature at offset 1080.
pub fn detect(data: &[u8]) -> bool {
    data.len() >= HEADER_LEN
        && channels_for_signature(&data[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 4]).is_some()
}

/// Load a MOD file from bytes.
pub fn load_mod(data: &[u8], filename: Option<&str>) -> Result<Song, FormatError> {
    if data.len() < HEADER_LEN {
        return Err(FormatError::UnexpectedEof);
    }

    let num_channels = channels_for_signature(&data[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 4])
        .ok_or(FormatError::InvalidHeader)?;

    let mut r = ByteReader::new(data);
    let mut title = r.read_string(20)?;
    if title.is_empty() {
        if let Some(name) = filename {
            title = default_title(name);
        }
    }

    let mut song = Song::with_channels(&title, SourceFormat::Mod, num_channels);

    // 31 sample headers of 30 bytes each
    let mut sample_lens = [0usize; 31];
    for i in 0..31 {
        let (sample, len) = parse_sample_header(&mut r, i)?;
        sample_lens[i] = len;
        let name = sample.name;
        song.instruments
            .push(Instrument::sampled(name.as_str(), sample));
    }

    let song_length = (r.read_u8()? as usize).min(128);
    song.restart_position = r.read_u8()?;
    let order_table = r.read_bytes(128)?;
    r.skip(4)?; // signature

    song.positions = order_table[..song_length].to_vec();

    // Patterns follow the header; the file stores as many as the order
    // table references.
    let max_pattern = order_table.iter().max().copied().unwrap_or(0) as usize;
    let pattern_size = 64 * num_channels as usize * 4;
    for pat_idx in 0..=max_pattern {
        let pat_offset = HEADER_LEN + pat_idx * pattern_size;
        match data.get(pat_offset..pat_offset + pattern_size) {
            Some(bytes) => song.patterns.push(parse_pattern(bytes, num_channels)),
            None => {
                // Truncated pattern area: substitute an empty pattern so
                // the rest of the song still plays.
                log::warn!("MOD pattern {} truncated, substituting empty", pat_idx);
                song.patterns.push(Pattern::new(64, num_channels));
            }
        }
    }

    // Sample data is laid out sequentially after the patterns.
    let mut sample_offset = HEADER_LEN + (max_pattern + 1) * pattern_size;
    for (i, inst) in song.instruments.iter_mut().enumerate() {
        let len = sample_lens[i];
        if len == 0 {
            continue;
        }
        if let rm_ir::InstrumentKind::Sampled { samples, .. } = &mut inst.kind {
            let sample = &mut samples[0];
            let avail = data.len().saturating_sub(sample_offset).min(len);
            if avail > 0 {
                sample.data = SampleData::Mono8(normalize::signed8(
                    &data[sample_offset..sample_offset + avail],
                ));
            }
            sample.sanitize_loop();
            sample_offset += len;
        }
    }

    song.initial_tempo = 125;
    song.initial_speed = 6;

    Ok(song)
}

/// Derive a song title from a filename hint, stripping path and extension.
pub fn default_title(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = base.rsplit_once('.').map(|(s, _)| s).unwrap_or(base);
    stem.to_string()
}

/// Parse one 30-byte sample header. Returns the sample and its data
/// length in bytes.
fn parse_sample_header(
    r: &mut ByteReader,
    index: usize,
) -> Result<(Sample, usize), FormatError> {
    let name = r.read_string(22)?;
    let length = r.read_u16_be()? as usize * 2;
    let finetune = nibble_finetune(r.read_u8()?);
    let volume = r.read_u8()?.min(64);
    let loop_start = r.read_u16_be()? as u32 * 2;
    let loop_length = r.read_u16_be()? as u32 * 2;

    let display_name = if name.is_empty() {
        format!("Sample {}", index + 1)
    } else {
        name
    };
    let mut sample = Sample::new(&display_name);
    sample.default_volume = volume;
    sample.c4_speed = finetune_to_c4speed(finetune);

    if loop_length > 2 {
        sample.loop_start = loop_start;
        sample.loop_end = loop_start + loop_length;
        sample.loop_type = LoopType::Forward;
    }

    Ok((sample, length))
}

/// Parse one 64-row pattern of fixed 4-byte cells.
fn parse_pattern(data: &[u8], num_channels: u8) -> Pattern {
    let mut pattern = Pattern::new(64, num_channels);

    for row in 0..64u16 {
        for ch in 0..num_channels {
            let offset = (row as usize * num_channels as usize + ch as usize) * 4;
            *pattern.cell_mut(row, ch) = parse_cell(&data[offset..offset + 4]);
        }
    }

    pattern
}

/// Parse a single 4-byte MOD cell.
///
/// Byte 0: sample number high nibble | period bits 8-11
/// Byte 1: period bits 0-7
/// Byte 2: sample number low nibble | effect command
/// Byte 3: effect parameter
fn parse_cell(data: &[u8]) -> Cell {
    let sample_hi = data[0] & 0xF0;
    let period = (((data[0] & 0x0F) as u16) << 8) | data[1] as u16;
    let sample_lo = (data[2] & 0xF0) >> 4;
    let sample = sample_hi | sample_lo;

    let effect_cmd = data[2] & 0x0F;
    let effect_param = data[3];

    Cell {
        note: period_to_note(period),
        instrument: sample,
        volume: rm_ir::VolumeCommand::None,
        effect: parse_protracker(effect_cmd, effect_param),
        effect2: rm_ir::Effect::None,
    }
}
