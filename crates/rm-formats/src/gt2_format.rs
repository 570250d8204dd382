//! GraoumfTracker2 GT2 decoder.
//!
//! GT2 is big-endian and chunked: a fixed header carrying the creation
//! date, then tagged chunks for the order list, patterns and samples.
//! The year field doubles as a detection check since the three-byte tag
//! alone is too weak.

use rm_ir::{Cell, Instrument, LoopType, Note, Pattern, Sample, SampleData, Song, SourceFormat, VolumeCommand};

use crate::effect::parse_protracker;
use crate::normalize;
use crate::reader::ByteReader;
use crate::FormatError;

const HEADER_LEN: usize = 50;

pub fn detect(data: &[u8]) -> bool {
    if data.len() < HEADER_LEN || &data[..3] != b"GT2" {
        return false;
    }
    let year = u16::from_be_bytes([data[40], data[41]]);
    (1980..=2100).contains(&year)
}

pub fn load_gt2(data: &[u8]) -> Result<Song, FormatError> {
    if !detect(data) {
        return Err(FormatError::InvalidHeader);
    }

    let mut r = ByteReader::new(data);
    r.skip(3)?;
    let _version = r.read_u8()?;
    let header_size = r.read_u32_be()? as usize;
    let title = r.read_string(32)?;
    let _year = r.read_u16_be()?;
    let _month = r.read_u8()?;
    let _day = r.read_u8()?;
    let speed = r.read_u16_be()?;
    let tempo = r.read_u16_be()?;
    let num_channels = r.read_u16_be()?;

    if num_channels == 0 || num_channels > 32 {
        return Err(FormatError::Corrupt("channel count out of range"));
    }
    let num_channels = num_channels as u8;

    let mut song = Song::with_channels(&title, SourceFormat::GraoumfTracker2, num_channels);
    song.initial_speed = speed.clamp(1, 31) as u8;
    song.initial_tempo = tempo.clamp(32, 255) as u8;

    r.seek(header_size.max(HEADER_LEN))?;

    // Patterns may arrive out of order; collect then place.
    let mut patterns: Vec<(u16, Pattern)> = Vec::new();

    while r.remaining() >= 8 {
        let tag: [u8; 4] = r.read_bytes(4)?.try_into().unwrap_or([0; 4]);
        let size = r.read_u32_be()? as usize;
        if size < 8 || size - 8 > r.remaining() {
            log::warn!(
                "GT2 chunk {:?} overruns the file, stopping chunk walk",
                String::from_utf8_lossy(&tag)
            );
            break;
        }
        let payload = r.read_bytes(size - 8)?;

        match &tag {
            b"SONG" => {
                let mut p = ByteReader::new(payload);
                let count = p.read_u16_be()? as usize;
                if count <= 256 {
                    song.positions = p.read_bytes(count.min(p.remaining()))?.to_vec();
                }
            }
            b"PATD" => match parse_pattern_chunk(payload, num_channels) {
                Ok(entry) => patterns.push(entry),
                Err(e) => log::warn!("GT2 pattern chunk failed ({}), skipping", e),
            },
            b"SAMP" => {
                let idx = song.instruments.len();
                match parse_sample_chunk(payload) {
                    Ok(inst) => song.instruments.push(inst),
                    Err(e) => {
                        log::warn!("GT2 sample {} failed ({}), substituting silence", idx, e);
                        song.instruments.push(normalize::placeholder_instrument(
                            &format!("Instrument {}", idx + 1),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    if patterns.is_empty() {
        return Err(FormatError::Corrupt("no pattern chunks"));
    }
    let highest = patterns.iter().map(|(n, _)| *n).max().unwrap_or(0);
    if highest > 255 {
        return Err(FormatError::Corrupt("pattern number out of range"));
    }
    let mut table = vec![Pattern::new(64, num_channels); highest as usize + 1];
    for (number, pattern) in patterns {
        table[number as usize] = pattern;
    }
    song.patterns = table;

    let pat_count = song.patterns.len() as u8;
    song.positions.retain(|&p| p < pat_count);

    Ok(song)
}

/// PATD chunk: pattern number, row count, then a flat grid of 5-byte
/// cells (note, instrument, volume, effect, parameter).
fn parse_pattern_chunk(payload: &[u8], num_channels: u8) -> Result<(u16, Pattern), FormatError> {
    let mut r = ByteReader::new(payload);
    let number = r.read_u16_be()?;
    let rows = r.read_u16_be()?;
    if rows == 0 || rows > 256 {
        return Err(FormatError::Corrupt("row count out of range"));
    }

    let mut pattern = Pattern::new(rows, num_channels);
    'rows: for row in 0..rows {
        for ch in 0..num_channels {
            if r.remaining() < 5 {
                break 'rows;
            }
            let note = r.read_u8()?;
            let inst = r.read_u8()?;
            let vol = r.read_u8()?;
            let cmd = r.read_u8()?;
            let param = r.read_u8()?;

            *pattern.cell_mut(row, ch) = Cell {
                note: match note {
                    0 => Note::None,
                    0xFF => Note::Off,
                    n if n <= rm_ir::NOTE_MAX => Note::On(n),
                    _ => Note::None,
                },
                instrument: inst,
                volume: if vol > 0 && vol <= 65 {
                    VolumeCommand::Volume(vol - 1)
                } else {
                    VolumeCommand::None
                },
                effect: parse_protracker(cmd, param),
                effect2: rm_ir::Effect::None,
            };
        }
    }
    Ok((number, pattern))
}

/// SAMP chunk: name, big-endian geometry, then in-place PCM.
fn parse_sample_chunk(payload: &[u8]) -> Result<Instrument, FormatError> {
    let mut r = ByteReader::new(payload);
    let name = r.read_string(28)?;
    let length = r.read_u32_be()? as usize;
    let loop_start = r.read_u32_be()?;
    let loop_end = r.read_u32_be()?;
    let c4_speed = r.read_u32_be()?;
    let volume = r.read_u8()?.min(64);
    let flags = r.read_u8()?;

    let sixteen_bit = flags & 0x02 != 0;
    let signed = flags & 0x04 != 0;

    let mut sample = Sample::new(&name);
    sample.default_volume = volume;
    sample.c4_speed = if c4_speed == 0 { 8363 } else { c4_speed };
    sample.loop_start = loop_start;
    sample.loop_end = loop_end;
    sample.loop_type = if flags & 0x01 != 0 { LoopType::Forward } else { LoopType::None };

    let byte_len = if sixteen_bit { length * 2 } else { length };
    let pcm = r.read_bytes(byte_len.min(r.remaining()))?;
    sample.data = match (sixteen_bit, signed) {
        (false, true) => SampleData::Mono8(normalize::signed8(pcm)),
        (false, false) => SampleData::Mono8(normalize::unsigned8(pcm)),
        (true, true) => SampleData::Mono16(normalize::signed16_be(pcm)),
        (true, false) => SampleData::Mono16(normalize::unsigned16_be(pcm)),
    };
    sample.sanitize_loop();

    Ok(Instrument::sampled(&name, sample))
}
