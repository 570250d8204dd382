//! FastTracker II XM decoder.

use rm_ir::{
    AutoVibrato, Cell, Envelope, Instrument, InstrumentKind, LoopType, Note, Pattern, Sample,
    SampleData, Song, SourceFormat,
};

use crate::effect::{parse_xm, parse_xm_volume};
use crate::normalize;
use crate::reader::ByteReader;
use crate::FormatError;

const MAGIC: &[u8] = b"Extended Module: ";
const KEY_OFF: u8 = 97;

/// Detect an XM file: text magic, 0x1A separator, known version.
pub fn detect(data: &[u8]) -> bool {
    data.len() >= 60
        && &data[..17] == MAGIC
        && data[37] == 0x1A
        && u16::from_le_bytes([data[58], data[59]]) >= 0x0102
}

/// Load an XM file from bytes.
pub fn load_xm(data: &[u8]) -> Result<Song, FormatError> {
    if !detect(data) {
        return Err(FormatError::InvalidHeader);
    }

    let mut r = ByteReader::new(data);
    r.skip(17)?;
    let title = r.read_string(20)?;
    r.skip(1)?; // 0x1A
    r.skip(20)?; // tracker name
    let _version = r.read_u16_le()?;

    let header_start = r.pos();
    let header_size = r.read_u32_le()? as usize;
    let song_length = r.read_u16_le()? as usize;
    let restart = r.read_u16_le()?;
    let num_channels = r.read_u16_le()?;
    let num_patterns = r.read_u16_le()? as usize;
    let num_instruments = r.read_u16_le()? as usize;
    let flags = r.read_u16_le()?;
    let speed = r.read_u16_le()?;
    let bpm = r.read_u16_le()?;

    if num_channels == 0 || num_channels > 32 {
        return Err(FormatError::Corrupt("channel count out of range"));
    }
    if song_length > 256 || num_patterns > 256 || num_instruments > 128 {
        return Err(FormatError::Corrupt("header counts out of range"));
    }
    let num_channels = num_channels as u8;

    let order = r.read_bytes(256)?;

    let mut song = Song::with_channels(&title, SourceFormat::Xm, num_channels);
    song.positions = order[..song_length.min(256)].to_vec();
    song.restart_position = restart.min(255) as u8;
    song.initial_speed = speed.clamp(1, 31) as u8;
    song.initial_tempo = bpm.min(255) as u8;
    song.linear_periods = flags & 1 != 0;

    // Pattern headers are relative to the end of the module header.
    r.seek(header_start + header_size)?;
    for idx in 0..num_patterns {
        match parse_pattern(&mut r, num_channels) {
            Ok(p) => song.patterns.push(p),
            Err(e) => {
                log::warn!("XM pattern {} failed ({}), substituting empty", idx, e);
                song.patterns.push(Pattern::new(64, num_channels));
            }
        }
    }

    for idx in 0..num_instruments {
        match parse_instrument(&mut r, idx) {
            Ok(inst) => song.instruments.push(inst),
            Err(e) => {
                log::warn!("XM instrument {} failed ({}), substituting silence", idx, e);
                song.instruments
                    .push(normalize::placeholder_instrument(&format!(
                        "Instrument {}",
                        idx + 1
                    )));
                // Instrument layout is sequential; a parse failure loses
                // the stream position, so stop rather than misread.
                break;
            }
        }
    }

    // Out-of-range order entries would break the position invariant.
    let pat_count = song.patterns.len() as u8;
    song.positions.retain(|&p| p < pat_count);

    Ok(song)
}

fn parse_pattern(r: &mut ByteReader, num_channels: u8) -> Result<Pattern, FormatError> {
    let start = r.pos();
    let header_len = r.read_u32_le()? as usize;
    let _packing = r.read_u8()?;
    let rows = r.read_u16_le()?.clamp(1, 256);
    let packed_size = r.read_u16_le()? as usize;
    r.seek(start + header_len)?;

    let mut pattern = Pattern::new(rows, num_channels);
    if packed_size == 0 {
        return Ok(pattern);
    }

    let packed = r.read_bytes(packed_size)?;
    let mut p = ByteReader::new(packed);

    'rows: for row in 0..rows {
        for ch in 0..num_channels {
            if p.remaining() == 0 {
                break 'rows;
            }
            let b = p.read_u8()?;
            let (mut note, mut inst, mut vol, mut eff, mut param) = (0u8, 0u8, 0u8, 0u8, 0u8);
            if b & 0x80 != 0 {
                if b & 0x01 != 0 {
                    note = p.read_u8()?;
                }
                if b & 0x02 != 0 {
                    inst = p.read_u8()?;
                }
                if b & 0x04 != 0 {
                    vol = p.read_u8()?;
                }
                if b & 0x08 != 0 {
                    eff = p.read_u8()?;
                }
                if b & 0x10 != 0 {
                    param = p.read_u8()?;
                }
            } else {
                note = b;
                inst = p.read_u8()?;
                vol = p.read_u8()?;
                eff = p.read_u8()?;
                param = p.read_u8()?;
            }

            *pattern.cell_mut(row, ch) = Cell {
                note: match note {
                    0 => Note::None,
                    KEY_OFF => Note::Off,
                    n if n <= 96 => Note::On(n),
                    _ => Note::None,
                },
                instrument: inst,
                volume: parse_xm_volume(vol),
                effect: parse_xm(eff, param),
                effect2: rm_ir::Effect::None,
            };
        }
    }

    Ok(pattern)
}

fn parse_instrument(r: &mut ByteReader, index: usize) -> Result<Instrument, FormatError> {
    let start = r.pos();
    let inst_size = r.read_u32_le()? as usize;
    if inst_size < 29 {
        return Err(FormatError::Corrupt("instrument header too small"));
    }
    let name = r.read_string(22)?;
    let _type = r.read_u8()?;
    let num_samples = r.read_u16_le()? as usize;

    let display_name = if name.is_empty() {
        format!("Instrument {}", index + 1)
    } else {
        name
    };

    if num_samples == 0 {
        r.seek(start + inst_size)?;
        return Ok(normalize::placeholder_instrument(&display_name));
    }
    if num_samples > 16 {
        return Err(FormatError::Corrupt("sample count out of range"));
    }

    let _sample_header_size = r.read_u32_le()?;
    let keymap_bytes = r.read_bytes(96)?;
    let mut keymap = Box::new([0u8; 96]);
    keymap.copy_from_slice(keymap_bytes);

    let vol_points = read_envelope_points(r)?;
    let pan_points = read_envelope_points(r)?;
    let num_vol_points = r.read_u8()? as usize;
    let num_pan_points = r.read_u8()? as usize;
    let vol_sustain = r.read_u8()?;
    let vol_loop_start = r.read_u8()?;
    let vol_loop_end = r.read_u8()?;
    let pan_sustain = r.read_u8()?;
    let pan_loop_start = r.read_u8()?;
    let pan_loop_end = r.read_u8()?;
    let vol_type = r.read_u8()?;
    let pan_type = r.read_u8()?;
    let vib_type = r.read_u8()?;
    let vib_sweep = r.read_u8()?;
    let vib_depth = r.read_u8()?;
    let vib_rate = r.read_u8()?;
    let fadeout = r.read_u16_le()?;

    let volume_envelope = build_envelope(
        &vol_points,
        num_vol_points,
        vol_type,
        vol_sustain,
        vol_loop_start,
        vol_loop_end,
    );
    let panning_envelope = build_envelope(
        &pan_points,
        num_pan_points,
        pan_type,
        pan_sustain,
        pan_loop_start,
        pan_loop_end,
    );

    let vibrato = if vib_depth > 0 {
        Some(AutoVibrato {
            speed: vib_rate,
            depth: vib_depth,
            sweep: vib_sweep,
            waveform: vib_type,
        })
    } else {
        None
    };

    // Sample headers follow the (variable-size) instrument header.
    r.seek(start + inst_size)?;
    let mut headers = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        headers.push(parse_sample_header(r)?);
    }

    // Sample data follows all headers, delta-coded.
    let mut samples = Vec::with_capacity(num_samples);
    for (mut sample, byte_len, sixteen_bit) in headers {
        let raw = r.read_bytes(byte_len)?;
        sample.data = if sixteen_bit {
            SampleData::Mono16(normalize::delta16_le(raw))
        } else {
            SampleData::Mono8(normalize::delta8(raw))
        };
        sample.vibrato = vibrato;
        sample.sanitize_loop();
        samples.push(sample);
    }

    let mut inst_name = arrayvec::ArrayString::new();
    let _ = inst_name.try_push_str(&display_name);
    Ok(Instrument {
        name: inst_name,
        kind: InstrumentKind::Sampled {
            samples,
            keymap: Some(keymap),
            volume_envelope,
            panning_envelope,
            fadeout,
        },
    })
}

/// Read the fixed 12-slot envelope point table (48 bytes).
fn read_envelope_points(r: &mut ByteReader) -> Result<Vec<(u16, u16)>, FormatError> {
    let mut points = Vec::with_capacity(12);
    for _ in 0..12 {
        let x = r.read_u16_le()?;
        let y = r.read_u16_le()?;
        points.push((x, y));
    }
    Ok(points)
}

fn build_envelope(
    points: &[(u16, u16)],
    count: usize,
    env_type: u8,
    sustain: u8,
    loop_start: u8,
    loop_end: u8,
) -> Option<Envelope> {
    if env_type & 1 == 0 || count == 0 {
        return None;
    }
    let count = count.min(12);
    let mut env = Envelope::new();
    for &(x, y) in &points[..count] {
        env.add_point(x, y.min(64) as i8);
    }
    env.enabled = true;
    if env_type & 2 != 0 {
        env.sustain = Some(sustain);
    }
    if env_type & 4 != 0 {
        env.loop_start = Some(loop_start);
        env.loop_end = Some(loop_end);
    }
    Some(env)
}

/// Parse one 40-byte sample header. Returns the sample, its stored byte
/// length and whether the PCM is 16-bit.
fn parse_sample_header(r: &mut ByteReader) -> Result<(Sample, usize, bool), FormatError> {
    let byte_len = r.read_u32_le()? as usize;
    let loop_start = r.read_u32_le()?;
    let loop_len = r.read_u32_le()?;
    let volume = r.read_u8()?.min(64);
    let finetune = r.read_i8()?;
    let type_flags = r.read_u8()?;
    let pan = r.read_u8()?;
    let rel_note = r.read_i8()?;
    let _reserved = r.read_u8()?;
    let name = r.read_string(22)?;

    let sixteen_bit = type_flags & 0x10 != 0;
    let frames = |bytes: u32| if sixteen_bit { bytes / 2 } else { bytes };

    let mut sample = Sample::new(&name);
    sample.default_volume = volume;
    sample.default_pan = ((pan as i16) - 128).clamp(-64, 64) as i8;
    sample.c4_speed = relnote_finetune_to_c4speed(rel_note, finetune);
    sample.loop_start = frames(loop_start);
    sample.loop_end = frames(loop_start.saturating_add(loop_len));
    sample.loop_type = match type_flags & 0x03 {
        1 => LoopType::Forward,
        2 => LoopType::PingPong,
        _ => LoopType::None,
    };
    if loop_len == 0 {
        sample.loop_type = LoopType::None;
    }

    Ok((sample, byte_len, sixteen_bit))
}

/// XM pitch correction: relative note in semitones plus finetune in
/// 1/128ths of a semitone, both applied to the 8363 Hz reference.
fn relnote_finetune_to_c4speed(rel_note: i8, finetune: i8) -> u32 {
    let semitones = rel_note as f64 + finetune as f64 / 128.0;
    (8363.0 * (semitones / 12.0).exp2()).round() as u32
}
