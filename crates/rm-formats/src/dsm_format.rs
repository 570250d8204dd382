//! DSIK DSM decoder.
//!
//! DSM is a RIFF container: a "DSMF" form holding one SONG chunk, one
//! INST chunk per sample and one PATT chunk per pattern. Chunk sizes are
//! validated against the buffer before any payload is touched, and a
//! bad chunk costs only itself.

use rm_ir::{Cell, Instrument, LoopType, Note, Pattern, Sample, SampleData, Song, SourceFormat, VolumeCommand};

use crate::effect::parse_protracker;
use crate::normalize;
use crate::reader::{magic_at, ByteReader};
use crate::FormatError;

pub fn detect(data: &[u8]) -> bool {
    magic_at(data, 0, b"RIFF") && magic_at(data, 8, b"DSMF")
}

pub fn load_dsm(data: &[u8]) -> Result<Song, FormatError> {
    if !detect(data) {
        return Err(FormatError::InvalidHeader);
    }

    let mut r = ByteReader::new(data);
    r.skip(12)?; // RIFF <len> DSMF

    let mut song: Option<Song> = None;
    let mut expected_patterns = 0usize;
    let mut expected_instruments = 0usize;

    while r.remaining() >= 8 {
        let tag: [u8; 4] = r.read_bytes(4)?.try_into().unwrap_or([0; 4]);
        let size = r.read_u32_le()? as usize;
        if size > r.remaining() {
            log::warn!(
                "DSM chunk {:?} overruns the file, stopping chunk walk",
                String::from_utf8_lossy(&tag)
            );
            break;
        }
        let payload = r.read_bytes(size)?;

        match &tag {
            b"SONG" => {
                let (s, pats, insts) = parse_song_chunk(payload)?;
                expected_patterns = pats;
                expected_instruments = insts;
                song = Some(s);
            }
            b"INST" => {
                if let Some(song) = song.as_mut() {
                    let idx = song.instruments.len();
                    match parse_inst_chunk(payload) {
                        Ok(inst) => song.instruments.push(inst),
                        Err(e) => {
                            log::warn!("DSM instrument {} failed ({}), substituting silence", idx, e);
                            song.instruments.push(normalize::placeholder_instrument(
                                &format!("Instrument {}", idx + 1),
                            ));
                        }
                    }
                }
            }
            b"PATT" => {
                if let Some(song) = song.as_mut() {
                    let idx = song.patterns.len();
                    match parse_patt_chunk(payload, song.num_channels) {
                        Ok(p) => song.patterns.push(p),
                        Err(e) => {
                            log::warn!("DSM pattern {} failed ({}), substituting empty", idx, e);
                            song.patterns.push(Pattern::new(64, song.num_channels));
                        }
                    }
                }
            }
            _ => {} // unknown chunk, skip
        }
    }

    let mut song = song.ok_or(FormatError::Corrupt("missing SONG chunk"))?;

    // Pad out slots the chunk walk never delivered.
    while song.patterns.len() < expected_patterns {
        song.patterns.push(Pattern::new(64, song.num_channels));
    }
    while song.instruments.len() < expected_instruments {
        let n = song.instruments.len();
        song.instruments
            .push(normalize::placeholder_instrument(&format!("Instrument {}", n + 1)));
    }

    let pat_count = song.patterns.len() as u8;
    song.positions.retain(|&p| p < pat_count);

    Ok(song)
}

/// SONG chunk: fixed 192-byte layout with counts, mixing defaults,
/// 16 pan positions and a 128-byte order list.
fn parse_song_chunk(payload: &[u8]) -> Result<(Song, usize, usize), FormatError> {
    let mut r = ByteReader::new(payload);
    let title = r.read_string(28)?;
    let _version = r.read_u16_le()?;
    let _flags = r.read_u16_le()?;
    r.skip(4)?;
    let ord_num = r.read_u16_le()? as usize;
    let smp_num = r.read_u16_le()? as usize;
    let pat_num = r.read_u16_le()? as usize;
    let chn_num = r.read_u16_le()?;
    let _global_vol = r.read_u8()?;
    let _master_vol = r.read_u8()?;
    let speed = r.read_u8()?;
    let bpm = r.read_u8()?;

    if chn_num == 0 || chn_num > 16 {
        return Err(FormatError::Corrupt("channel count out of range"));
    }
    if ord_num > 128 || smp_num > 64 || pat_num > 256 {
        return Err(FormatError::Corrupt("header counts out of range"));
    }

    let pans = r.read_bytes(16)?.to_vec();
    let orders = r.read_bytes(128)?;

    let mut song = Song::with_channels(&title, SourceFormat::Dsm, chn_num as u8);
    song.initial_speed = if speed == 0 { 6 } else { speed };
    song.initial_tempo = if bpm == 0 { 125 } else { bpm };
    for ch in 0..chn_num as usize {
        // 0..128 pan, 64 center
        song.channels[ch].initial_pan = ((pans[ch].min(128) as i16) - 64).clamp(-64, 64) as i8;
    }
    song.positions = orders[..ord_num]
        .iter()
        .copied()
        .filter(|&o| o < 255)
        .collect();

    Ok((song, pat_num, smp_num))
}

/// INST chunk: sample header followed in-place by its PCM.
fn parse_inst_chunk(payload: &[u8]) -> Result<Instrument, FormatError> {
    let mut r = ByteReader::new(payload);
    r.skip(13)?; // DOS filename
    let flags = r.read_u16_le()?;
    let volume = r.read_u8()?.min(64);
    let length = r.read_u32_le()? as usize;
    let loop_start = r.read_u32_le()?;
    let loop_end = r.read_u32_le()?;
    r.skip(4)?; // address pointer, meaningless on disk
    let c2spd = r.read_u16_le()?;
    let _period = r.read_u16_le()?;
    let name = r.read_string(28)?;

    let mut sample = Sample::new(&name);
    sample.default_volume = volume;
    sample.c4_speed = if c2spd == 0 { 8363 } else { c2spd as u32 };
    sample.loop_start = loop_start;
    sample.loop_end = loop_end;
    sample.loop_type = if flags & 0x01 != 0 { LoopType::Forward } else { LoopType::None };

    let pcm = r.read_bytes(length.min(r.remaining()))?;
    sample.data = if flags & 0x02 != 0 {
        SampleData::Mono8(normalize::signed8(pcm))
    } else {
        SampleData::Mono8(normalize::unsigned8(pcm))
    };
    sample.sanitize_loop();

    Ok(Instrument::sampled(&name, sample))
}

/// PATT chunk: u16 packed length, then rows of channel bytes with the
/// presence flags in the high nibble.
fn parse_patt_chunk(payload: &[u8], num_channels: u8) -> Result<Pattern, FormatError> {
    let mut r = ByteReader::new(payload);
    let _packed_len = r.read_u16_le()?;
    let mut pattern = Pattern::new(64, num_channels);

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

        let channel = what & 0x0F;
        let mut cell = Cell::empty();
        if what & 0x80 != 0 {
            cell.note = dsm_note(r.read_u8()?);
        }
        if what & 0x40 != 0 {
            cell.instrument = r.read_u8()?;
        }
        if what & 0x20 != 0 {
            let vol = r.read_u8()?;
            if vol <= 64 {
                cell.volume = VolumeCommand::Volume(vol);
            }
        }
        if what & 0x10 != 0 {
            let cmd = r.read_u8()?;
            let info = r.read_u8()?;
            cell.effect = parse_protracker(cmd, info);
        }

        if channel < num_channels {
            *pattern.cell_mut(row, channel) = cell;
        }
    }

    Ok(pattern)
}

fn dsm_note(raw: u8) -> Note {
    match raw {
        0 => Note::None,
        n if n <= rm_ir::NOTE_MAX => Note::On(n),
        _ => Note::None,
    }
}
