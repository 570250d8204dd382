//! AHX / Hively decoder.
//!
//! AHX stores no PCM at all: four voices play 3-byte track entries
//! (packed note, instrument, command) through synthesis instruments
//! built from a wavelength, an ADSR shape and a playlist program. Each
//! position pairs every voice with a (track, transpose) tuple, so one
//! canonical pattern is baked per position with the transpose applied.

use rm_ir::{Cell, Effect, Envelope, Instrument, Note, Pattern, Song, SourceFormat, VolumeCommand};

use crate::reader::ByteReader;
use crate::FormatError;

const CHANNELS: u8 = 4;
const NOTE_TOP: u8 = 60;

pub fn detect(data: &[u8]) -> bool {
    data.len() >= 14 && (&data[..3] == b"THX" || &data[..3] == b"HVL") && data[3] <= 1
}

pub fn load_ahx(data: &[u8]) -> Result<Song, FormatError> {
    if !detect(data) {
        return Err(FormatError::InvalidHeader);
    }
    if &data[..3] == b"HVL" {
        // Hively's multiplexed voices decode through the AHX path; only
        // the first four voices are kept.
        log::warn!("HVL file: decoding the AHX-compatible subset");
    }

    let mut r = ByteReader::new(data);
    r.skip(3)?;
    let _version = r.read_u8()?;
    let names_offset = r.read_u16_be()? as usize;
    let len_flags = r.read_u16_be()?;
    // Bit 15 set means track 0 was left out of the file and plays as
    // silence; cleared means the track block starts with a stored track 0.
    let track0_stored = len_flags & 0x8000 == 0;
    let position_count = (len_flags & 0x0FFF) as usize;
    let restart = r.read_u16_be()?;
    let track_length = r.read_u8()?;
    let track_count = r.read_u8()? as usize;
    let instrument_count = r.read_u8()? as usize;
    let subsong_count = r.read_u8()? as usize;

    if position_count == 0 || position_count > 999 {
        return Err(FormatError::Corrupt("position count out of range"));
    }
    if track_length == 0 || track_length > 64 || instrument_count > 63 {
        return Err(FormatError::Corrupt("header counts out of range"));
    }

    r.skip(subsong_count * 2)?;

    // Position list: (track, transpose) per voice.
    let mut position_list = Vec::with_capacity(position_count);
    for _ in 0..position_count {
        let mut voices = [(0u8, 0i8); CHANNELS as usize];
        for v in voices.iter_mut() {
            v.0 = r.read_u8()?;
            v.1 = r.read_i8()?;
        }
        position_list.push(voices);
    }

    // Track table. Track 0 may be omitted from the file and reads as
    // silence everywhere.
    let rows = track_length as usize;
    let stored = track_count + if track0_stored { 1 } else { 0 };
    let mut tracks: Vec<Vec<[u8; 3]>> = vec![vec![[0; 3]; rows]];
    for _ in 0..stored {
        let mut track = Vec::with_capacity(rows);
        for _ in 0..rows {
            let b = r.read_bytes(3)?;
            track.push([b[0], b[1], b[2]]);
        }
        tracks.push(track);
    }
    if track0_stored {
        tracks.remove(0);
    }

    // Instruments, then the name block.
    let mut instruments = Vec::with_capacity(instrument_count);
    for idx in 0..instrument_count {
        instruments.push(parse_instrument(&mut r, idx)?);
    }

    let title = read_name(data, names_offset);
    let mut names_pos = names_offset + title.len() + 1;
    for inst in instruments.iter_mut() {
        let name = read_name(data, names_pos);
        names_pos += name.len() + 1;
        if !name.is_empty() {
            inst.name.clear();
            let _ = inst.name.try_push_str(&name);
        }
    }

    let mut song = Song::with_channels(&title, SourceFormat::Ahx, CHANNELS);
    song.initial_speed = 6;
    song.initial_tempo = 125;
    song.restart_position = restart.min(position_count as u16 - 1).min(255) as u8;
    song.instruments = instruments;

    // One pattern per position; the per-voice transpose is folded into
    // the baked notes.
    for (pos_idx, voices) in position_list.iter().enumerate() {
        if pos_idx >= 255 {
            log::warn!("AHX position list truncated to 255 patterns");
            break;
        }
        let mut pattern = Pattern::new(track_length as u16, CHANNELS);
        for (voice, &(track_no, transpose)) in voices.iter().enumerate() {
            let track = match tracks.get(track_no as usize) {
                Some(t) => t,
                None => continue, // out-of-range track plays silence
            };
            for (row, entry) in track.iter().enumerate() {
                *pattern.cell_mut(row as u16, voice as u8) = decode_entry(*entry, transpose);
            }
        }
        song.patterns.push(pattern);
        song.positions.push(pos_idx as u8);
    }

    Ok(song)
}

/// Unpack one 3-byte track entry: 6-bit note, 6-bit instrument, 4-bit
/// command, 8-bit parameter.
fn decode_entry(entry: [u8; 3], transpose: i8) -> Cell {
    let note = entry[0] >> 2;
    let instrument = ((entry[0] & 0x03) << 4) | (entry[1] >> 4);
    let command = entry[1] & 0x0F;
    let param = entry[2];

    Cell {
        note: transpose_note(note, transpose),
        instrument,
        volume: VolumeCommand::None,
        effect: ahx_effect(command, param),
        effect2: Effect::None,
    }
}

/// AHX notes run 1-60; the transpose shifts within the canonical 1-96
/// range and clamps at the edges.
fn transpose_note(note: u8, transpose: i8) -> Note {
    if note == 0 || note > NOTE_TOP {
        return Note::None;
    }
    let shifted = (note as i16 + transpose as i16).clamp(1, rm_ir::NOTE_MAX as i16);
    Note::On(shifted as u8)
}

fn ahx_effect(command: u8, param: u8) -> Effect {
    match command {
        0x0 if param == 0 => Effect::None,
        0x0 => Effect::SetPan(param),
        0x1 => Effect::PortaUp(param),
        0x2 => Effect::PortaDown(param),
        0x3 => Effect::TonePorta(param),
        0x4 => Effect::SetVibratoWaveform(param & 0x0F),
        0x5 | 0xA => Effect::VolumeSlide(crate::effect::param_to_slide(param)),
        0xB => Effect::PositionJump(param),
        0xC => Effect::SetVolume(param.min(64)),
        0xD => Effect::PatternBreak(((param >> 4) * 10 + (param & 0x0F)).min(63)),
        0xE => crate::effect::parse_protracker_extended(param),
        0xF => Effect::SetSpeed(param),
        _ => {
            log::debug!("AHX command {:X}{:02X} has no canonical mapping", command, param);
            Effect::None
        }
    }
}

/// One AHX instrument: a 22-byte fixed block then a playlist of 4-byte
/// steps. The playlist program is not simulated; the ADSR and wavelength
/// carry over as a synth instrument.
fn parse_instrument(r: &mut ByteReader, index: usize) -> Result<Instrument, FormatError> {
    let fixed = r.read_bytes(22)?;
    let volume = fixed[0].min(64);
    let wave_length = fixed[1] & 0x07;
    let attack_frames = fixed[2];
    let attack_volume = fixed[3];
    let decay_frames = fixed[4];
    let decay_volume = fixed[5];
    let sustain_frames = fixed[6];
    let release_frames = fixed[7];
    let release_volume = fixed[8];
    let playlist_length = fixed[21] as usize;

    r.skip(playlist_length * 4)?;

    let mut adsr = Envelope::new();
    let mut tick = 0u16;
    adsr.add_point(0, 0);
    tick += attack_frames as u16;
    adsr.add_point(tick, (attack_volume.min(64)) as i8);
    tick += decay_frames as u16;
    adsr.add_point(tick, (decay_volume.min(64)) as i8);
    tick += sustain_frames as u16;
    adsr.add_point(tick, (decay_volume.min(64)) as i8);
    tick += release_frames as u16;
    adsr.add_point(tick, (release_volume.min(64)) as i8);
    adsr.enabled = true;

    let mut inst = Instrument::synth(&format!("Instrument {}", index + 1), 0, volume);
    if let rm_ir::InstrumentKind::Synth {
        wave_length: wl,
        adsr: slot,
        ..
    } = &mut inst.kind
    {
        *wl = wave_length;
        *slot = Some(adsr);
    }
    Ok(inst)
}

/// NUL-terminated name at an absolute offset; out-of-range reads give
/// an empty string rather than an error, names being cosmetic.
fn read_name(data: &[u8], offset: usize) -> String {
    if offset >= data.len() {
        return String::new();
    }
    let tail = &data[offset..];
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}
