//! Future Composer SMOD / FC14 decoder.
//!
//! FC patterns carry no volumes and no final pitches; every cell names a
//! volume program, and the program pair (volume + frequency) is run in
//! the `fc_macro` VM for the row's tick count. The decoder simulates all
//! four voices through the whole sequence and bakes the results into
//! canonical cells. Instruments are materialized lazily per waveform
//! index through a cache scoped to the single decode call.

use std::collections::HashMap;

use rm_ir::{
    Cell, Effect, Instrument, LoopType, Note, Pattern, Sample, SampleData, Song, SourceFormat,
    VolumeCommand,
};

use crate::fc_macro::{MacroBank, VoiceSim, MACRO_LEN, PACKED_BASE};
use crate::normalize;
use crate::reader::ByteReader;
use crate::FormatError;

const CHANNELS: u8 = 4;
const PATTERN_ROWS: u16 = 32;
const PATTERN_BYTES: usize = 64;
const SEQ_STEP_BYTES: usize = 13;
const SAMPLE_SLOTS: usize = 10;
const NOTE_OFF_RAW: u8 = 0x49;

/// Built-in wavetable counts per version.
const SMOD_WAVETABLES: u16 = 47;
const FC14_WAVETABLES: u16 = 80;

pub fn detect(data: &[u8]) -> bool {
    data.len() >= 100 && (&data[..4] == b"SMOD" || &data[..4] == b"FC14")
}

struct Layout<'a> {
    fc14: bool,
    sequences: &'a [u8],
    patterns: &'a [u8],
    freq_bank: MacroBank<'a>,
    vol_bank: MacroBank<'a>,
    sample_headers: Vec<(usize, u32, u32)>, // (frames, loop start, loop len)
    sample_data: &'a [u8],
    wavetable_lengths: &'a [u8],
    wavetable_data: &'a [u8],
}

pub fn load_fc(data: &[u8]) -> Result<Song, FormatError> {
    if !detect(data) {
        return Err(FormatError::InvalidHeader);
    }
    let layout = parse_layout(data)?;

    let mut song = Song::with_channels("", SourceFormat::FutureComposer, CHANNELS);
    song.initial_speed = 3;
    song.initial_tempo = 125;

    let mut cache = InstrumentCache::new();
    let mut voices = [
        VoiceSim::new(),
        VoiceSim::new(),
        VoiceSim::new(),
        VoiceSim::new(),
    ];
    let mut speed = 3u8;

    let step_count = layout.sequences.len() / SEQ_STEP_BYTES;
    for step_idx in 0..step_count.min(255) {
        let step = &layout.sequences[step_idx * SEQ_STEP_BYTES..(step_idx + 1) * SEQ_STEP_BYTES];
        if step[12] != 0 {
            speed = step[12];
        }

        let mut pattern = Pattern::new(PATTERN_ROWS, CHANNELS);
        for voice_idx in 0..CHANNELS as usize {
            let pattern_no = step[voice_idx * 3] as usize;
            let transpose = step[voice_idx * 3 + 1] as i8;
            let sound_transpose = step[voice_idx * 3 + 2] as i8;
            bake_voice(
                &layout,
                &mut voices[voice_idx],
                &mut cache,
                &mut song.instruments,
                &mut pattern,
                voice_idx as u8,
                pattern_no,
                transpose,
                sound_transpose,
                speed,
            );
        }
        song.patterns.push(pattern);
        song.positions.push(step_idx as u8);
    }

    if song.patterns.is_empty() {
        return Err(FormatError::Corrupt("empty sequence table"));
    }
    song.initial_speed = speed.clamp(1, 31);
    Ok(song)
}

fn parse_layout(data: &[u8]) -> Result<Layout, FormatError> {
    let mut r = ByteReader::new(data);
    let fc14 = &data[..4] == b"FC14";
    r.skip(4)?;
    let seq_len = r.read_u32_be()? as usize;
    let pat_offset = r.read_u32_be()? as usize;
    let pat_len = r.read_u32_be()? as usize;
    let freq_offset = r.read_u32_be()? as usize;
    let freq_len = r.read_u32_be()? as usize;
    let vol_offset = r.read_u32_be()? as usize;
    let vol_len = r.read_u32_be()? as usize;
    let sample_offset = r.read_u32_be()? as usize;
    let wave_offset = r.read_u32_be()? as usize;

    let mut sample_headers = Vec::with_capacity(SAMPLE_SLOTS);
    for _ in 0..SAMPLE_SLOTS {
        let words = r.read_u16_be()? as usize;
        let loop_start = r.read_u16_be()? as u32;
        let loop_words = r.read_u16_be()? as u32;
        sample_headers.push((words * 2, loop_start, loop_words * 2));
    }

    let (wavetable_lengths, seq_start) = if fc14 {
        (r.read_bytes(80)?, 180usize)
    } else {
        (&[][..], 100usize)
    };

    let slice = |off: usize, len: usize| -> Result<&[u8], FormatError> {
        let end = off.checked_add(len).ok_or(FormatError::Corrupt("offset overflow"))?;
        data.get(off..end).ok_or(FormatError::UnexpectedEof)
    };

    if seq_len < SEQ_STEP_BYTES {
        return Err(FormatError::Corrupt("empty sequence table"));
    }

    Ok(Layout {
        fc14,
        sequences: slice(seq_start, seq_len)?,
        patterns: slice(pat_offset, pat_len)?,
        freq_bank: MacroBank::new(slice(freq_offset, freq_len)?),
        vol_bank: MacroBank::new(slice(vol_offset, vol_len)?),
        sample_headers,
        sample_data: data.get(sample_offset..).unwrap_or(&[]),
        wavetable_lengths,
        wavetable_data: if fc14 {
            data.get(wave_offset..).unwrap_or(&[])
        } else {
            &[]
        },
    })
}

/// Run one voice through one 32-row pattern and write the baked cells.
#[allow(clippy::too_many_arguments)]
fn bake_voice(
    layout: &Layout,
    voice: &mut VoiceSim,
    cache: &mut InstrumentCache,
    instruments: &mut Vec<Instrument>,
    out: &mut Pattern,
    channel: u8,
    pattern_no: usize,
    transpose: i8,
    sound_transpose: i8,
    speed: u8,
) {
    let pattern_bytes = pattern_no
        .checked_mul(PATTERN_BYTES)
        .and_then(|start| layout.patterns.get(start..start + PATTERN_BYTES));
    let pattern_bytes = match pattern_bytes {
        Some(p) => p,
        None => {
            log::warn!("FC pattern {} out of range, voice plays silence", pattern_no);
            return;
        }
    };

    for row in 0..PATTERN_ROWS {
        let note_raw = pattern_bytes[row as usize * 2];
        let info = pattern_bytes[row as usize * 2 + 1];
        let mut cell = Cell::empty();
        let mut triggered = false;

        if note_raw == NOTE_OFF_RAW {
            cell.note = Note::Off;
        } else if note_raw != 0 && note_raw < NOTE_OFF_RAW {
            let note = (note_raw as i16 + transpose as i16).clamp(1, rm_ir::NOTE_MAX as i16) as u8;
            let vol_seq = (info & 0x3F) as usize + sound_transpose.max(0) as usize;
            let freq_seq = layout
                .vol_bank
                .program(vol_seq)
                .map(|p| p[1] as usize)
                .unwrap_or(0);
            voice.trigger(note, freq_seq, vol_seq, &layout.vol_bank);
            cell.note = Note::On(note);
            triggered = true;
        }

        // Portamento flag rides the info byte's top bits; the speed is
        // signed, top bit selecting direction.
        if info & 0xC0 != 0 {
            let porta = ((info >> 6) & 0x03) as i8;
            voice.set_portamento(if info & 0x80 != 0 { -porta } else { porta });
            cell.effect = Effect::TonePorta(porta as u8);
        } else {
            voice.set_portamento(0);
        }

        let mut last = None;
        for _ in 0..speed.max(1) {
            last = Some(voice.tick(&layout.freq_bank, &layout.vol_bank));
        }
        if let Some(t) = last {
            if triggered {
                let slot = cache.instrument_for(t.waveform, layout, instruments);
                cell.instrument = slot + 1;
            }
            cell.volume = VolumeCommand::Volume(t.volume.min(64));
            if cell.effect == Effect::None && t.pitch_offset != 0 && !triggered {
                // Bend/vibrato drift approximated as a portamento.
                cell.effect = if t.pitch_offset > 0 {
                    Effect::PortaUp(t.pitch_offset.unsigned_abs().min(255) as u8)
                } else {
                    Effect::PortaDown(t.pitch_offset.unsigned_abs().min(255) as u8)
                };
            }
        }

        *out.cell_mut(row, channel) = cell;
    }
}

// --- instrument materialization --------------------------------------

/// Lazily builds one instrument per waveform index, scoped to a single
/// decode call.
struct InstrumentCache {
    slots: HashMap<u16, u8>,
}

impl InstrumentCache {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// Instrument slot (0-based) for a waveform index, creating it on
    /// first use.
    fn instrument_for(
        &mut self,
        waveform: u16,
        layout: &Layout,
        instruments: &mut Vec<Instrument>,
    ) -> u8 {
        if let Some(&slot) = self.slots.get(&waveform) {
            return slot;
        }
        let inst = build_instrument(waveform, layout);
        let slot = instruments.len().min(254) as u8;
        instruments.push(inst);
        self.slots.insert(waveform, slot);
        slot
    }
}

fn build_instrument(waveform: u16, layout: &Layout) -> Instrument {
    let wavetables = if layout.fc14 { FC14_WAVETABLES } else { SMOD_WAVETABLES };

    if waveform >= PACKED_BASE {
        // Packed sample indices share the ten PCM slots.
        let slot = ((waveform - PACKED_BASE) as usize) % SAMPLE_SLOTS;
        return sample_instrument(layout, slot, &format!("Packed {}", waveform - PACKED_BASE));
    }
    if (waveform as usize) < SAMPLE_SLOTS {
        return sample_instrument(layout, waveform as usize, &format!("Sample {}", waveform));
    }
    let table = waveform - SAMPLE_SLOTS as u16;
    if table < wavetables {
        if layout.fc14 {
            return wavetable_instrument(layout, table as usize);
        }
        // SMOD wavetables are built into the player; keep them as synth
        // references so an exporter can render them.
        return Instrument::synth(&format!("Wave {}", table), table as u8, 64);
    }

    log::warn!("FC waveform index {} out of range, using silence", waveform);
    normalize::placeholder_instrument(&format!("Wave {}", waveform))
}

/// PCM slot -> sampled instrument. Sample blocks sit back to back after
/// the sample offset, lengths from the ten fixed headers.
fn sample_instrument(layout: &Layout, slot: usize, name: &str) -> Instrument {
    let mut start = 0usize;
    for h in &layout.sample_headers[..slot] {
        start += h.0;
    }
    let (frames, loop_start, loop_len) = layout.sample_headers[slot];
    let end = (start + frames).min(layout.sample_data.len());
    let pcm = layout.sample_data.get(start..end).unwrap_or(&[]);

    let mut sample = Sample::new(name);
    sample.data = SampleData::Mono8(normalize::signed8(pcm));
    sample.c4_speed = 8363;
    if loop_len > 2 {
        sample.loop_start = loop_start;
        sample.loop_end = loop_start + loop_len;
        sample.loop_type = LoopType::Forward;
    }
    sample.sanitize_loop();
    Instrument::sampled(name, sample)
}

/// FC14 wavetable -> short looped sample. Lengths are in words; the
/// table data is sequential in declaration order.
fn wavetable_instrument(layout: &Layout, table: usize) -> Instrument {
    let mut start = 0usize;
    for &len in layout.wavetable_lengths.iter().take(table) {
        start += len as usize * 2;
    }
    let frames = layout
        .wavetable_lengths
        .get(table)
        .map(|&l| l as usize * 2)
        .unwrap_or(0);
    let end = (start + frames).min(layout.wavetable_data.len());
    let pcm = layout.wavetable_data.get(start..end).unwrap_or(&[]);

    let name = format!("Wavetable {}", table);
    let mut sample = Sample::new(&name);
    sample.data = SampleData::Mono8(normalize::signed8(pcm));
    sample.c4_speed = 8363;
    if !pcm.is_empty() {
        sample.loop_start = 0;
        sample.loop_end = pcm.len() as u32;
        sample.loop_type = LoopType::Forward;
    }
    Instrument::sampled(&name, sample)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fc_macro::{OP_END, OP_SET_WAVE};

    /// SMOD file: one sequence step, one pattern, one volume/frequency
    /// program pair, one PCM sample.
    pub(crate) fn build_test_fc() -> Vec<u8> {
        let seq_start = 100usize;
        let seq_len = SEQ_STEP_BYTES;
        let pat_offset = seq_start + seq_len;
        let pat_len = PATTERN_BYTES;
        let freq_offset = pat_offset + pat_len;
        let freq_len = MACRO_LEN;
        let vol_offset = freq_offset + freq_len;
        let vol_len = MACRO_LEN;
        let sample_offset = vol_offset + vol_len;

        let mut d = Vec::new();
        d.extend_from_slice(b"SMOD");
        d.extend_from_slice(&(seq_len as u32).to_be_bytes());
        d.extend_from_slice(&(pat_offset as u32).to_be_bytes());
        d.extend_from_slice(&(pat_len as u32).to_be_bytes());
        d.extend_from_slice(&(freq_offset as u32).to_be_bytes());
        d.extend_from_slice(&(freq_len as u32).to_be_bytes());
        d.extend_from_slice(&(vol_offset as u32).to_be_bytes());
        d.extend_from_slice(&(vol_len as u32).to_be_bytes());
        d.extend_from_slice(&(sample_offset as u32).to_be_bytes());
        d.extend_from_slice(&0u32.to_be_bytes()); // SMOD: no wavetable block
        // Ten sample headers; slot 0 has 4 frames (2 words), no loop
        d.extend_from_slice(&2u16.to_be_bytes());
        d.extend_from_slice(&0u16.to_be_bytes());
        d.extend_from_slice(&0u16.to_be_bytes());
        d.extend_from_slice(&[0u8; 9 * 6]);
        assert_eq!(d.len(), seq_start);

        // Sequence: all voices pattern 0, no transpose, speed 3
        d.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3]);

        // Pattern 0: row 0 note 25 instrument 0; row 2 note off
        let mut pat = [0u8; PATTERN_BYTES];
        pat[0] = 25;
        pat[1] = 0;
        pat[4] = NOTE_OFF_RAW;
        d.extend_from_slice(&pat);

        // Frequency program 0: select waveform 0 (sample slot 0), end
        let mut freq = vec![OP_SET_WAVE, 0];
        freq.resize(MACRO_LEN, OP_END);
        d.extend_from_slice(&freq);

        // Volume program 0: header (speed 3, frq 0, no vibrato), vol 48
        let mut vol = vec![3, 0, 0, 0, 0, 48];
        vol.resize(MACRO_LEN, OP_END);
        d.extend_from_slice(&vol);

        // Sample PCM
        d.extend_from_slice(&[10, 20, 0xF0, 5]);
        d
    }

    #[test]
    fn detect_accepts_both_versions() {
        assert!(detect(&build_test_fc()));
        let mut fc14 = build_test_fc();
        fc14[..4].copy_from_slice(b"FC14");
        assert!(detect(&fc14)); // layout differs but the tag matches
        assert!(!detect(&vec![0u8; 256]));
    }

    #[test]
    fn bakes_pattern_from_vm() {
        let song = load_fc(&build_test_fc()).unwrap();
        song.check_invariants().unwrap();
        assert_eq!(song.num_channels, 4);
        assert_eq!(song.patterns.len(), 1);
        assert_eq!(song.patterns[0].rows, 32);

        let c = song.patterns[0].cell(0, 0);
        assert_eq!(c.note, Note::On(25));
        assert_eq!(c.instrument, 1);
        // Volume program set 48 during the row's ticks
        assert_eq!(c.volume, VolumeCommand::Volume(48));

        assert_eq!(song.patterns[0].cell(2, 0).note, Note::Off);
    }

    #[test]
    fn waveform_instruments_are_memoized() {
        let song = load_fc(&build_test_fc()).unwrap();
        // All four voices trigger the same waveform; one instrument.
        assert_eq!(song.instruments.len(), 1);
        let s = song.instruments[0].first_sample().unwrap();
        assert_eq!(s.data, SampleData::Mono8(vec![10, 20, -16, 5]));
    }

    #[test]
    fn decode_is_deterministic() {
        let data = build_test_fc();
        let a = load_fc(&data).unwrap();
        let b = load_fc(&data).unwrap();
        assert_eq!(a.patterns, b.patterns);
        assert_eq!(a.instruments, b.instruments);
    }

    #[test]
    fn out_of_range_pattern_plays_silence() {
        let mut data = build_test_fc();
        data[100] = 9; // voice 0 pattern index past the pattern block
        let song = load_fc(&data).unwrap();
        assert!(song.patterns[0].cell(0, 0).is_empty());
        assert_eq!(song.patterns[0].cell(0, 1).note, Note::On(25));
    }

    #[test]
    fn truncated_file_does_not_panic() {
        let data = build_test_fc();
        for cut in [4, 40, 99, 110, 180, data.len() - 2] {
            let _ = load_fc(&data[..cut]);
        }
    }
}
