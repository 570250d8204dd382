//! Impulse Tracker IT decoder.
//!
//! IT files address instruments, samples and patterns through u32 offset
//! tables after the order list. Pattern rows use a cached channel-mask
//! packing: each channel remembers its last mask byte and last written
//! note/instrument/volume/command, and later rows replay them with
//! single-bit references.

use rm_ir::{
    AutoVibrato, Cell, Effect, Envelope, Instrument, InstrumentKind, LoopType, Note, Pattern,
    Sample, SampleData, Song, SourceFormat, VolumeCommand,
};

use crate::compress;
use crate::effect::{parse_it, parse_it_volume};
use crate::normalize;
use crate::reader::{magic_at, ByteReader};
use crate::FormatError;

const NOTE_CUT: u8 = 254;
const NOTE_OFF: u8 = 255;

pub fn detect(data: &[u8]) -> bool {
    magic_at(data, 0, b"IMPM")
}

pub fn load_it(data: &[u8]) -> Result<Song, FormatError> {
    if !detect(data) {
        return Err(FormatError::InvalidHeader);
    }

    let mut r = ByteReader::new(data);
    r.skip(4)?;
    let title = r.read_string(26)?;
    r.skip(2)?; // pattern row highlight
    let ord_num = r.read_u16_le()? as usize;
    let ins_num = r.read_u16_le()? as usize;
    let smp_num = r.read_u16_le()? as usize;
    let pat_num = r.read_u16_le()? as usize;
    let _cwtv = r.read_u16_le()?;
    let _cmwt = r.read_u16_le()?;
    let flags = r.read_u16_le()?;
    let _special = r.read_u16_le()?;
    let _global_vol = r.read_u8()?;
    let _mix_vol = r.read_u8()?;
    let speed = r.read_u8()?;
    let tempo = r.read_u8()?;
    r.skip(2)?; // pan separation, pitch wheel depth
    r.skip(2)?; // message length
    r.skip(8)?; // message offset + reserved

    if ord_num > 256 || ins_num > 256 || smp_num > 400 || pat_num > 256 {
        return Err(FormatError::Corrupt("header counts out of range"));
    }

    let channel_pan = r.read_bytes(64)?.to_vec();
    let channel_vol = r.read_bytes(64)?.to_vec();
    let orders = r.read_bytes(ord_num)?.to_vec();

    let mut ins_offsets = Vec::with_capacity(ins_num);
    for _ in 0..ins_num {
        ins_offsets.push(r.read_u32_le()? as usize);
    }
    let mut smp_offsets = Vec::with_capacity(smp_num);
    for _ in 0..smp_num {
        smp_offsets.push(r.read_u32_le()? as usize);
    }
    let mut pat_offsets = Vec::with_capacity(pat_num);
    for _ in 0..pat_num {
        pat_offsets.push(r.read_u32_le()? as usize);
    }

    let instrument_mode = flags & 0x04 != 0;

    // Decode samples first; instrument mode wraps them afterwards.
    let mut samples = Vec::with_capacity(smp_num);
    for (idx, &off) in smp_offsets.iter().enumerate() {
        match parse_sample(data, off) {
            Ok(s) => samples.push(s),
            Err(e) => {
                log::warn!("IT sample {} failed ({}), substituting silence", idx, e);
                samples.push(normalize::placeholder_sample(&format!("Sample {}", idx + 1)));
            }
        }
    }

    let mut patterns = Vec::with_capacity(pat_num);
    let mut max_channel = 0u8;
    for (idx, &off) in pat_offsets.iter().enumerate() {
        match parse_pattern(data, off) {
            Ok((p, high)) => {
                max_channel = max_channel.max(high);
                patterns.push(p);
            }
            Err(e) => {
                log::warn!("IT pattern {} failed ({}), substituting empty", idx, e);
                patterns.push(Pattern::new(64, 0));
            }
        }
    }
    let num_channels = (max_channel + 1).clamp(1, 64);

    let mut song = Song::with_channels(&title, SourceFormat::It, num_channels);
    song.initial_speed = if speed == 0 { 6 } else { speed };
    song.initial_tempo = if tempo < 32 { 125 } else { tempo };
    song.linear_periods = flags & 0x08 != 0;

    for ch in 0..num_channels as usize {
        let pan = channel_pan[ch];
        let state = &mut song.channels[ch];
        if pan & 0x80 != 0 {
            state.muted = true;
        }
        let pan = pan & 0x7F;
        state.initial_pan = if pan <= 64 {
            ((pan as i16) * 2 - 64) as i8
        } else {
            0 // surround and out-of-range values play center
        };
        state.initial_vol = channel_vol[ch].min(64);
    }

    // Patterns were sized by their own content; widen to the song width.
    for p in &mut patterns {
        widen_pattern(p, num_channels);
    }
    song.patterns = patterns;

    if instrument_mode {
        for (idx, &off) in ins_offsets.iter().enumerate() {
            match parse_instrument(data, off, &samples) {
                Ok(inst) => song.instruments.push(inst),
                Err(e) => {
                    log::warn!("IT instrument {} failed ({}), substituting silence", idx, e);
                    song.instruments
                        .push(normalize::placeholder_instrument(&format!("Instrument {}", idx + 1)));
                }
            }
        }
    } else {
        // Sample mode: each sample is its own instrument.
        for s in samples {
            let name = s.name.to_string();
            song.instruments.push(Instrument::sampled(&name, s));
        }
    }

    song.positions = orders
        .iter()
        .copied()
        .filter(|&o| o < pat_num.min(255) as u8)
        .collect();

    Ok(song)
}

fn widen_pattern(p: &mut Pattern, channels: u8) {
    if p.channels == channels {
        return;
    }
    let mut wide = Pattern::new(p.rows, channels);
    for row in 0..p.rows {
        for ch in 0..p.channels.min(channels) {
            *wide.cell_mut(row, ch) = *p.cell(row, ch);
        }
    }
    *p = wide;
}

// --- samples ---------------------------------------------------------

fn parse_sample(data: &[u8], offset: usize) -> Result<Sample, FormatError> {
    let mut r = ByteReader::new(data);
    r.seek(offset)?;
    r.expect_magic(b"IMPS")?;
    r.skip(12)?; // DOS filename
    r.skip(1)?;
    let _global_vol = r.read_u8()?;
    let flags = r.read_u8()?;
    let volume = r.read_u8()?.min(64);
    let name = r.read_string(26)?;
    let convert = r.read_u8()?;
    let dfp = r.read_u8()?;
    let length = r.read_u32_le()? as usize;
    let loop_start = r.read_u32_le()?;
    let loop_end = r.read_u32_le()?;
    let c5_speed = r.read_u32_le()?;
    let _sustain_start = r.read_u32_le()?;
    let _sustain_end = r.read_u32_le()?;
    let pointer = r.read_u32_le()? as usize;
    let vib_speed = r.read_u8()?;
    let vib_depth = r.read_u8()?;
    let vib_rate = r.read_u8()?;
    let vib_type = r.read_u8()?;

    let mut sample = Sample::new(&name);
    sample.default_volume = volume;
    sample.c4_speed = if c5_speed == 0 { 8363 } else { c5_speed };
    sample.loop_start = loop_start;
    sample.loop_end = loop_end;
    sample.loop_type = match (flags & 0x10 != 0, flags & 0x40 != 0) {
        (true, true) => LoopType::PingPong,
        (true, false) => LoopType::Forward,
        _ => LoopType::None,
    };
    if dfp & 0x80 != 0 {
        sample.default_pan = (((dfp & 0x7F).min(64) as i16) * 2 - 64) as i8;
    }
    if vib_depth > 0 {
        sample.vibrato = Some(AutoVibrato {
            speed: vib_speed,
            depth: vib_depth,
            sweep: vib_rate,
            waveform: vib_type,
        });
    }

    let has_pcm = flags & 0x01 != 0 && length > 0 && pointer > 0;
    if !has_pcm {
        return Ok(sample);
    }
    if length > 16 * 1024 * 1024 {
        return Err(FormatError::Corrupt("sample length out of range"));
    }
    if pointer >= data.len() {
        return Err(FormatError::UnexpectedEof);
    }

    let sixteen_bit = flags & 0x02 != 0;
    let compressed = flags & 0x08 != 0;
    let signed = convert & 0x01 != 0;
    let it215 = convert & 0x04 != 0;
    let raw = &data[pointer..];

    sample.data = if compressed {
        if sixteen_bit {
            let mut pcm = compress::decompress_it_16bit(raw, length, it215)?;
            pcm.resize(length, 0);
            SampleData::Mono16(pcm)
        } else {
            let mut pcm = compress::decompress_it_8bit(raw, length, it215)?;
            pcm.resize(length, 0);
            SampleData::Mono8(pcm)
        }
    } else if sixteen_bit {
        let bytes = length * 2;
        let avail = &raw[..bytes.min(raw.len())];
        let mut pcm = if signed {
            normalize::signed16_le(avail)
        } else {
            normalize::unsigned16_le(avail)
        };
        pcm.resize(length, 0);
        SampleData::Mono16(pcm)
    } else {
        let avail = &raw[..length.min(raw.len())];
        let mut pcm = if signed {
            normalize::signed8(avail)
        } else {
            normalize::unsigned8(avail)
        };
        pcm.resize(length, 0);
        SampleData::Mono8(pcm)
    };

    sample.sanitize_loop();
    Ok(sample)
}

// --- instruments -----------------------------------------------------

fn parse_instrument(
    data: &[u8],
    offset: usize,
    samples: &[Sample],
) -> Result<Instrument, FormatError> {
    let mut r = ByteReader::new(data);
    r.seek(offset)?;
    r.expect_magic(b"IMPI")?;
    r.skip(12)?; // DOS filename
    r.skip(1)?;
    let _nna = r.read_u8()?;
    let _dct = r.read_u8()?;
    let _dca = r.read_u8()?;
    let fadeout = r.read_u16_le()?;
    r.skip(2)?; // pitch-pan separation + center
    let _global_vol = r.read_u8()?;
    let _default_pan = r.read_u8()?;
    r.skip(2)?; // random volume + pan variation
    r.skip(2)?; // tracker version
    let _num_samples = r.read_u8()?;
    r.skip(1)?;
    let name = r.read_string(26)?;
    r.skip(6)?; // filter + MIDI settings

    // 120 pairs of (transposed note, sample number). We keep the sample
    // assignment for our 96-note range and pull the referenced samples
    // into the instrument's own list.
    let table = r.read_bytes(240)?.to_vec();
    let mut used: Vec<u8> = Vec::new();
    let mut keymap = Box::new([0u8; 96]);
    for note in 0..96usize {
        let sample_no = table[note * 2 + 1];
        if sample_no == 0 {
            continue;
        }
        let src = (sample_no - 1) as usize;
        if src >= samples.len() {
            continue;
        }
        let local = match used.iter().position(|&u| u == sample_no) {
            Some(i) => i,
            None => {
                used.push(sample_no);
                used.len() - 1
            }
        };
        keymap[note] = local as u8;
    }

    let volume_envelope = parse_envelope(&mut r, true)?;
    let panning_envelope = parse_envelope(&mut r, false)?;
    let _pitch_envelope = parse_envelope(&mut r, false)?;

    let inst_samples: Vec<Sample> = if used.is_empty() {
        vec![Sample::new(&name)]
    } else {
        used.iter()
            .map(|&n| samples[(n - 1) as usize].clone())
            .collect()
    };

    let mut inst_name = arrayvec::ArrayString::new();
    let _ = inst_name.try_push_str(&name);
    Ok(Instrument {
        name: inst_name,
        kind: InstrumentKind::Sampled {
            samples: inst_samples,
            keymap: Some(keymap),
            volume_envelope,
            panning_envelope,
            fadeout,
        },
    })
}

/// One 82-byte IT envelope block. Volume envelopes store 0..64, the
/// others store signed -32..32.
fn parse_envelope(r: &mut ByteReader, volume: bool) -> Result<Option<Envelope>, FormatError> {
    let flags = r.read_u8()?;
    let num_points = r.read_u8()? as usize;
    let loop_start = r.read_u8()?;
    let loop_end = r.read_u8()?;
    let sustain_start = r.read_u8()?;
    let _sustain_end = r.read_u8()?;

    let mut points = Vec::with_capacity(25);
    for _ in 0..25 {
        let value = r.read_i8()?;
        let tick = r.read_u16_le()?;
        points.push((tick, value));
    }
    r.skip(1)?; // trailing pad

    if flags & 0x01 == 0 || num_points == 0 {
        return Ok(None);
    }

    let mut env = Envelope::new();
    for &(tick, value) in points.iter().take(num_points.min(25)) {
        let v = if volume { value.clamp(0, 64) } else { value.clamp(-64, 64) };
        env.add_point(tick, v);
    }
    env.enabled = true;
    if flags & 0x02 != 0 {
        env.loop_start = Some(loop_start);
        env.loop_end = Some(loop_end);
    }
    if flags & 0x04 != 0 {
        env.sustain = Some(sustain_start);
    }
    Ok(Some(env))
}

// --- patterns --------------------------------------------------------

#[derive(Clone, Copy, Default)]
struct ChannelCache {
    mask: u8,
    note: u8,
    instrument: u8,
    volume: u8,
    command: u8,
    param: u8,
}

/// Unpack one pattern. Returns the pattern (sized to its own highest
/// referenced channel) and that channel index.
fn parse_pattern(data: &[u8], offset: usize) -> Result<(Pattern, u8), FormatError> {
    if offset == 0 {
        return Ok((Pattern::new(64, 0), 0));
    }

    let mut r = ByteReader::new(data);
    r.seek(offset)?;
    let packed_len = r.read_u16_le()? as usize;
    let rows = r.read_u16_le()?.clamp(1, 200);
    r.skip(4)?;
    let packed = r.read_bytes(packed_len)?;
    let mut p = ByteReader::new(packed);

    let mut cache = [ChannelCache::default(); 64];
    let mut cells: Vec<[Cell; 64]> = vec![[Cell::empty(); 64]; rows as usize];
    let mut max_channel = 0u8;

    let mut row = 0usize;
    while row < rows as usize {
        if p.remaining() == 0 {
            break;
        }
        let channel_byte = p.read_u8()?;
        if channel_byte == 0 {
            row += 1;
            continue;
        }

        let ch = ((channel_byte - 1) & 63) as usize;
        if channel_byte & 0x80 != 0 {
            cache[ch].mask = p.read_u8()?;
        }
        let mask = cache[ch].mask;

        if mask & 0x01 != 0 {
            cache[ch].note = p.read_u8()?;
        }
        if mask & 0x02 != 0 {
            cache[ch].instrument = p.read_u8()?;
        }
        if mask & 0x04 != 0 {
            cache[ch].volume = p.read_u8()?;
        }
        if mask & 0x08 != 0 {
            cache[ch].command = p.read_u8()?;
            cache[ch].param = p.read_u8()?;
        }

        let c = &mut cells[row][ch];
        if mask & 0x11 != 0 {
            c.note = it_note(cache[ch].note);
        }
        if mask & 0x22 != 0 {
            c.instrument = cache[ch].instrument;
        }
        if mask & 0x44 != 0 {
            c.volume = parse_it_volume(cache[ch].volume);
        }
        if mask & 0x88 != 0 {
            c.effect = parse_it(cache[ch].command, cache[ch].param);
        }
        if !c.is_empty() {
            max_channel = max_channel.max(ch as u8);
        }
    }

    let mut pattern = Pattern::new(rows, max_channel + 1);
    for (row_idx, row_cells) in cells.iter().enumerate() {
        for ch in 0..=max_channel {
            *pattern.cell_mut(row_idx as u16, ch) = row_cells[ch as usize];
        }
    }
    Ok((pattern, max_channel))
}

/// IT counts semitones from C-0; the canonical range keeps 96 of its
/// 120 notes. 254 is a note cut, 255 a note off; both silence the voice.
fn it_note(raw: u8) -> Note {
    match raw {
        NOTE_CUT | NOTE_OFF => Note::Off,
        n if n < 96 => Note::On(n + 1),
        _ => Note::None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn push_env(d: &mut Vec<u8>, flags: u8, points: &[(u16, i8)]) {
        d.push(flags);
        d.push(points.len() as u8);
        d.extend_from_slice(&[0, 0, 0, 0]); // loop/sustain indices
        for i in 0..25 {
            let (tick, value) = points.get(i).copied().unwrap_or((0, 0));
            d.push(value as u8);
            d.extend_from_slice(&tick.to_le_bytes());
        }
        d.push(0);
    }

    /// Minimal instrument-mode IT: 1 order, 1 instrument, 1 compressed-free
    /// sample, 1 pattern using cached masks.
    pub(crate) fn build_test_it() -> Vec<u8> {
        let mut d = Vec::new();
        d.extend_from_slice(b"IMPM");
        let mut name = [0u8; 26];
        name[..5].copy_from_slice(b"impus");
        d.extend_from_slice(&name);
        d.extend_from_slice(&[4, 16]); // highlight
        d.extend_from_slice(&2u16.to_le_bytes()); // orders
        d.extend_from_slice(&1u16.to_le_bytes()); // instruments
        d.extend_from_slice(&1u16.to_le_bytes()); // samples
        d.extend_from_slice(&1u16.to_le_bytes()); // patterns
        d.extend_from_slice(&0x0214u16.to_le_bytes()); // cwtv
        d.extend_from_slice(&0x0200u16.to_le_bytes()); // cmwt
        d.extend_from_slice(&0x000Du16.to_le_bytes()); // flags: stereo+instruments+linear
        d.extend_from_slice(&0u16.to_le_bytes()); // special
        d.extend_from_slice(&[128, 48, 6, 125, 128, 0]); // gv, mv, speed, tempo, sep, pwd
        d.extend_from_slice(&0u16.to_le_bytes()); // msg length
        d.extend_from_slice(&[0u8; 8]); // msg offset + reserved
        d.extend_from_slice(&[32u8; 64]); // channel pans (center)
        d.extend_from_slice(&[64u8; 64]); // channel volumes
        d.extend_from_slice(&[0, 255]); // orders

        // offset tables: instrument, sample, pattern (filled below)
        let tables_at = d.len();
        d.extend_from_slice(&[0u8; 12]);

        // Instrument
        let ins_off = d.len() as u32;
        d.extend_from_slice(b"IMPI");
        d.extend_from_slice(&[0u8; 12]); // filename
        d.push(0);
        d.extend_from_slice(&[0, 0, 0]); // nna/dct/dca
        d.extend_from_slice(&256u16.to_le_bytes()); // fadeout
        d.extend_from_slice(&[0, 0]); // pps/ppc
        d.extend_from_slice(&[128, 32]); // gbv/dfp
        d.extend_from_slice(&[0, 0]); // random
        d.extend_from_slice(&0u16.to_le_bytes()); // trkvers
        d.push(1); // num samples
        d.push(0);
        let mut iname = [0u8; 26];
        iname[..4].copy_from_slice(b"pads");
        d.extend_from_slice(&iname);
        d.extend_from_slice(&[0u8; 6]); // filter/midi
        for _ in 0..120 {
            d.push(0); // note
            d.push(1); // sample 1
        }
        push_env(&mut d, 0x01, &[(0, 64), (40, 0)]); // volume envelope
        push_env(&mut d, 0x00, &[]); // panning
        push_env(&mut d, 0x00, &[]); // pitch

        // Sample header; PCM pointer filled after the pattern
        let smp_off = d.len() as u32;
        let smp_header_at = d.len();
        d.extend_from_slice(b"IMPS");
        d.extend_from_slice(&[0u8; 12]);
        d.push(0);
        d.push(64); // global vol
        d.push(0x01); // flags: has PCM, 8-bit, uncompressed
        d.push(50); // volume
        let mut sname = [0u8; 26];
        sname[..3].copy_from_slice(b"saw");
        d.extend_from_slice(&sname);
        d.push(0x01); // convert: signed
        d.push(0); // dfp
        d.extend_from_slice(&4u32.to_le_bytes()); // length
        d.extend_from_slice(&0u32.to_le_bytes()); // loop start
        d.extend_from_slice(&0u32.to_le_bytes()); // loop end
        d.extend_from_slice(&8363u32.to_le_bytes()); // c5 speed
        d.extend_from_slice(&[0u8; 8]); // sustain loop
        let pointer_at = d.len();
        d.extend_from_slice(&0u32.to_le_bytes()); // sample pointer
        d.extend_from_slice(&[0, 0, 0, 0]); // vibrato

        // Pattern: row 0 writes a full cell on channel 0 with a fresh
        // mask; row 1 replays note+instrument through the cached mask.
        let pat_off = d.len() as u32;
        let packed = [
            0x81, 0x0F, 60, 1, 32, 1, 0x0F, // ch1, mask F: note C-5, ins 1, vol 32, Axx 15
            0x00, // end row 0
            0x01, 62, 1, 40, 1, 0x0A, // ch1 cached mask: D-5
            0x00, // end row 1
        ];
        d.extend_from_slice(&(packed.len() as u16).to_le_bytes());
        d.extend_from_slice(&2u16.to_le_bytes()); // rows
        d.extend_from_slice(&[0u8; 4]);
        d.extend_from_slice(&packed);

        // PCM
        let pcm_at = d.len() as u32;
        d.extend_from_slice(&[1u8, 2, 0xFF, 0x80]);
        d[pointer_at..pointer_at + 4].copy_from_slice(&pcm_at.to_le_bytes());

        d[tables_at..tables_at + 4].copy_from_slice(&ins_off.to_le_bytes());
        d[tables_at + 4..tables_at + 8].copy_from_slice(&smp_off.to_le_bytes());
        d[tables_at + 8..tables_at + 12].copy_from_slice(&pat_off.to_le_bytes());
        let _ = smp_header_at;
        d
    }

    #[test]
    fn detect_needs_impm() {
        assert!(detect(&build_test_it()));
        assert!(!detect(b"IMPS not a module"));
    }

    #[test]
    fn decodes_header() {
        let song = load_it(&build_test_it()).unwrap();
        song.check_invariants().unwrap();
        assert_eq!(song.title.as_str(), "impus");
        assert!(song.linear_periods);
        assert_eq!(song.initial_speed, 6);
        assert_eq!(song.initial_tempo, 125);
        assert_eq!(song.positions, vec![0]);
        assert_eq!(song.channels[0].initial_pan, 0);
    }

    #[test]
    fn cached_mask_replays_layout() {
        let song = load_it(&build_test_it()).unwrap();
        let p = &song.patterns[0];
        assert_eq!(p.rows, 2);

        let c0 = p.cell(0, 0);
        assert_eq!(c0.note, Note::On(61)); // IT note 60
        assert_eq!(c0.instrument, 1);
        assert_eq!(c0.volume, VolumeCommand::Volume(32));
        assert_eq!(c0.effect, Effect::SetSpeed(15));

        // Row 1 reused the cached mask byte
        let c1 = p.cell(1, 0);
        assert_eq!(c1.note, Note::On(63));
        assert_eq!(c1.volume, VolumeCommand::Volume(40));
        assert_eq!(c1.effect, Effect::SetSpeed(10));
    }

    #[test]
    fn instrument_mode_builds_keymap_and_envelope() {
        let song = load_it(&build_test_it()).unwrap();
        assert_eq!(song.instruments.len(), 1);
        let inst = &song.instruments[0];
        assert_eq!(inst.name.as_str(), "pads");

        match &inst.kind {
            InstrumentKind::Sampled {
                samples,
                keymap,
                volume_envelope,
                fadeout,
                ..
            } => {
                assert_eq!(*fadeout, 256);
                assert_eq!(samples.len(), 1);
                assert_eq!(samples[0].name.as_str(), "saw");
                assert_eq!(
                    samples[0].data,
                    SampleData::Mono8(vec![1, 2, -1, -128])
                );
                assert!(keymap.is_some());
                let env = volume_envelope.as_ref().unwrap();
                assert_eq!(env.value_at(0), 64);
                assert_eq!(env.value_at(40), 0);
            }
            _ => panic!("expected sampled instrument"),
        }
    }

    #[test]
    fn note_mapping() {
        assert_eq!(it_note(0), Note::On(1));
        assert_eq!(it_note(95), Note::On(96));
        assert_eq!(it_note(96), Note::None);
        assert_eq!(it_note(NOTE_CUT), Note::Off);
        assert_eq!(it_note(NOTE_OFF), Note::Off);
    }

    #[test]
    fn truncated_file_does_not_panic() {
        let data = build_test_it();
        for cut in [4, 30, 64, 192, 250, 400, data.len() - 3] {
            let _ = load_it(&data[..cut]);
        }
    }
}
