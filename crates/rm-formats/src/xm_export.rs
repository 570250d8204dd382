//! FastTracker II XM encoder.
//!
//! Same contract as [`crate::mod_export`]: best-effort output, one
//! warning per lossy transformation, and a warning-free export decodes
//! back to the same song.

use rm_ir::{Envelope, Instrument, InstrumentKind, LoopType, Pattern, Sample, SampleData, Song};

use crate::effect::{encode_xm, encode_xm_volume};
use crate::export_util::{render_synth_cycle, suggested_name, Warnings};
use crate::normalize;
use crate::ExportResult;

const MAGIC: &[u8] = b"Extended Module: ";
const VERSION: u16 = 0x0104;
const HEADER_SIZE: u32 = 20 + 256;
const INSTRUMENT_SIZE: u32 = 263;
const SAMPLE_HEADER_SIZE: u32 = 40;

/// Encode a song as an XM file.
pub fn export_xm(song: &Song) -> ExportResult {
    let mut w = Warnings::new();
    let mut out = Vec::new();

    out.extend_from_slice(MAGIC);
    if song.title.len() > 20 {
        w.add("title truncated to 20 characters");
    }
    push_padded(&mut out, song.title.as_bytes(), 20);
    out.push(0x1A);
    push_padded(&mut out, b"retromod", 20);
    out.extend_from_slice(&VERSION.to_le_bytes());

    let num_channels = if song.num_channels > 32 {
        w.add(format!("channels 33-{} dropped, XM holds at most 32", song.num_channels));
        32
    } else {
        song.num_channels
    };

    let mut positions = song.positions.clone();
    if positions.len() > 256 {
        w.add("order list truncated to 256 positions");
        positions.truncate(256);
    }
    let num_patterns = if song.patterns.len() > 256 {
        w.add("patterns beyond 256 dropped");
        256
    } else {
        song.patterns.len()
    };
    let num_instruments = if song.instruments.len() > 128 {
        w.add("instruments beyond 128 dropped");
        128
    } else {
        song.instruments.len()
    };
    if song.initial_speed > 31 {
        w.add("initial speed above 31 clamped");
    }

    out.extend_from_slice(&HEADER_SIZE.to_le_bytes());
    out.extend_from_slice(&(positions.len() as u16).to_le_bytes());
    out.extend_from_slice(&(song.restart_position as u16).to_le_bytes());
    out.extend_from_slice(&(num_channels as u16).to_le_bytes());
    out.extend_from_slice(&(num_patterns as u16).to_le_bytes());
    out.extend_from_slice(&(num_instruments as u16).to_le_bytes());
    out.extend_from_slice(&(song.linear_periods as u16).to_le_bytes());
    out.extend_from_slice(&(song.initial_speed.clamp(1, 31) as u16).to_le_bytes());
    out.extend_from_slice(&(song.initial_tempo as u16).to_le_bytes());
    let mut order = [0u8; 256];
    order[..positions.len()].copy_from_slice(&positions);
    out.extend_from_slice(&order);

    for pattern in &song.patterns[..num_patterns] {
        write_pattern(&mut out, pattern, num_channels, &mut w);
    }
    for inst in &song.instruments[..num_instruments] {
        write_instrument(&mut out, inst, &mut w);
    }

    ExportResult {
        data: out,
        suggested_name: suggested_name(song, "xm"),
        warnings: w.into_vec(),
    }
}

fn push_padded(out: &mut Vec<u8>, bytes: &[u8], width: usize) {
    let n = bytes.len().min(width);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + width - n, 0);
}

fn write_pattern(out: &mut Vec<u8>, pattern: &Pattern, num_channels: u8, w: &mut Warnings) {
    let rows = pattern.rows.clamp(1, 256);
    if rows != pattern.rows {
        w.add("pattern row count clamped to the XM 1-256 range");
    }

    let mut packed = Vec::new();
    for row in 0..rows {
        for ch in 0..num_channels {
            let cell = if ch < pattern.channels {
                *pattern.cell(row, ch)
            } else {
                rm_ir::Cell::empty()
            };

            let note = cell.note.to_wire();
            let inst = cell.instrument;
            let vol = match encode_xm_volume(cell.volume) {
                Some(v) => v,
                None => {
                    w.add("volume-column command not representable in XM, dropped");
                    0
                }
            };
            let (eff, param) = match encode_xm(cell.effect) {
                Some(pair) => pair,
                None => {
                    w.add(format!("effect {} not representable in XM", cell.effect.name()));
                    (0, 0)
                }
            };
            if cell.effect2 != rm_ir::Effect::None {
                w.add("second effect column dropped");
            }

            if note != 0 && inst != 0 && vol != 0 && eff != 0 && param != 0 {
                packed.extend_from_slice(&[note, inst, vol, eff, param]);
            } else {
                let mut flag = 0x80u8;
                let mut fields = [0u8; 5];
                let mut n = 0;
                for (bit, value) in [(0x01, note), (0x02, inst), (0x04, vol), (0x08, eff), (0x10, param)] {
                    if value != 0 {
                        flag |= bit;
                        fields[n] = value;
                        n += 1;
                    }
                }
                packed.push(flag);
                packed.extend_from_slice(&fields[..n]);
            }
        }
    }

    out.extend_from_slice(&9u32.to_le_bytes()); // pattern header length
    out.push(0); // packing type
    out.extend_from_slice(&rows.to_le_bytes());
    out.extend_from_slice(&(packed.len() as u16).to_le_bytes());
    out.extend_from_slice(&packed);
}

fn write_instrument(out: &mut Vec<u8>, inst: &Instrument, w: &mut Warnings) {
    // Silent placeholders round-trip as sample-less instruments.
    if *inst == normalize::placeholder_instrument(inst.name.as_str()) {
        out.extend_from_slice(&29u32.to_le_bytes());
        push_padded(out, inst.name.as_bytes(), 22);
        out.push(0);
        out.extend_from_slice(&0u16.to_le_bytes());
        return;
    }

    let baked_sample;
    let baked_samples;
    let (samples, keymap, volume_envelope, panning_envelope, fadeout): (
        &[Sample],
        Option<&[u8; 96]>,
        Option<&Envelope>,
        Option<&Envelope>,
        u16,
    ) = match &inst.kind {
        InstrumentKind::Sampled {
            samples,
            keymap,
            volume_envelope,
            panning_envelope,
            fadeout,
        } => (
            samples,
            keymap.as_deref(),
            volume_envelope.as_ref(),
            panning_envelope.as_ref(),
            *fadeout,
        ),
        InstrumentKind::Synth {
            waveform,
            volume,
            wave_length,
            adsr,
        } => {
            w.add(format!(
                "synthesis instrument '{}' baked to a rendered waveform cycle",
                inst.name
            ));
            baked_sample = render_synth_cycle(*waveform, *wave_length, *volume);
            baked_samples = [baked_sample];
            (&baked_samples, None, adsr.as_ref(), None, 0)
        }
    };

    let num_samples = if samples.len() > 16 {
        w.add(format!("instrument '{}' holds more than 16 samples, extras dropped", inst.name));
        16
    } else {
        samples.len()
    };
    let samples = &samples[..num_samples];

    out.extend_from_slice(&INSTRUMENT_SIZE.to_le_bytes());
    push_padded(out, inst.name.as_bytes(), 22);
    out.push(0); // type
    out.extend_from_slice(&(num_samples as u16).to_le_bytes());
    out.extend_from_slice(&SAMPLE_HEADER_SIZE.to_le_bytes());
    match keymap {
        Some(map) => out.extend_from_slice(map),
        None => out.extend_from_slice(&[0u8; 96]),
    }

    let vol = envelope_fields(volume_envelope, w);
    let pan = envelope_fields(panning_envelope, w);
    out.extend_from_slice(&vol.points);
    out.extend_from_slice(&pan.points);
    out.push(vol.count);
    out.push(pan.count);
    out.push(vol.sustain);
    out.push(vol.loop_start);
    out.push(vol.loop_end);
    out.push(pan.sustain);
    out.push(pan.loop_start);
    out.push(pan.loop_end);
    out.push(vol.env_type);
    out.push(pan.env_type);

    // The decoder applies one auto-vibrato setting per instrument, so
    // the first sample's is authoritative.
    match samples.first().and_then(|s| s.vibrato) {
        Some(v) => out.extend_from_slice(&[v.waveform, v.sweep, v.depth, v.speed]),
        None => out.extend_from_slice(&[0u8; 4]),
    }
    out.extend_from_slice(&fadeout.to_le_bytes());
    out.resize(out.len() + (INSTRUMENT_SIZE as usize - 241), 0);

    for sample in samples {
        write_sample_header(out, sample, w);
    }
    for sample in samples {
        write_sample_data(out, sample);
    }
}

struct EnvelopeFields {
    points: [u8; 48],
    count: u8,
    sustain: u8,
    loop_start: u8,
    loop_end: u8,
    env_type: u8,
}

fn envelope_fields(env: Option<&Envelope>, w: &mut Warnings) -> EnvelopeFields {
    let mut fields = EnvelopeFields {
        points: [0u8; 48],
        count: 0,
        sustain: 0,
        loop_start: 0,
        loop_end: 0,
        env_type: 0,
    };
    let Some(env) = env else {
        return fields;
    };

    if env.points.len() > 12 {
        w.add("envelope truncated to the 12 points XM stores");
    }
    let count = env.points.len().min(12);
    for (i, point) in env.points[..count].iter().enumerate() {
        fields.points[i * 4..i * 4 + 2].copy_from_slice(&point.tick.to_le_bytes());
        fields.points[i * 4 + 2..i * 4 + 4]
            .copy_from_slice(&(point.value.max(0) as u16).to_le_bytes());
    }
    fields.count = count as u8;
    fields.env_type = if env.enabled { 1 } else { 0 };
    if let Some(s) = env.sustain {
        fields.env_type |= 2;
        fields.sustain = s;
    }
    if let (Some(start), Some(end)) = (env.loop_start, env.loop_end) {
        fields.env_type |= 4;
        fields.loop_start = start;
        fields.loop_end = end;
    }
    fields
}

fn write_sample_header(out: &mut Vec<u8>, sample: &Sample, w: &mut Warnings) {
    let sixteen_bit = matches!(sample.data, SampleData::Mono16(_));
    let to_bytes = |frames: u32| if sixteen_bit { frames * 2 } else { frames };

    let byte_len = to_bytes(sample.len() as u32);
    let loop_start = to_bytes(sample.loop_start.min(sample.len() as u32));
    let loop_len = to_bytes(sample.loop_end.min(sample.len() as u32))
        .saturating_sub(loop_start);

    let mut type_flags = match sample.loop_type {
        LoopType::None => 0,
        LoopType::Forward => 1,
        LoopType::PingPong => 2,
    };
    if sixteen_bit {
        type_flags |= 0x10;
    }

    let (rel_note, finetune) = c4speed_to_relnote_finetune(sample.c4_speed, w);

    out.extend_from_slice(&byte_len.to_le_bytes());
    out.extend_from_slice(&loop_start.to_le_bytes());
    out.extend_from_slice(&loop_len.to_le_bytes());
    out.push(sample.default_volume.min(64));
    out.push(finetune as u8);
    out.push(type_flags);
    out.push((sample.default_pan as i16 + 128) as u8);
    out.push(rel_note as u8);
    out.push(0); // reserved
    push_padded(out, sample.name.as_bytes(), 22);
}

/// Delta-code the PCM the way FT2 stores it.
fn write_sample_data(out: &mut Vec<u8>, sample: &Sample) {
    match &sample.data {
        SampleData::Mono8(data) => {
            let mut prev = 0i8;
            for &v in data {
                out.push(v.wrapping_sub(prev) as u8);
                prev = v;
            }
        }
        SampleData::Mono16(data) => {
            let mut prev = 0i16;
            for &v in data {
                out.extend_from_slice(&v.wrapping_sub(prev).to_le_bytes());
                prev = v;
            }
        }
    }
}

/// Invert the relative-note + finetune pitch correction from the stored
/// C-4 rate.
fn c4speed_to_relnote_finetune(c4_speed: u32, w: &mut Warnings) -> (i8, i8) {
    if c4_speed == 0 {
        return (0, 0);
    }
    let semitones = 12.0 * (c4_speed as f64 / 8363.0).log2();
    let rel = semitones.round().clamp(-96.0, 95.0);
    let finetune = ((semitones - rel) * 128.0).round().clamp(-128.0, 127.0);
    let pair = (rel as i8, finetune as i8);

    let check = 8363.0 * ((pair.0 as f64 + pair.1 as f64 / 128.0) / 12.0).exp2();
    if (check.round() as u32) != c4_speed {
        w.add(format!("sample rate {} Hz snapped to the nearest XM pitch", c4_speed));
    }
    pair
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xm_format::{self, load_xm};
    use rm_ir::{Effect, Note, SourceFormat, VolumeCommand};

    #[test]
    fn round_trip_is_stable_without_warnings() {
        let original = load_xm(&xm_format::tests::build_test_xm()).unwrap();
        let export = export_xm(&original);
        assert_eq!(export.warnings, Vec::<String>::new());
        assert_eq!(export.suggested_name, "mini.xm");

        let reloaded = load_xm(&export.data).unwrap();
        assert_eq!(reloaded.title, original.title);
        assert_eq!(reloaded.positions, original.positions);
        assert_eq!(reloaded.patterns, original.patterns);
        assert_eq!(reloaded.instruments, original.instruments);
        assert_eq!(reloaded.linear_periods, original.linear_periods);
        assert_eq!(reloaded.initial_speed, original.initial_speed);
        assert_eq!(reloaded.initial_tempo, original.initial_tempo);

        let again = export_xm(&reloaded);
        assert_eq!(again.data, export.data);
    }

    #[test]
    fn note_off_survives_the_trip() {
        let original = load_xm(&xm_format::tests::build_test_xm()).unwrap();
        let export = export_xm(&original);
        let reloaded = load_xm(&export.data).unwrap();
        assert_eq!(reloaded.patterns[0].cell(0, 1).note, Note::Off);
    }

    #[test]
    fn it_only_commands_warn_but_still_export() {
        let mut song = Song::with_channels("itish", SourceFormat::It, 4);
        let mut pattern = Pattern::new(64, 4);
        pattern.cell_mut(0, 0).effect = Effect::SetChannelVolume(40);
        pattern.cell_mut(0, 1).volume = VolumeCommand::PortaUp(2);
        song.patterns.push(pattern);
        song.positions = vec![0];

        let export = export_xm(&song);
        assert!(export.warnings.iter().any(|m| m.contains("SetChannelVolume")));
        assert!(export.warnings.iter().any(|m| m.contains("volume-column")));

        let song2 = load_xm(&export.data).unwrap();
        assert_eq!(song2.patterns[0].cell(0, 0).effect, Effect::None);
    }

    #[test]
    fn synth_instrument_is_baked() {
        let mut song = Song::with_channels("chip", SourceFormat::Ahx, 2);
        song.instruments.push(Instrument::synth("saw", 0, 60));
        song.patterns.push(Pattern::new(16, 2));
        song.positions = vec![0];

        let export = export_xm(&song);
        assert!(export.warnings.iter().any(|m| m.contains("baked")));
        let song2 = load_xm(&export.data).unwrap();
        assert!(!song2.instruments[0].is_synth());
        assert!(song2.instruments[0].first_sample().unwrap().has_loop());
    }
}
