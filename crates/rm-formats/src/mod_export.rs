//! ProTracker MOD encoder.
//!
//! Best-effort: everything the container cannot carry is reported as a
//! warning and the closest representable value is written. With an empty
//! warning list the output decodes back to the same song.

use rm_ir::{Cell, Effect, InstrumentKind, Note, Sample, SampleData, Song, VolumeCommand};

use crate::effect::encode_protracker;
use crate::export_util::{render_synth_cycle, suggested_name, Warnings};
use crate::period::{finetune_to_c4speed, note_to_period};
use crate::ExportResult;

/// Longest PCM a MOD sample header can describe (0xFFFF words).
const MAX_SAMPLE_BYTES: usize = 0xFFFF * 2;

/// Encode a song as a ProTracker MOD file.
pub fn export_mod(song: &Song) -> ExportResult {
    let mut w = Warnings::new();
    let mut out = Vec::new();

    let (num_channels, signature): (u8, &[u8; 4]) = match song.num_channels {
        4 => (4, b"M.K."),
        6 => (6, b"6CHN"),
        8 => (8, b"8CHN"),
        n if n < 4 => {
            w.add(format!("{} channels padded to 4 with silence", n));
            (4, b"M.K.")
        }
        n if n < 6 => {
            w.add(format!("{} channels padded to 6 with silence", n));
            (6, b"6CHN")
        }
        n if n < 8 => {
            w.add(format!("{} channels padded to 8 with silence", n));
            (8, b"8CHN")
        }
        n => {
            w.add(format!("channels 9-{} dropped, MOD holds at most 8", n));
            (8, b"8CHN")
        }
    };

    if song.title.len() > 20 {
        w.add("title truncated to 20 characters");
    }
    push_padded(&mut out, song.title.as_bytes(), 20);

    if song.instruments.len() > 31 {
        w.add(format!(
            "instruments 32-{} dropped, MOD holds 31",
            song.instruments.len()
        ));
    }
    if song.initial_speed != 6 || song.initial_tempo != 125 {
        w.add("initial speed/tempo field does not exist in MOD, default 6/125 assumed");
    }

    // 31 sample headers; PCM is collected now and appended after the
    // pattern data.
    let mut pcm_blocks: Vec<Vec<u8>> = Vec::with_capacity(31);
    for slot in 0..31 {
        match song.instruments.get(slot) {
            Some(inst) => {
                let pcm = write_sample_header(&mut out, inst, &mut w);
                pcm_blocks.push(pcm);
            }
            None => {
                out.extend_from_slice(&[0u8; 22]);
                out.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
                pcm_blocks.push(Vec::new());
            }
        }
    }

    let mut positions = song.positions.clone();
    if positions.len() > 128 {
        w.add("order list truncated to 128 positions");
        positions.truncate(128);
    }
    out.push(positions.len() as u8);
    out.push(song.restart_position);
    let mut order = [0u8; 128];
    order[..positions.len()].copy_from_slice(&positions);
    out.extend_from_slice(&order);
    out.extend_from_slice(signature);

    // The file stores patterns 0..=max referenced; anything beyond that
    // is unreachable from the order list and cannot be kept.
    let max_pattern = positions.iter().max().copied().unwrap_or(0) as usize;
    if song.patterns.len() > max_pattern + 1 {
        w.add("patterns not referenced by the order list dropped");
    }
    for idx in 0..=max_pattern {
        write_pattern(&mut out, song, idx, num_channels, &mut w);
    }

    for pcm in &pcm_blocks {
        out.extend_from_slice(pcm);
    }

    ExportResult {
        data: out,
        suggested_name: suggested_name(song, "mod"),
        warnings: w.into_vec(),
    }
}

fn push_padded(out: &mut Vec<u8>, bytes: &[u8], width: usize) {
    let n = bytes.len().min(width);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + width - n, 0);
}

/// Write one 30-byte sample header and return the PCM to append later.
fn write_sample_header(out: &mut Vec<u8>, inst: &rm_ir::Instrument, w: &mut Warnings) -> Vec<u8> {
    let baked;
    let sample: &Sample = match &inst.kind {
        InstrumentKind::Sampled { samples, .. } => {
            if samples.len() > 1 {
                w.add(format!(
                    "multi-sample instrument '{}' flattened to its first sample",
                    inst.name
                ));
            }
            match samples.first() {
                Some(s) => s,
                None => {
                    out.extend_from_slice(&[0u8; 22]);
                    out.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
                    return Vec::new();
                }
            }
        }
        InstrumentKind::Synth {
            waveform,
            volume,
            wave_length,
            ..
        } => {
            w.add(format!(
                "synthesis instrument '{}' baked to a rendered waveform cycle",
                inst.name
            ));
            baked = render_synth_cycle(*waveform, *wave_length, *volume);
            &baked
        }
    };

    let mut pcm: Vec<u8> = match &sample.data {
        SampleData::Mono8(data) => data.iter().map(|&v| v as u8).collect(),
        SampleData::Mono16(data) => {
            w.add(format!("16-bit sample '{}' reduced to 8-bit", sample.name));
            data.iter().map(|&v| (v >> 8) as u8).collect()
        }
    };
    if pcm.len() % 2 != 0 {
        w.add(format!("odd-length sample '{}' padded by one frame", sample.name));
        pcm.push(0);
    }
    if pcm.len() > MAX_SAMPLE_BYTES {
        w.add(format!(
            "sample '{}' truncated to {} bytes",
            sample.name, MAX_SAMPLE_BYTES
        ));
        pcm.truncate(MAX_SAMPLE_BYTES);
    }

    let (loop_start, loop_len) = encode_loop(sample, pcm.len(), w);

    push_padded(out, inst.name.as_bytes(), 22);
    out.extend_from_slice(&((pcm.len() / 2) as u16).to_be_bytes());
    out.push(c4speed_to_finetune(sample.c4_speed, w) as u8 & 0x0F);
    out.push(sample.default_volume.min(64));
    out.extend_from_slice(&loop_start.to_be_bytes());
    out.extend_from_slice(&loop_len.to_be_bytes());

    pcm
}

/// Loop start and length in words. No loop is the ProTracker 0/1 pair.
fn encode_loop(sample: &Sample, pcm_len: usize, w: &mut Warnings) -> (u16, u16) {
    match sample.loop_type {
        rm_ir::LoopType::None => (0, 1),
        kind => {
            if kind == rm_ir::LoopType::PingPong {
                w.add(format!(
                    "ping-pong loop on '{}' written as a forward loop",
                    sample.name
                ));
            }
            let start = sample.loop_start.min(pcm_len as u32);
            let len = sample.loop_end.min(pcm_len as u32).saturating_sub(start);
            if start % 2 != 0 || len % 2 != 0 {
                w.add(format!("loop on '{}' rounded to word alignment", sample.name));
            }
            if len / 2 < 2 {
                w.add(format!("loop on '{}' too short for MOD, dropped", sample.name));
                return (0, 1);
            }
            if start / 2 > 0xFFFF || len / 2 > 0xFFFF {
                w.add(format!("loop on '{}' exceeds the MOD range, dropped", sample.name));
                return (0, 1);
            }
            ((start / 2) as u16, (len / 2) as u16)
        }
    }
}

/// Nearest representable finetune for a C-4 rate.
fn c4speed_to_finetune(c4_speed: u32, w: &mut Warnings) -> i8 {
    if let Some(ft) = (-8i8..=7).find(|&ft| finetune_to_c4speed(ft) == c4_speed) {
        return ft;
    }
    w.add(format!("sample rate {} Hz snapped to the nearest finetune", c4_speed));
    (-8i8..=7)
        .min_by_key(|&ft| (finetune_to_c4speed(ft) as i64 - c4_speed as i64).abs())
        .unwrap_or(0)
}

fn write_pattern(out: &mut Vec<u8>, song: &Song, idx: usize, num_channels: u8, w: &mut Warnings) {
    let pattern = song.patterns.get(idx);
    if let Some(p) = pattern {
        if p.rows != 64 {
            w.add(format!(
                "pattern with {} rows adjusted to the fixed 64 of MOD",
                p.rows
            ));
        }
    }

    for row in 0..64u16 {
        for ch in 0..num_channels {
            let cell = pattern
                .filter(|p| row < p.rows && ch < p.channels)
                .map(|p| *p.cell(row, ch))
                .unwrap_or_default();
            out.extend_from_slice(&encode_cell(&cell, w));
        }
    }
}

fn encode_cell(cell: &Cell, w: &mut Warnings) -> [u8; 4] {
    let period = match cell.note {
        Note::None => 0,
        Note::Off => {
            w.add("note-off has no MOD representation, written as empty");
            0
        }
        Note::On(n) => {
            if !(25..=60).contains(&n) {
                w.add("note outside the 3-octave MOD range clamped");
            }
            note_to_period(Note::On(n))
        }
    };

    let instrument = if cell.instrument > 31 {
        w.add("instrument number above 31 cleared");
        0
    } else {
        cell.instrument
    };

    let mut effect = cell.effect;
    match cell.volume {
        VolumeCommand::None => {}
        VolumeCommand::Volume(v) if effect == Effect::None => {
            effect = Effect::SetVolume(v.min(64));
        }
        _ => w.add("volume column dropped, MOD has none"),
    }
    if cell.effect2 != Effect::None {
        w.add("second effect column dropped");
    }

    let (cmd, param) = match encode_protracker(effect) {
        Some(pair) => pair,
        None => {
            w.add(format!("effect {} not representable in MOD", effect.name()));
            (0, 0)
        }
    };

    [
        (instrument & 0xF0) | ((period >> 8) as u8 & 0x0F),
        (period & 0xFF) as u8,
        ((instrument & 0x0F) << 4) | (cmd & 0x0F),
        param,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mod_format::{self, load_mod};
    use rm_ir::SourceFormat;

    #[test]
    fn round_trip_is_stable_without_warnings() {
        let original = load_mod(&mod_format::tests::build_test_mod(), None).unwrap();
        let export = export_mod(&original);
        assert_eq!(export.warnings, Vec::<String>::new());
        assert_eq!(export.suggested_name, "test.mod");

        let reloaded = load_mod(&export.data, None).unwrap();
        assert_eq!(reloaded.title, original.title);
        assert_eq!(reloaded.positions, original.positions);
        assert_eq!(reloaded.patterns, original.patterns);
        assert_eq!(reloaded.instruments, original.instruments);
        assert_eq!(reloaded.num_channels, original.num_channels);
        assert_eq!(reloaded.restart_position, original.restart_position);

        // And the bytes themselves stay fixed from here on
        let again = export_mod(&reloaded);
        assert_eq!(again.data, export.data);
    }

    #[test]
    fn channel_padding_warns() {
        let mut song = Song::with_channels("three", SourceFormat::Mod, 3);
        song.patterns.push(rm_ir::Pattern::new(64, 3));
        song.positions = vec![0];
        let export = export_mod(&song);
        assert!(export.warnings.iter().any(|m| m.contains("padded to 4")));
        assert!(mod_format::detect(&export.data));
    }

    #[test]
    fn note_off_and_foreign_effects_warn() {
        let mut song = Song::with_channels("warny", SourceFormat::It, 4);
        let mut pattern = rm_ir::Pattern::new(64, 4);
        pattern.cell_mut(0, 0).note = Note::Off;
        pattern.cell_mut(1, 0).effect = Effect::SetChannelVolume(30);
        song.patterns.push(pattern);
        song.positions = vec![0];

        let export = export_mod(&song);
        assert!(export.warnings.iter().any(|m| m.contains("note-off")));
        assert!(export
            .warnings
            .iter()
            .any(|m| m.contains("SetChannelVolume")));

        // Output still decodes
        let song2 = load_mod(&export.data, None).unwrap();
        assert_eq!(song2.patterns[0].cell(0, 0).note, Note::None);
    }

    #[test]
    fn synth_instrument_is_baked() {
        let mut song = Song::with_channels("chip", SourceFormat::Ahx, 4);
        song.instruments.push(rm_ir::Instrument::synth("sq", 1, 50));
        song.patterns.push(rm_ir::Pattern::new(64, 4));
        song.positions = vec![0];

        let export = export_mod(&song);
        assert!(export.warnings.iter().any(|m| m.contains("baked")));
        let song2 = load_mod(&export.data, None).unwrap();
        let s = song2.instruments[0].first_sample().unwrap();
        assert_eq!(s.len(), 32);
        assert!(s.has_loop());
    }
}
