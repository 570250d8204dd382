//! Helpers shared by the MOD and XM encoders.

use rm_ir::{Envelope, Sample, SampleData, Song};

/// Deduplicating warning collector. Per-cell problems would otherwise
/// repeat hundreds of times across a pattern.
#[derive(Default)]
pub struct Warnings {
    list: Vec<String>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        if !self.list.contains(&msg) {
            log::warn!("export: {}", msg);
            self.list.push(msg);
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        self.list
    }
}

/// Suggest an output filename from the song title, falling back to
/// "untitled" for blank titles.
pub fn suggested_name(song: &Song, extension: &str) -> String {
    let stem: String = song
        .title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        format!("untitled.{}", extension)
    } else {
        format!("{}.{}", stem, extension)
    }
}

/// Render one cycle of a synthesis instrument's waveform as 8-bit PCM so
/// sample-only containers can carry an audible approximation.
///
/// The waveform index selects the shape the chip players cycle through
/// (saw, square, triangle, noise); the noise shape uses a fixed LFSR so
/// the output is deterministic.
pub fn render_synth_cycle(waveform: u8, wave_length: u8, volume: u8) -> Sample {
    let len = if wave_length >= 2 { wave_length as usize * 2 } else { 32 };
    let mut pcm = Vec::with_capacity(len);

    match waveform % 4 {
        0 => {
            // Sawtooth
            for i in 0..len {
                pcm.push((i as i32 * 255 / (len as i32 - 1) - 128) as i8);
            }
        }
        1 => {
            // Square
            for i in 0..len {
                pcm.push(if i < len / 2 { 127 } else { -128 });
            }
        }
        2 => {
            // Triangle
            for i in 0..len {
                let phase = i * 512 / len;
                let v = if phase < 256 { phase as i32 - 128 } else { 383 - phase as i32 };
                pcm.push(v.clamp(-128, 127) as i8);
            }
        }
        _ => {
            // 15-bit LFSR noise, fixed seed
            let mut lfsr: u16 = 0x4A1D;
            for _ in 0..len {
                let bit = (lfsr ^ (lfsr >> 1)) & 1;
                lfsr = (lfsr >> 1) | (bit << 14);
                pcm.push((lfsr & 0xFF) as u8 as i8);
            }
        }
    }

    let mut sample = Sample::new("synth wave");
    sample.data = SampleData::Mono8(pcm);
    sample.default_volume = volume.min(64);
    sample.loop_start = 0;
    sample.loop_end = len as u32;
    sample.loop_type = rm_ir::LoopType::Forward;
    sample
}

/// Fold an ADSR-style envelope into a single 0-64 level for containers
/// without envelopes: the sustain value if one exists, else the peak.
pub fn envelope_level(env: &Envelope) -> u8 {
    let sustained = env
        .sustain
        .and_then(|idx| env.points.get(idx as usize))
        .map(|p| p.value);
    let level = sustained.unwrap_or_else(|| env.points.iter().map(|p| p.value).max().unwrap_or(64));
    level.clamp(0, 64) as u8
}
