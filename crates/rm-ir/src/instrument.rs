//! Instrument types.
//!
//! An instrument is either sample-backed (PCM) or synthesis-backed
//! (wavetable/chip formats like AHX and Future Composer). The two kinds
//! carry only their own fields; there is no optional-everything bag.

use arrayvec::ArrayString;

use crate::envelope::Envelope;
use crate::sample::Sample;

/// An instrument definition.
#[derive(Clone, Debug, PartialEq)]
pub struct Instrument {
    /// Instrument name
    pub name: ArrayString<28>,
    /// What produces the sound
    pub kind: InstrumentKind,
}

impl Instrument {
    /// Create a sample-backed instrument holding a single sample.
    pub fn sampled(name: &str, sample: Sample) -> Self {
        let mut inst_name = ArrayString::new();
        let _ = inst_name.try_push_str(name);
        Self {
            name: inst_name,
            kind: InstrumentKind::Sampled {
                samples: vec![sample],
                keymap: None,
                volume_envelope: None,
                panning_envelope: None,
                fadeout: 0,
            },
        }
    }

    /// Create a synthesis-backed instrument.
    pub fn synth(name: &str, waveform: u8, volume: u8) -> Self {
        let mut inst_name = ArrayString::new();
        let _ = inst_name.try_push_str(name);
        Self {
            name: inst_name,
            kind: InstrumentKind::Synth {
                waveform,
                volume,
                wave_length: 0,
                adsr: None,
            },
        }
    }

    /// Create a silent placeholder for a missing or corrupt slot.
    pub fn placeholder(name: &str) -> Self {
        Self::sampled(name, Sample::new(name))
    }

    /// The sample used for a given note, if this is a sampled instrument.
    pub fn sample_for_note(&self, note: u8) -> Option<&Sample> {
        match &self.kind {
            InstrumentKind::Sampled { samples, keymap, .. } => {
                let idx = match keymap {
                    Some(map) => *map.get(note.saturating_sub(1) as usize)? as usize,
                    None => 0,
                };
                samples.get(idx)
            }
            InstrumentKind::Synth { .. } => None,
        }
    }

    /// First sample of a sampled instrument, if any.
    pub fn first_sample(&self) -> Option<&Sample> {
        match &self.kind {
            InstrumentKind::Sampled { samples, .. } => samples.first(),
            InstrumentKind::Synth { .. } => None,
        }
    }

    /// Returns true if this instrument carries no PCM at all.
    pub fn is_synth(&self) -> bool {
        matches!(self.kind, InstrumentKind::Synth { .. })
    }
}

/// The sound source of an instrument.
#[derive(Clone, Debug, PartialEq)]
pub enum InstrumentKind {
    /// PCM sample playback (possibly multi-sample with a note keymap)
    Sampled {
        /// Owned sample list; converting to a player config copies
        samples: Vec<Sample>,
        /// Note (1-96) to sample-index map; None = all notes use sample 0
        keymap: Option<Box<[u8; 96]>>,
        /// Volume envelope
        volume_envelope: Option<Envelope>,
        /// Panning envelope
        panning_envelope: Option<Envelope>,
        /// Fadeout speed (0 = no fade)
        fadeout: u16,
    },
    /// Wavetable/chip synthesis (AHX, Future Composer built-in waves)
    Synth {
        /// Source waveform index in the originating format
        waveform: u8,
        /// Base volume (0-64)
        volume: u8,
        /// Waveform cycle length, format-specific units
        wave_length: u8,
        /// ADSR-style volume envelope, when the format defines one
        adsr: Option<Envelope>,
    },
}
