//! Canonical song model for the retromod decoding core.
//!
//! This crate defines the in-memory representation every format decoder
//! emits and every exporter consumes. Decoders produce a [`Song`] once
//! per call; the model is plain owned data, so cloning never aliases
//! pattern or PCM buffers.

mod effects;
mod envelope;
mod instrument;
mod pattern;
mod sample;
mod song;

pub use effects::{Effect, VolumeCommand};
pub use envelope::{Envelope, EnvelopePoint};
pub use instrument::{Instrument, InstrumentKind};
pub use pattern::{Cell, Note, Pattern, NOTE_MAX, NOTE_OFF_WIRE};
pub use sample::{AutoVibrato, LoopType, Sample, SampleData};
pub use song::{ChannelSettings, Song, SourceFormat};
