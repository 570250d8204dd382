//! Song structure.

use arrayvec::ArrayString;

use crate::instrument::Instrument;
use crate::pattern::Pattern;

/// Which container format a song was decoded from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    Mod,
    Xm,
    It,
    S3m,
    Stx,
    Dsm,
    FutureComposer,
    PumaTracker,
    MusicAssembler,
    Cinemaware,
    MarkCooksey,
    GraoumfTracker2,
    Xmf,
    Ahx,
}

impl SourceFormat {
    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            SourceFormat::Mod => "ProTracker MOD",
            SourceFormat::Xm => "FastTracker II XM",
            SourceFormat::It => "Impulse Tracker IT",
            SourceFormat::S3m => "Scream Tracker 3 S3M",
            SourceFormat::Stx => "ST Music Interface Kit STX",
            SourceFormat::Dsm => "Digital Sound Module DSM",
            SourceFormat::FutureComposer => "Future Composer",
            SourceFormat::PumaTracker => "PumaTracker",
            SourceFormat::MusicAssembler => "Music Assembler",
            SourceFormat::Cinemaware => "Cinemaware",
            SourceFormat::MarkCooksey => "Mark Cooksey",
            SourceFormat::GraoumfTracker2 => "GraoumfTracker 2",
            SourceFormat::Xmf => "XMF",
            SourceFormat::Ahx => "AHX/HivelyTracker",
        }
    }
}

/// Per-channel settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Initial panning (-64 to +64, 0 = center)
    pub initial_pan: i8,
    /// Initial volume (0-64)
    pub initial_vol: u8,
    /// Is the channel muted?
    pub muted: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            initial_pan: 0,
            initial_vol: 64,
            muted: false,
        }
    }
}

/// A complete decoded song.
#[derive(Clone, Debug)]
pub struct Song {
    /// Song title
    pub title: ArrayString<32>,
    /// Which container this was decoded from
    pub source_format: SourceFormat,
    /// Patterns
    pub patterns: Vec<Pattern>,
    /// Instruments
    pub instruments: Vec<Instrument>,
    /// Play order: indices into `patterns`, repeats allowed
    pub positions: Vec<u8>,
    /// Restart position (index into `positions`)
    pub restart_position: u8,
    /// Channel count, shared by every pattern
    pub num_channels: u8,
    /// Initial ticks per row
    pub initial_speed: u8,
    /// Initial tempo in BPM
    pub initial_tempo: u8,
    /// Linear (XM-style) rather than Amiga-period pitch table
    pub linear_periods: bool,
    /// Per-channel settings
    pub channels: Vec<ChannelSettings>,
}

impl Song {
    /// Create an empty song with classic Amiga L-R-R-L panning.
    pub fn with_channels(title: &str, format: SourceFormat, num_channels: u8) -> Self {
        let mut song_title = ArrayString::new();
        let _ = song_title.try_push_str(title);

        let channels = (0..num_channels)
            .map(|i| ChannelSettings {
                initial_pan: if i % 4 == 0 || i % 4 == 3 { -48 } else { 48 },
                initial_vol: 64,
                muted: false,
            })
            .collect();

        Self {
            title: song_title,
            source_format: format,
            patterns: Vec::new(),
            instruments: Vec::new(),
            positions: Vec::new(),
            restart_position: 0,
            num_channels,
            initial_speed: 6,
            initial_tempo: 125,
            linear_periods: false,
            channels,
        }
    }

    /// Number of positions actually played.
    pub fn song_length(&self) -> usize {
        self.positions.len()
    }

    /// Validate the cross-references the decoders must uphold: every
    /// position indexes a real pattern and every pattern matches the
    /// song channel count.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        for &pos in &self.positions {
            if pos as usize >= self.patterns.len() {
                return Err("position references missing pattern");
            }
        }
        for pattern in &self.patterns {
            if pattern.channels != self.num_channels {
                return Err("pattern channel count mismatch");
            }
        }
        if self.channels.len() != self.num_channels as usize {
            return Err("channel settings count mismatch");
        }
        Ok(())
    }
}
