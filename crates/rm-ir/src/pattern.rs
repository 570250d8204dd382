//! Pattern and cell types for tracker score data.

use crate::effects::{Effect, VolumeCommand};

/// Highest pitched note a cell may carry (8 octaves of semitones, 1-based).
pub const NOTE_MAX: u8 = 96;

/// Wire encoding of the note-off sentinel (`NOTE_MAX + 1`).
pub const NOTE_OFF_WIRE: u8 = 97;

/// A note value in a pattern cell.
///
/// The wire encoding shared by every decoder is: 0 = empty, 1–96 = pitched
/// note (octave * 12 + semitone, 1-based so value 1 is the lowest C), 97 =
/// note-off. Each decoder maps its native note-off marker (0xFE, 120, ...)
/// onto [`Note::Off`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Note {
    /// No note in this cell
    #[default]
    None,
    /// Pitched note, 1–96
    On(u8),
    /// Stop the playing note on this channel
    Off,
}

impl Note {
    /// Create a note from octave (0-7) and semitone (0-11).
    pub const fn from_octave_semitone(octave: u8, semitone: u8) -> Self {
        Note::On(octave * 12 + semitone + 1)
    }

    /// Decode the shared wire encoding (0 = none, 1-96 = note, 97 = off).
    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => Note::None,
            NOTE_OFF_WIRE => Note::Off,
            n if n <= NOTE_MAX => Note::On(n),
            _ => Note::None,
        }
    }

    /// Encode back to the shared wire encoding.
    pub fn to_wire(self) -> u8 {
        match self {
            Note::None => 0,
            Note::On(n) => n,
            Note::Off => NOTE_OFF_WIRE,
        }
    }

    /// Get the octave if this is a pitched note.
    pub const fn octave(self) -> Option<u8> {
        match self {
            Note::On(n) => Some((n - 1) / 12),
            _ => None,
        }
    }

    /// Get the semitone (0-11) if this is a pitched note.
    pub const fn semitone(self) -> Option<u8> {
        match self {
            Note::On(n) => Some((n - 1) % 12),
            _ => None,
        }
    }
}

/// A single cell in a pattern.
///
/// Formats with two effect columns fill `effect2`; everything else leaves
/// it `Effect::None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cell {
    /// Note value
    pub note: Note,
    /// Instrument number (0 = none, 1-255 = instrument index + 1)
    pub instrument: u8,
    /// Volume column command
    pub volume: VolumeCommand,
    /// Primary effect column
    pub effect: Effect,
    /// Secondary effect column
    pub effect2: Effect,
}

impl Cell {
    /// Create an empty cell.
    pub const fn empty() -> Self {
        Self {
            note: Note::None,
            instrument: 0,
            volume: VolumeCommand::None,
            effect: Effect::None,
            effect2: Effect::None,
        }
    }

    /// Returns true if the cell is completely empty.
    pub fn is_empty(&self) -> bool {
        self.note == Note::None
            && self.instrument == 0
            && self.volume == VolumeCommand::None
            && self.effect == Effect::None
            && self.effect2 == Effect::None
    }
}

/// A pattern containing rows of cells across channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    /// Number of rows (1-256; 64 for most source formats)
    pub rows: u16,
    /// Number of channels
    pub channels: u8,
    /// Pattern data, stored row-major: data[row * channels + channel]
    pub data: Vec<Cell>,
}

impl Pattern {
    /// Create a new pattern with empty cells.
    pub fn new(rows: u16, channels: u8) -> Self {
        Self {
            rows,
            channels,
            data: vec![Cell::empty(); rows as usize * channels as usize],
        }
    }

    /// Get a reference to a cell.
    pub fn cell(&self, row: u16, channel: u8) -> &Cell {
        debug_assert!(row < self.rows);
        debug_assert!(channel < self.channels);
        &self.data[row as usize * self.channels as usize + channel as usize]
    }

    /// Get a mutable reference to a cell.
    pub fn cell_mut(&mut self, row: u16, channel: u8) -> &mut Cell {
        debug_assert!(row < self.rows);
        debug_assert!(channel < self.channels);
        &mut self.data[row as usize * self.channels as usize + channel as usize]
    }

    /// Iterate over all cells in a row.
    pub fn row(&self, row: u16) -> &[Cell] {
        let start = row as usize * self.channels as usize;
        &self.data[start..start + self.channels as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_octave_semitone() {
        let c3 = Note::from_octave_semitone(3, 0);
        assert_eq!(c3, Note::On(37));
        assert_eq!(c3.octave(), Some(3));
        assert_eq!(c3.semitone(), Some(0));

        let a4 = Note::from_octave_semitone(4, 9);
        assert_eq!(a4, Note::On(58));
    }

    #[test]
    fn note_wire_round_trip() {
        assert_eq!(Note::from_wire(0), Note::None);
        assert_eq!(Note::from_wire(1), Note::On(1));
        assert_eq!(Note::from_wire(96), Note::On(96));
        assert_eq!(Note::from_wire(97), Note::Off);
        // Out-of-range wire values decode as empty, not as garbage notes
        assert_eq!(Note::from_wire(98), Note::None);
        assert_eq!(Note::from_wire(255), Note::None);

        for v in 0..=97u8 {
            assert_eq!(Note::from_wire(v).to_wire(), v);
        }
    }

    #[test]
    fn pattern_cell_access() {
        let mut pattern = Pattern::new(64, 4);
        pattern.cell_mut(10, 2).note = Note::On(49);

        assert_eq!(pattern.cell(10, 2).note, Note::On(49));
        assert_eq!(pattern.cell(10, 1).note, Note::None);
        assert_eq!(pattern.row(10)[2].note, Note::On(49));
    }
}
