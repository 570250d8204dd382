//! Amiga period / note / finetune conversions.
//!
//! Shared by every Amiga-derived format (MOD, FC, Puma, Cinemaware,
//! Cooksey, Music Assembler). The reference pitch is the PAL convention:
//! period 428 plays a zero-finetune sample at 8363 Hz and means C-3 in
//! tracker octave terms.

use rm_ir::Note;

/// Period of C-3 (the reference note) on a PAL Amiga.
pub const AMIGA_C3_PERIOD: u16 = 428;

/// Mix rate of the reference note at zero finetune.
pub const AMIGA_C3_RATE: u32 = 8363;

/// ProTracker period table, octaves 1-3 (the 36 periods a MOD file can
/// legally contain), finetune 0.
const PERIODS: [u16; 36] = [
    856, 808, 762, 720, 678, 640, 604, 570, 538, 508, 480, 453, // octave 1
    428, 404, 381, 360, 339, 320, 302, 285, 269, 254, 240, 226, // octave 2 (C-3 ref)
    214, 202, 190, 180, 170, 160, 151, 143, 135, 127, 120, 113, // octave 3
];

/// Wire note value of the first table entry. PERIODS[12] = 428 = C-3,
/// so PERIODS[0] is C-2 = octave 2 * 12 + 1.
const FIRST_TABLE_NOTE: u8 = 25;

/// Convert an Amiga period to the nearest canonical note.
///
/// Period 0 means "no note". Out-of-table periods snap to the closest
/// entry, matching how the classic players treat detuned files.
pub fn period_to_note(period: u16) -> Note {
    if period == 0 {
        return Note::None;
    }

    let mut best_idx = 0usize;
    let mut best_diff = u32::MAX;
    for (i, &p) in PERIODS.iter().enumerate() {
        let diff = (period as i32 - p as i32).unsigned_abs();
        if diff < best_diff {
            best_diff = diff;
            best_idx = i;
        }
    }

    Note::On(FIRST_TABLE_NOTE + best_idx as u8)
}

/// Convert a canonical note back to an Amiga period. Notes outside the
/// 3-octave MOD range clamp to the table edges.
pub fn note_to_period(note: Note) -> u16 {
    match note {
        Note::On(n) => {
            let idx = (n as i16 - FIRST_TABLE_NOTE as i16).clamp(0, 35) as usize;
            PERIODS[idx]
        }
        _ => 0,
    }
}

/// Convert a MOD-style signed finetune (-8..=7, eighths of a semitone)
/// to the C-4 mix rate the canonical sample model carries.
pub fn finetune_to_c4speed(finetune: i8) -> u32 {
    if finetune == 0 {
        return AMIGA_C3_RATE;
    }
    // 2^(ft/96): each step is 1/8 semitone, 12 semitones per octave.
    let factor = (finetune as f64 / 96.0).exp2();
    (AMIGA_C3_RATE as f64 * factor).round() as u32
}

/// Decode the low-nibble finetune field of MOD-family sample headers
/// into a signed -8..=7 value.
pub fn nibble_finetune(raw: u8) -> i8 {
    let ft = (raw & 0x0F) as i8;
    if ft > 7 {
        ft - 16
    } else {
        ft
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_period_is_c3_at_8363() {
        // The canonical 1-sample scenario: period 428 must decode to C-3
        // with the 8363 Hz reference rate and no finetune offset.
        assert_eq!(period_to_note(AMIGA_C3_PERIOD), Note::On(37));
        assert_eq!(Note::On(37).octave(), Some(3));
        assert_eq!(Note::On(37).semitone(), Some(0)); // C
        assert_eq!(finetune_to_c4speed(0), 8363);
    }

    #[test]
    fn zero_period_is_no_note() {
        assert_eq!(period_to_note(0), Note::None);
    }

    #[test]
    fn round_trip_within_table() {
        for &p in &[856u16, 428, 214, 113, 640, 202] {
            assert_eq!(note_to_period(period_to_note(p)), p);
        }
    }

    #[test]
    fn detuned_period_snaps_to_nearest() {
        // 430 is closest to 428 (C-3)
        assert_eq!(period_to_note(430), period_to_note(428));
    }

    #[test]
    fn finetune_shifts_rate() {
        assert!(finetune_to_c4speed(7) > AMIGA_C3_RATE);
        assert!(finetune_to_c4speed(-8) < AMIGA_C3_RATE);
        // +8 finetune steps = one semitone = ratio 2^(1/12)
        let semitone_up = (AMIGA_C3_RATE as f64 * (1.0f64 / 12.0).exp2()).round() as u32;
        assert!((finetune_to_c4speed(7) as i64 - semitone_up as i64).abs() < 70);
    }

    #[test]
    fn nibble_finetune_sign_extends() {
        assert_eq!(nibble_finetune(0x0), 0);
        assert_eq!(nibble_finetune(0x7), 7);
        assert_eq!(nibble_finetune(0x8), -8);
        assert_eq!(nibble_finetune(0xF), -1);
    }
}
