//! XMF decoder (Imperium Galactica family).
//!
//! XMF has no magic string: a 0x03 version byte, then a fixed 256-slot
//! sample table whose 16-byte records address PCM with absolute 24-bit
//! offsets. Detection validates every slot for internal consistency
//! (end >= start, loop inside the data, at least one populated slot)
//! before believing the version byte.

use rm_ir::{Cell, Instrument, LoopType, Note, Pattern, Sample, SampleData, Song, SourceFormat, VolumeCommand};

use crate::effect::parse_protracker;
use crate::normalize;
use crate::reader::ByteReader;
use crate::FormatError;

const VERSION: u8 = 0x03;
const SLOTS: usize = 256;
const SLOT_BYTES: usize = 16;
const TABLE_END: usize = 1 + SLOTS * SLOT_BYTES;
const ORDERS_LEN: usize = 256;
const COUNTS_AT: usize = TABLE_END + ORDERS_LEN;
const ROWS: u16 = 64;
const CELL_BYTES: usize = 6;

#[derive(Clone, Copy, Default)]
struct Slot {
    loop_start: u32,
    loop_end: u32,
    data_start: u32,
    data_end: u32,
    volume: u8,
    sixteen_bit: bool,
}

impl Slot {
    fn populated(&self) -> bool {
        self.data_end > self.data_start
    }
}

fn read_u24_le(b: &[u8]) -> u32 {
    b[0] as u32 | (b[1] as u32) << 8 | (b[2] as u32) << 16
}

fn parse_slots(data: &[u8]) -> Option<Vec<Slot>> {
    if data.len() < COUNTS_AT + 4 || data[0] != VERSION {
        return None;
    }

    let mut slots = Vec::with_capacity(SLOTS);
    let mut any = false;
    for i in 0..SLOTS {
        let rec = &data[1 + i * SLOT_BYTES..1 + (i + 1) * SLOT_BYTES];
        let slot = Slot {
            loop_start: read_u24_le(&rec[0..3]),
            loop_end: read_u24_le(&rec[3..6]),
            data_start: read_u24_le(&rec[6..9]),
            data_end: read_u24_le(&rec[9..12]),
            volume: rec[12],
            sixteen_bit: rec[13] & 0x04 != 0,
        };

        if slot.populated() {
            // Range consistency across the whole table, or no match.
            if slot.data_end as usize > data.len()
                || slot.loop_end < slot.loop_start
                || slot.loop_end > slot.data_end - slot.data_start
            {
                return None;
            }
            any = true;
        } else if slot.data_end != slot.data_start {
            return None;
        }
        slots.push(slot);
    }
    if !any {
        return None;
    }

    // Counts after the order table must be sane too.
    let channels = data[COUNTS_AT + 2];
    let patterns = data[COUNTS_AT + 3];
    if channels == 0 || channels > 32 || patterns == 0 {
        return None;
    }

    Some(slots)
}

pub fn detect(data: &[u8]) -> bool {
    parse_slots(data).is_some()
}

pub fn load_xmf(data: &[u8]) -> Result<Song, FormatError> {
    let slots = parse_slots(data).ok_or(FormatError::InvalidHeader)?;

    let mut r = ByteReader::new(data);
    r.seek(TABLE_END)?;
    let orders = r.read_bytes(ORDERS_LEN)?;
    let order_len = r.read_u8()? as usize;
    let restart = r.read_u8()?;
    let num_channels = r.read_u8()?;
    let pattern_count = r.read_u8()? as usize;

    let mut song = Song::with_channels("", SourceFormat::Xmf, num_channels);
    song.initial_speed = 6;
    song.initial_tempo = 125;
    song.restart_position = restart;
    song.positions = orders[..order_len.min(ORDERS_LEN)].to_vec();

    for idx in 0..pattern_count {
        match parse_pattern(&mut r, num_channels) {
            Ok(p) => song.patterns.push(p),
            Err(e) => {
                log::warn!("XMF pattern {} failed ({}), substituting empty", idx, e);
                song.patterns.push(Pattern::new(ROWS, num_channels));
            }
        }
    }

    // The 256-slot table is sparse; instruments are emitted up to the
    // last populated slot so pattern instrument numbers stay aligned.
    let last = slots.iter().rposition(Slot::populated).unwrap_or(0);
    for (idx, slot) in slots[..=last].iter().enumerate() {
        song.instruments.push(build_instrument(data, slot, idx));
    }

    let pat_count = song.patterns.len() as u8;
    song.positions.retain(|&p| p < pat_count);

    Ok(song)
}

fn parse_pattern(r: &mut ByteReader, num_channels: u8) -> Result<Pattern, FormatError> {
    let mut pattern = Pattern::new(ROWS, num_channels);
    for row in 0..ROWS {
        for ch in 0..num_channels {
            let cell = r.read_bytes(CELL_BYTES)?;
            let note = cell[0];
            *pattern.cell_mut(row, ch) = Cell {
                note: match note {
                    0 => Note::None,
                    n if n <= rm_ir::NOTE_MAX => Note::On(n),
                    _ => Note::Off,
                },
                instrument: cell[1],
                volume: if cell[2] > 0 && cell[2] <= 65 {
                    VolumeCommand::Volume(cell[2] - 1)
                } else {
                    VolumeCommand::None
                },
                effect: parse_protracker(cell[3], cell[4]),
                effect2: rm_ir::Effect::None,
            };
        }
    }
    Ok(pattern)
}

fn build_instrument(data: &[u8], slot: &Slot, index: usize) -> Instrument {
    let name = format!("Sample {}", index + 1);
    if !slot.populated() {
        return normalize::placeholder_instrument(&name);
    }

    let raw = &data[slot.data_start as usize..slot.data_end as usize];
    let mut sample = Sample::new(&name);
    sample.default_volume = slot.volume.min(64);
    sample.c4_speed = 8363;
    sample.data = if slot.sixteen_bit {
        SampleData::Mono16(normalize::signed16_le(raw))
    } else {
        SampleData::Mono8(normalize::signed8(raw))
    };
    if slot.loop_end > slot.loop_start {
        sample.loop_start = slot.loop_start;
        sample.loop_end = slot.loop_end;
        sample.loop_type = LoopType::Forward;
    }
    sample.sanitize_loop();
    Instrument::sampled(&name, sample)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rm_ir::Effect;

    pub(crate) fn build_test_xmf() -> Vec<u8> {
        let pattern_bytes = ROWS as usize * 2 * CELL_BYTES;
        let pcm_at = COUNTS_AT + 4 + pattern_bytes;

        let mut d = vec![0u8; COUNTS_AT + 4];
        d[0] = VERSION;

        // Slot 0 populated: 4 bytes of PCM at pcm_at, loop over all of it
        let rec = &mut d[1..1 + SLOT_BYTES];
        rec[0..3].copy_from_slice(&[0, 0, 0]); // loop start
        rec[3..6].copy_from_slice(&4u32.to_le_bytes()[..3]); // loop end
        rec[6..9].copy_from_slice(&(pcm_at as u32).to_le_bytes()[..3]);
        rec[9..12].copy_from_slice(&((pcm_at + 4) as u32).to_le_bytes()[..3]);
        rec[12] = 55; // volume

        d[TABLE_END] = 0; // order 0
        d[COUNTS_AT] = 1; // order length
        d[COUNTS_AT + 1] = 0; // restart
        d[COUNTS_AT + 2] = 2; // channels
        d[COUNTS_AT + 3] = 1; // patterns

        // Pattern: row 0 ch 0 note/inst/vol/effect
        let mut pat = vec![0u8; pattern_bytes];
        pat[0] = 37;
        pat[1] = 1;
        pat[2] = 33; // volume 32
        pat[3] = 0x0F;
        pat[4] = 3;
        d.extend_from_slice(&pat);

        d.extend_from_slice(&[1, 2, 3, 4]);
        d
    }

    #[test]
    fn detect_validates_the_whole_table() {
        assert!(detect(&build_test_xmf()));
        assert!(!detect(&vec![0u8; COUNTS_AT + 64]));

        // Wrong version byte
        let mut wrong = build_test_xmf();
        wrong[0] = 0x04;
        assert!(!detect(&wrong));

        // Populated slot pointing past EOF
        let mut oob = build_test_xmf();
        oob[10] = 0xFF; // data_end high byte
        assert!(!detect(&oob));
    }

    #[test]
    fn decodes_sparse_table() {
        let song = load_xmf(&build_test_xmf()).unwrap();
        song.check_invariants().unwrap();
        assert_eq!(song.num_channels, 2);
        assert_eq!(song.positions, vec![0]);
        assert_eq!(song.instruments.len(), 1);

        let c = song.patterns[0].cell(0, 0);
        assert_eq!(c.note, Note::On(37));
        assert_eq!(c.instrument, 1);
        assert_eq!(c.volume, VolumeCommand::Volume(32));
        assert_eq!(c.effect, Effect::SetSpeed(3));

        let s = song.instruments[0].first_sample().unwrap();
        assert_eq!(s.default_volume, 55);
        assert_eq!(s.data, SampleData::Mono8(vec![1, 2, 3, 4]));
        assert_eq!(s.loop_end, 4);
    }

    #[test]
    fn truncated_file_does_not_panic() {
        let data = build_test_xmf();
        for cut in [0, 1, 100, TABLE_END, COUNTS_AT + 2, data.len() - 6] {
            let _ = load_xmf(&data[..cut]);
        }
    }
}
