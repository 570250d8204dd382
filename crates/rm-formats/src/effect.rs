//! Per-format effect/command translators.
//!
//! One function per source command space, each mapping a raw
//! (command, parameter) pair onto the canonical [`Effect`] /
//! [`VolumeCommand`] enums. The context-sensitive quirks live here:
//! BCD pattern-break rows, lower-nibble precedence on combined slides,
//! zero-parameter suppression for commands the original players treated
//! as "no effect", and promotion of XM volume-column bytes ≥ 0x60 into
//! real commands.

use rm_ir::{Effect, VolumeCommand};

// ---------------------------------------------------------------------------
// ProTracker (MOD and friends): command nibble 0x0-0xF
// ---------------------------------------------------------------------------

/// Parse a ProTracker effect command.
pub fn parse_protracker(cmd: u8, param: u8) -> Effect {
    match cmd {
        0x0 if param != 0 => Effect::Arpeggio {
            x: (param >> 4) & 0x0F,
            y: param & 0x0F,
        },
        0x1 => Effect::PortaUp(param),
        0x2 => Effect::PortaDown(param),
        0x3 => Effect::TonePorta(param),
        0x4 => Effect::Vibrato {
            speed: (param >> 4) & 0x0F,
            depth: param & 0x0F,
        },
        0x5 => Effect::TonePortaVolSlide(param_to_slide(param)),
        0x6 => Effect::VibratoVolSlide(param_to_slide(param)),
        0x7 => Effect::Tremolo {
            speed: (param >> 4) & 0x0F,
            depth: param & 0x0F,
        },
        0x8 => Effect::SetPan(param),
        0x9 => Effect::SampleOffset(param),
        0xA => Effect::VolumeSlide(param_to_slide(param)),
        0xB => Effect::PositionJump(param),
        0xC => Effect::SetVolume(param.min(64)),
        // Dxx rows are BCD on the wire
        0xD => Effect::PatternBreak(((param >> 4) * 10 + (param & 0x0F)).min(63)),
        0xE => parse_protracker_extended(param),
        0xF => {
            if param < 32 {
                Effect::SetSpeed(param)
            } else {
                Effect::SetTempo(param)
            }
        }
        _ => Effect::None,
    }
}

/// Parse a ProTracker extended effect (Exy).
pub fn parse_protracker_extended(param: u8) -> Effect {
    let cmd = (param >> 4) & 0x0F;
    let val = param & 0x0F;

    match cmd {
        0x1 => Effect::FinePortaUp(val),
        0x2 => Effect::FinePortaDown(val),
        0x3 => Effect::GlissandoControl(val != 0),
        0x4 => Effect::SetVibratoWaveform(val),
        0x5 => Effect::SetFinetune(if val > 7 { val as i8 - 16 } else { val as i8 }),
        0x6 => Effect::PatternLoop(val),
        0x7 => Effect::SetTremoloWaveform(val),
        0x8 => Effect::SetPanPosition(val),
        0x9 => Effect::RetriggerNote(val),
        0xA => Effect::FineVolumeSlideUp(val),
        0xB => Effect::FineVolumeSlideDown(val),
        0xC => Effect::NoteCut(val),
        0xD => Effect::NoteDelay(val),
        0xE => Effect::PatternDelay(val),
        _ => Effect::None,
    }
}

/// Convert a combined up/down slide parameter to a signed per-tick value.
/// The down nibble wins when both are set, matching the original players.
pub fn param_to_slide(param: u8) -> i8 {
    let up = (param >> 4) & 0x0F;
    let down = param & 0x0F;
    if down > 0 {
        -(down as i8)
    } else {
        up as i8
    }
}

// ---------------------------------------------------------------------------
// Scream Tracker 3: letter commands, A=1 .. Z=26
// ---------------------------------------------------------------------------

/// Parse an S3M command (1 = 'A', 2 = 'B', ...).
///
/// A parameter of zero on the memory-using commands (D, E, F, ...) recalls
/// effect memory in the player; at the pattern level that is "no new
/// effect", so those decode to `Effect::None` rather than a zero slide.
pub fn parse_s3m(cmd: u8, param: u8) -> Effect {
    match cmd {
        1 => Effect::SetSpeed(param),              // Axx
        2 => Effect::PositionJump(param),          // Bxx
        3 => Effect::PatternBreak(((param >> 4) * 10 + (param & 0x0F)).min(63)), // Cxx, BCD
        4 => parse_s3m_volslide(param),            // Dxy
        5 => parse_s3m_porta(param, false),        // Exx down
        6 => parse_s3m_porta(param, true),         // Fxx up
        7 => Effect::TonePorta(param),             // Gxx
        8 => Effect::Vibrato {                     // Hxy
            speed: (param >> 4) & 0x0F,
            depth: param & 0x0F,
        },
        9 => Effect::Tremor {                      // Ixy
            on: (param >> 4) & 0x0F,
            off: param & 0x0F,
        },
        10 => Effect::Arpeggio {                   // Jxy
            x: (param >> 4) & 0x0F,
            y: param & 0x0F,
        },
        11 => Effect::VibratoVolSlide(param_to_slide(param)), // Kxy
        12 => Effect::TonePortaVolSlide(param_to_slide(param)), // Lxy
        15 => Effect::SampleOffset(param),         // Oxx
        17 => Effect::Retrigger {                  // Qxy
            interval: param & 0x0F,
            volume_change: retrig_volume_change((param >> 4) & 0x0F),
        },
        18 => Effect::Tremolo {                    // Rxy
            speed: (param >> 4) & 0x0F,
            depth: param & 0x0F,
        },
        19 => parse_s3m_extended(param),           // Sxy
        20 => Effect::SetTempo(param),             // Txx
        21 => Effect::FineVibrato {                // Uxy
            speed: (param >> 4) & 0x0F,
            depth: param & 0x0F,
        },
        22 => Effect::SetGlobalVolume(param),      // Vxx
        24 => Effect::SetPan(param),               // Xxx
        _ => Effect::None,
    }
}

/// S3M Dxy: fine slides encode as x=F or y=F; the fine nibble takes
/// precedence, and a zero parameter recalls memory (suppressed here).
fn parse_s3m_volslide(param: u8) -> Effect {
    if param == 0 {
        return Effect::None;
    }
    let up = (param >> 4) & 0x0F;
    let down = param & 0x0F;
    match (up, down) {
        (0xF, d) if d != 0 => Effect::FineVolumeSlideDown(d),
        (u, 0xF) if u != 0 => Effect::FineVolumeSlideUp(u),
        (u, 0) => Effect::VolumeSlide(u as i8),
        (_, d) => Effect::VolumeSlide(-(d as i8)),
    }
}

/// S3M Exx/Fxx: 0xFx = fine slide, 0xEx = extra fine, else normal.
fn parse_s3m_porta(param: u8, up: bool) -> Effect {
    if param == 0 {
        return Effect::None;
    }
    let hi = param >> 4;
    let lo = param & 0x0F;
    match (hi, up) {
        (0xF, true) => Effect::FinePortaUp(lo),
        (0xF, false) => Effect::FinePortaDown(lo),
        (0xE, true) => Effect::ExtraFinePortaUp(lo),
        (0xE, false) => Effect::ExtraFinePortaDown(lo),
        (_, true) => Effect::PortaUp(param),
        (_, false) => Effect::PortaDown(param),
    }
}

fn parse_s3m_extended(param: u8) -> Effect {
    let cmd = (param >> 4) & 0x0F;
    let val = param & 0x0F;
    match cmd {
        0x1 => Effect::GlissandoControl(val != 0),
        0x2 => Effect::SetFinetune(if val > 7 { val as i8 - 16 } else { val as i8 }),
        0x3 => Effect::SetVibratoWaveform(val),
        0x4 => Effect::SetTremoloWaveform(val),
        0x8 => Effect::SetPanPosition(val),
        0xB => Effect::PatternLoop(val),
        0xC => Effect::NoteCut(val),
        0xD => Effect::NoteDelay(val),
        0xE => Effect::PatternDelay(val),
        _ => Effect::None,
    }
}

/// S3M/IT Qxy volume-change nibble.
fn retrig_volume_change(x: u8) -> i8 {
    match x {
        1..=5 => -(1 << (x - 1)),
        6 => 0, // *2/3, approximated as no change at the cell level
        7 => 0, // *1/2
        9..=0xD => 1 << (x - 9),
        0xE => 0, // *3/2
        0xF => 0, // *2
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// Impulse Tracker: same letter space as S3M plus a few of its own
// ---------------------------------------------------------------------------

/// Parse an IT command (1 = 'A', ...). Most of the space is shared with
/// S3M; the differences are channel volume (M/N), panning slide (P),
/// panbrello (Y, dropped) and the S7x/S9x groups (dropped).
pub fn parse_it(cmd: u8, param: u8) -> Effect {
    match cmd {
        13 => Effect::SetChannelVolume(param.min(64)), // Mxx
        14 => Effect::ChannelVolumeSlide(param_to_slide(param)), // Nxy
        16 => Effect::PanningSlide(param_to_slide(param)), // Pxy
        23 => Effect::GlobalVolumeSlide(param_to_slide(param)), // Wxy
        _ => parse_s3m(cmd, param),
    }
}

/// Decode an IT volume-column byte.
pub fn parse_it_volume(vol: u8) -> VolumeCommand {
    match vol {
        0..=64 => VolumeCommand::Volume(vol),
        65..=74 => VolumeCommand::FineVolSlideUp(vol - 65),
        75..=84 => VolumeCommand::FineVolSlideDown(vol - 75),
        85..=94 => VolumeCommand::VolumeSlideUp(vol - 85),
        95..=104 => VolumeCommand::VolumeSlideDown(vol - 95),
        105..=114 => VolumeCommand::PortaDown(vol - 105),
        115..=124 => VolumeCommand::PortaUp(vol - 115),
        128..=192 => VolumeCommand::Panning(vol - 128),
        193..=202 => VolumeCommand::TonePorta(vol - 193),
        203..=212 => VolumeCommand::Vibrato(vol - 203),
        _ => VolumeCommand::None,
    }
}

// ---------------------------------------------------------------------------
// FastTracker II volume column
// ---------------------------------------------------------------------------

/// Decode an XM volume-column byte. 0x10-0x50 sets volume; bytes from
/// 0x60 up are secondary effects and must not be dropped.
pub fn parse_xm_volume(vol: u8) -> VolumeCommand {
    match vol {
        0x10..=0x50 => VolumeCommand::Volume(vol - 0x10),
        0x60..=0x6F => VolumeCommand::VolumeSlideDown(vol & 0x0F),
        0x70..=0x7F => VolumeCommand::VolumeSlideUp(vol & 0x0F),
        0x80..=0x8F => VolumeCommand::FineVolSlideDown(vol & 0x0F),
        0x90..=0x9F => VolumeCommand::FineVolSlideUp(vol & 0x0F),
        0xA0..=0xAF => VolumeCommand::VibratoSpeed(vol & 0x0F),
        0xB0..=0xBF => VolumeCommand::Vibrato(vol & 0x0F),
        0xC0..=0xCF => VolumeCommand::Panning((vol & 0x0F) << 2),
        0xD0..=0xDF => VolumeCommand::PanSlideLeft(vol & 0x0F),
        0xE0..=0xEF => VolumeCommand::PanSlideRight(vol & 0x0F),
        0xF0..=0xFF => VolumeCommand::TonePorta(vol & 0x0F),
        _ => VolumeCommand::None,
    }
}

/// Parse an XM effect. 0x0-0xF match ProTracker; XM extends with G-X.
pub fn parse_xm(cmd: u8, param: u8) -> Effect {
    match cmd {
        0x0..=0xF => parse_protracker(cmd, param),
        0x10 => Effect::SetGlobalVolume(param.min(64)), // Gxx
        0x11 => Effect::GlobalVolumeSlide(param_to_slide(param)), // Hxy
        0x15 => Effect::SetEnvelopePosition(param),     // Lxx
        0x19 => Effect::PanningSlide(param_to_slide(param)), // Pxy
        0x1B => Effect::Retrigger {                     // Rxy
            interval: param & 0x0F,
            volume_change: retrig_volume_change((param >> 4) & 0x0F),
        },
        0x1D => Effect::Tremor {                        // Txy
            on: (param >> 4) & 0x0F,
            off: param & 0x0F,
        },
        0x21 => match param >> 4 {                      // Xxy
            1 => Effect::ExtraFinePortaUp(param & 0x0F),
            2 => Effect::ExtraFinePortaDown(param & 0x0F),
            _ => Effect::None,
        },
        _ => Effect::None,
    }
}

// ---------------------------------------------------------------------------
// Encoders: canonical -> wire, inverses of the parsers above
// ---------------------------------------------------------------------------

/// Convert a signed per-tick slide back to the up/down nibble encoding.
pub fn slide_to_param(slide: i8) -> u8 {
    if slide < 0 {
        (-(slide as i16)).min(15) as u8
    } else {
        ((slide as u8).min(15)) << 4
    }
}

/// Encode a canonical effect as a ProTracker (command, parameter) pair.
/// `None` means the effect has no MOD representation.
pub fn encode_protracker(effect: Effect) -> Option<(u8, u8)> {
    match effect {
        Effect::None => Some((0x0, 0)),
        Effect::Arpeggio { x, y } => Some((0x0, (x << 4) | (y & 0x0F))),
        Effect::PortaUp(p) => Some((0x1, p)),
        Effect::PortaDown(p) => Some((0x2, p)),
        Effect::TonePorta(p) => Some((0x3, p)),
        Effect::Vibrato { speed, depth } => Some((0x4, (speed << 4) | (depth & 0x0F))),
        Effect::TonePortaVolSlide(s) => Some((0x5, slide_to_param(s))),
        Effect::VibratoVolSlide(s) => Some((0x6, slide_to_param(s))),
        Effect::Tremolo { speed, depth } => Some((0x7, (speed << 4) | (depth & 0x0F))),
        Effect::SetPan(p) => Some((0x8, p)),
        Effect::SampleOffset(p) => Some((0x9, p)),
        Effect::VolumeSlide(s) => Some((0xA, slide_to_param(s))),
        Effect::PositionJump(p) => Some((0xB, p)),
        Effect::SetVolume(v) => Some((0xC, v.min(64))),
        Effect::PatternBreak(row) => {
            let row = row.min(63);
            Some((0xD, ((row / 10) << 4) | (row % 10)))
        }
        Effect::SetSpeed(s) if s < 32 => Some((0xF, s)),
        Effect::SetTempo(t) if t >= 32 => Some((0xF, t)),
        _ => encode_protracker_extended(effect).map(|p| (0xE, p)),
    }
}

/// Encode an Exy extended effect parameter.
fn encode_protracker_extended(effect: Effect) -> Option<u8> {
    let (cmd, val) = match effect {
        Effect::FinePortaUp(v) => (0x1, v),
        Effect::FinePortaDown(v) => (0x2, v),
        Effect::GlissandoControl(on) => (0x3, on as u8),
        Effect::SetVibratoWaveform(v) => (0x4, v),
        Effect::SetFinetune(ft) => (0x5, if ft < 0 { (ft + 16) as u8 } else { ft as u8 }),
        Effect::PatternLoop(v) => (0x6, v),
        Effect::SetTremoloWaveform(v) => (0x7, v),
        Effect::SetPanPosition(v) => (0x8, v),
        Effect::RetriggerNote(v) => (0x9, v),
        Effect::FineVolumeSlideUp(v) => (0xA, v),
        Effect::FineVolumeSlideDown(v) => (0xB, v),
        Effect::NoteCut(v) => (0xC, v),
        Effect::NoteDelay(v) => (0xD, v),
        Effect::PatternDelay(v) => (0xE, v),
        _ => return None,
    };
    Some((cmd << 4) | (val & 0x0F))
}

/// Encode a canonical effect as an XM (command, parameter) pair.
pub fn encode_xm(effect: Effect) -> Option<(u8, u8)> {
    match effect {
        Effect::SetGlobalVolume(v) => Some((0x10, v.min(64))),
        Effect::GlobalVolumeSlide(s) => Some((0x11, slide_to_param(s))),
        Effect::SetEnvelopePosition(p) => Some((0x15, p)),
        Effect::PanningSlide(s) => Some((0x19, slide_to_param(s))),
        Effect::Retrigger {
            interval,
            volume_change,
        } => Some((0x1B, (retrig_change_nibble(volume_change) << 4) | (interval & 0x0F))),
        Effect::Tremor { on, off } => Some((0x1D, (on << 4) | (off & 0x0F))),
        Effect::ExtraFinePortaUp(v) => Some((0x21, 0x10 | (v & 0x0F))),
        Effect::ExtraFinePortaDown(v) => Some((0x21, 0x20 | (v & 0x0F))),
        _ => encode_protracker(effect),
    }
}

/// Invert [`retrig_volume_change`] onto the x nibble. The multiplicative
/// variants all decoded to 0, so they re-encode as "no change".
fn retrig_change_nibble(change: i8) -> u8 {
    match change {
        -1 => 1,
        -2 => 2,
        -4 => 3,
        -8 => 4,
        -16 => 5,
        1 => 9,
        2 => 0xA,
        4 => 0xB,
        8 => 0xC,
        16 => 0xD,
        _ => 0,
    }
}

/// Encode a volume-column command as an XM volume byte. `None` means the
/// command cannot be represented exactly (IT-only commands, non-multiple
/// panning values).
pub fn encode_xm_volume(vol: VolumeCommand) -> Option<u8> {
    match vol {
        VolumeCommand::None => Some(0),
        VolumeCommand::Volume(v) if v <= 64 => Some(0x10 + v),
        VolumeCommand::VolumeSlideDown(v) if v <= 15 => Some(0x60 | v),
        VolumeCommand::VolumeSlideUp(v) if v <= 15 => Some(0x70 | v),
        VolumeCommand::FineVolSlideDown(v) if v <= 15 => Some(0x80 | v),
        VolumeCommand::FineVolSlideUp(v) if v <= 15 => Some(0x90 | v),
        VolumeCommand::VibratoSpeed(v) if v <= 15 => Some(0xA0 | v),
        VolumeCommand::Vibrato(v) if v <= 15 => Some(0xB0 | v),
        VolumeCommand::Panning(p) if p <= 60 && p % 4 == 0 => Some(0xC0 | (p >> 2)),
        VolumeCommand::PanSlideLeft(v) if v <= 15 => Some(0xD0 | v),
        VolumeCommand::PanSlideRight(v) if v <= 15 => Some(0xE0 | v),
        VolumeCommand::TonePorta(v) if v <= 15 => Some(0xF0 | v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protracker_pattern_break_is_bcd() {
        assert_eq!(parse_protracker(0xD, 0x32), Effect::PatternBreak(32));
        assert_eq!(parse_protracker(0xD, 0x05), Effect::PatternBreak(5));
    }

    #[test]
    fn protracker_arpeggio_zero_is_none() {
        assert_eq!(parse_protracker(0x0, 0x00), Effect::None);
        assert_eq!(parse_protracker(0x0, 0x37), Effect::Arpeggio { x: 3, y: 7 });
    }

    #[test]
    fn slide_lower_nibble_wins() {
        assert_eq!(param_to_slide(0x30), 3);
        assert_eq!(param_to_slide(0x04), -4);
        assert_eq!(param_to_slide(0x34), -4);
    }

    #[test]
    fn s3m_zero_param_suppresses_memory_commands() {
        assert_eq!(parse_s3m(4, 0x00), Effect::None); // D00
        assert_eq!(parse_s3m(5, 0x00), Effect::None); // E00
        assert_eq!(parse_s3m(6, 0x00), Effect::None); // F00
    }

    #[test]
    fn s3m_pattern_break_is_bcd_and_clamped() {
        assert_eq!(parse_s3m(3, 0x32), Effect::PatternBreak(32));
        assert_eq!(parse_s3m(3, 0x99), Effect::PatternBreak(63));
    }

    #[test]
    fn s3m_fine_slides() {
        assert_eq!(parse_s3m(4, 0x1F), Effect::FineVolumeSlideUp(1));
        assert_eq!(parse_s3m(4, 0xF2), Effect::FineVolumeSlideDown(2));
        assert_eq!(parse_s3m(4, 0x30), Effect::VolumeSlide(3));
        assert_eq!(parse_s3m(4, 0x03), Effect::VolumeSlide(-3));
        assert_eq!(parse_s3m(6, 0xF3), Effect::FinePortaUp(3));
        assert_eq!(parse_s3m(6, 0xE3), Effect::ExtraFinePortaUp(3));
        assert_eq!(parse_s3m(5, 0x12), Effect::PortaDown(0x12));
    }

    #[test]
    fn s3m_speed_and_tempo() {
        assert_eq!(parse_s3m(1, 6), Effect::SetSpeed(6));
        assert_eq!(parse_s3m(20, 125), Effect::SetTempo(125));
    }

    #[test]
    fn it_extends_s3m() {
        assert_eq!(parse_it(13, 32), Effect::SetChannelVolume(32));
        assert_eq!(parse_it(16, 0x40), Effect::PanningSlide(4));
        // Shared space falls through to S3M
        assert_eq!(parse_it(1, 6), Effect::SetSpeed(6));
    }

    #[test]
    fn it_volume_column() {
        assert_eq!(parse_it_volume(64), VolumeCommand::Volume(64));
        assert_eq!(parse_it_volume(66), VolumeCommand::FineVolSlideUp(1));
        assert_eq!(parse_it_volume(128), VolumeCommand::Panning(0));
        assert_eq!(parse_it_volume(255), VolumeCommand::None);
    }

    #[test]
    fn xm_volume_column_promotion() {
        assert_eq!(parse_xm_volume(0x10), VolumeCommand::Volume(0));
        assert_eq!(parse_xm_volume(0x50), VolumeCommand::Volume(64));
        assert_eq!(parse_xm_volume(0x65), VolumeCommand::VolumeSlideDown(5));
        assert_eq!(parse_xm_volume(0x9A), VolumeCommand::FineVolSlideUp(10));
        assert_eq!(parse_xm_volume(0xF3), VolumeCommand::TonePorta(3));
        assert_eq!(parse_xm_volume(0x00), VolumeCommand::None);
    }

    #[test]
    fn protracker_encode_inverts_parse() {
        for (cmd, param) in [
            (0x0u8, 0x37u8),
            (0x1, 0x12),
            (0x4, 0x48),
            (0x5, 0x30),
            (0xA, 0x04),
            (0xC, 0x20),
            (0xD, 0x32),
            (0xE, 0x93),
            (0xE, 0xC1),
            (0xF, 0x06),
            (0xF, 0x7D),
        ] {
            let effect = parse_protracker(cmd, param);
            assert_eq!(encode_protracker(effect), Some((cmd, param)), "{:X}{:02X}", cmd, param);
        }
    }

    #[test]
    fn protracker_encode_rejects_foreign_effects() {
        assert_eq!(encode_protracker(Effect::SetChannelVolume(10)), None);
        assert_eq!(encode_protracker(Effect::FineVibrato { speed: 1, depth: 2 }), None);
        assert_eq!(encode_protracker(Effect::SetSpeed(40)), None);
    }

    #[test]
    fn xm_encode_inverts_parse() {
        for (cmd, param) in [
            (0x10u8, 40u8),
            (0x19, 0x30),
            (0x1B, 0x34),
            (0x1D, 0x21),
            (0x21, 0x13),
            (0xC, 32),
        ] {
            let effect = parse_xm(cmd, param);
            assert_eq!(encode_xm(effect), Some((cmd, param)));
        }
    }

    #[test]
    fn xm_volume_encode_inverts_parse() {
        for vol in [0u8, 0x10, 0x50, 0x65, 0x9A, 0xC4, 0xD2, 0xF3] {
            let cmd = parse_xm_volume(vol);
            assert_eq!(encode_xm_volume(cmd), Some(vol));
        }
        // IT-only commands have no XM volume byte
        assert_eq!(encode_xm_volume(VolumeCommand::PortaUp(3)), None);
        assert_eq!(encode_xm_volume(VolumeCommand::Panning(33)), None);
    }

    #[test]
    fn xm_extended_commands() {
        assert_eq!(parse_xm(0x10, 40), Effect::SetGlobalVolume(40));
        assert_eq!(parse_xm(0x21, 0x13), Effect::ExtraFinePortaUp(3));
        assert_eq!(parse_xm(0x21, 0x24), Effect::ExtraFinePortaDown(4));
        // ProTracker space passes through
        assert_eq!(parse_xm(0xC, 32), Effect::SetVolume(32));
    }
}
