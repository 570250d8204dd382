//! Future Composer macro virtual machine.
//!
//! An FC instrument is a pair of 64-byte bytecode programs, stepped once
//! per playback tick: the frequency program moves the pitch and selects
//! waveforms, the volume program shapes the level. The decoder runs this
//! VM at import time and bakes the per-row result into canonical cells.
//!
//! Each program counter is modelled as an explicit state machine. Opcode
//! dispatch inside one tick is bounded by a step budget so corrupt
//! macro data (a loop that never yields) cannot hang a decode.

/// Opcodes shared by both program kinds.
pub const OP_LOOP: u8 = 0xE0;
pub const OP_END: u8 = 0xE1;
pub const OP_SET_WAVE: u8 = 0xE2;
pub const OP_CHANGE_WAVE: u8 = 0xE4;
pub const OP_NEW_SEQ: u8 = 0xE7;
pub const OP_SUSTAIN: u8 = 0xE8;
pub const OP_SET_PACKED: u8 = 0xE9;
pub const OP_PITCH_BEND: u8 = 0xEA;

pub const MACRO_LEN: usize = 64;

/// Intra-tick opcode budget. A well-formed program yields after a
/// handful of control opcodes.
const STEP_BUDGET: usize = 64;

/// Packed-sample waveform indices start here.
pub const PACKED_BASE: u16 = 100;

/// A bank of fixed-size macro programs.
pub struct MacroBank<'a> {
    data: &'a [u8],
}

impl<'a> MacroBank<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn count(&self) -> usize {
        self.data.len() / MACRO_LEN
    }

    /// Program `idx`, or None when the bank is too short.
    pub fn program(&self, idx: usize) -> Option<&'a [u8]> {
        let start = idx.checked_mul(MACRO_LEN)?;
        let end = start.checked_add(MACRO_LEN)?;
        self.data.get(start..end)
    }
}

/// Where a program counter currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacroState {
    /// Program ran off its end or hit OP_END; holds the last values.
    Idle,
    /// Executing normally at `pc`.
    Running { pc: usize },
    /// OP_SUSTAIN froze the counter; resumes at `pc` after the wait.
    Sustaining { pc: usize, ticks_left: u8 },
    /// OP_PITCH_BEND (or a volume ramp) applies `speed` once per tick.
    Bending { pc: usize, speed: i8, ticks_left: u8 },
}

/// One simulated FC voice.
#[derive(Clone, Debug)]
pub struct VoiceSim {
    pub base_note: u8,
    pub freq_seq: usize,
    pub vol_seq: usize,
    freq_state: MacroState,
    vol_state: MacroState,
    /// Relative note offset written by frequency program data bytes.
    pub note_offset: i8,
    pub waveform: u16,
    pub volume: u8,
    /// Accumulated bend in 1/8th semitones.
    pub bend_accum: i16,
    vib_speed: u8,
    vib_depth: u8,
    vib_delay: u8,
    vib_phase: u8,
    porta_speed: i8,
    porta_accum: i16,
}

/// What one tick produced, for the row-commit step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickOut {
    pub volume: u8,
    pub waveform: u16,
    /// Pitch offset in 1/8th-semitone steps (bend + vibrato + portamento).
    pub pitch_offset: i16,
}

impl VoiceSim {
    pub fn new() -> Self {
        Self {
            base_note: 0,
            freq_seq: 0,
            vol_seq: 0,
            freq_state: MacroState::Idle,
            vol_state: MacroState::Idle,
            note_offset: 0,
            waveform: 0,
            volume: 0,
            bend_accum: 0,
            vib_speed: 0,
            vib_depth: 0,
            vib_delay: 0,
            vib_phase: 0,
            porta_speed: 0,
            porta_accum: 0,
        }
    }

    /// (Re)trigger: a pattern row played a note with this instrument.
    /// The volume program header carries the vibrato setup.
    pub fn trigger(&mut self, note: u8, freq_seq: usize, vol_seq: usize, vol_bank: &MacroBank) {
        self.base_note = note;
        self.freq_seq = freq_seq;
        self.vol_seq = vol_seq;
        self.freq_state = MacroState::Running { pc: 0 };
        // Volume program: byte 0 speed, 1 frq ref, 2 vibrato speed,
        // 3 vibrato depth, 4 vibrato delay; code starts at 5.
        if let Some(prog) = vol_bank.program(vol_seq) {
            self.vib_speed = prog[2];
            self.vib_depth = prog[3];
            self.vib_delay = prog[4];
        }
        self.vol_state = MacroState::Running { pc: 5 };
        self.vib_phase = 0;
        self.bend_accum = 0;
        self.note_offset = 0;
        self.porta_accum = 0;
    }

    pub fn set_portamento(&mut self, speed: i8) {
        self.porta_speed = speed;
    }

    /// Advance both programs one tick and return the audible state.
    pub fn tick(&mut self, freq_bank: &MacroBank, vol_bank: &MacroBank) -> TickOut {
        self.step_frequency(freq_bank);
        self.step_volume(vol_bank);

        // Vibrato only moves once its delay has elapsed and the speed is
        // non-zero; speed 0 keeps the phase frozen forever.
        let mut vibrato = 0i16;
        if self.vib_delay > 0 {
            self.vib_delay -= 1;
        } else if self.vib_depth > 0 {
            if self.vib_speed > 0 {
                self.vib_phase = self.vib_phase.wrapping_add(self.vib_speed);
            }
            vibrato = triangle(self.vib_phase, self.vib_depth);
        }

        self.porta_accum += self.porta_speed as i16;

        TickOut {
            volume: self.volume,
            waveform: self.waveform,
            pitch_offset: self.bend_accum + vibrato + self.porta_accum,
        }
    }

    fn step_frequency(&mut self, bank: &MacroBank) {
        match self.freq_state {
            MacroState::Idle => {}
            MacroState::Sustaining { pc, ticks_left } => {
                // The program counter is frozen for exactly ticks_left
                // ticks; only the counter moves.
                self.freq_state = if ticks_left <= 1 {
                    MacroState::Running { pc }
                } else {
                    MacroState::Sustaining {
                        pc,
                        ticks_left: ticks_left - 1,
                    }
                };
            }
            MacroState::Bending { pc, speed, ticks_left } => {
                self.bend_accum += speed as i16;
                self.freq_state = if ticks_left <= 1 {
                    MacroState::Running { pc }
                } else {
                    MacroState::Bending {
                        pc,
                        speed,
                        ticks_left: ticks_left - 1,
                    }
                };
            }
            MacroState::Running { pc } => {
                self.freq_state = self.run_frequency(bank, pc);
            }
        }
    }

    fn run_frequency(&mut self, bank: &MacroBank, start_pc: usize) -> MacroState {
        let mut prog = match bank.program(self.freq_seq) {
            Some(p) => p,
            None => return MacroState::Idle,
        };
        let mut pc = start_pc;

        for _ in 0..STEP_BUDGET {
            if pc >= prog.len() {
                return MacroState::Idle;
            }
            let op = prog[pc];
            match op {
                OP_END => return MacroState::Idle,
                OP_LOOP => {
                    let target = (*prog.get(pc + 1).unwrap_or(&0) as usize) % MACRO_LEN;
                    if target == pc {
                        return MacroState::Idle; // self-loop yields nothing
                    }
                    pc = target;
                }
                OP_SET_WAVE => {
                    self.waveform = *prog.get(pc + 1).unwrap_or(&0) as u16;
                    // A wave change restarts the volume program.
                    self.vol_state = MacroState::Running { pc: 5 };
                    return MacroState::Running { pc: pc + 2 };
                }
                OP_CHANGE_WAVE => {
                    self.waveform = *prog.get(pc + 1).unwrap_or(&0) as u16;
                    return MacroState::Running { pc: pc + 2 };
                }
                OP_NEW_SEQ => {
                    // Sequence switches stay inside this loop so a chain
                    // of programs naming each other burns the shared step
                    // budget instead of the call stack.
                    let next = *prog.get(pc + 1).unwrap_or(&0) as usize;
                    if next >= bank.count() || next == self.freq_seq {
                        return MacroState::Idle;
                    }
                    self.freq_seq = next;
                    prog = match bank.program(next) {
                        Some(p) => p,
                        None => return MacroState::Idle,
                    };
                    pc = 0;
                }
                OP_SUSTAIN => {
                    let ticks = *prog.get(pc + 1).unwrap_or(&0);
                    return if ticks == 0 {
                        MacroState::Running { pc: pc + 2 }
                    } else {
                        MacroState::Sustaining {
                            pc: pc + 2,
                            ticks_left: ticks,
                        }
                    };
                }
                OP_SET_PACKED => {
                    let idx = *prog.get(pc + 1).unwrap_or(&0) as u16;
                    self.waveform = PACKED_BASE + idx;
                    return MacroState::Running { pc: pc + 2 };
                }
                OP_PITCH_BEND => {
                    let speed = *prog.get(pc + 1).unwrap_or(&0) as i8;
                    let ticks = *prog.get(pc + 2).unwrap_or(&0);
                    return if ticks == 0 {
                        MacroState::Running { pc: pc + 3 }
                    } else {
                        MacroState::Bending {
                            pc: pc + 3,
                            speed,
                            ticks_left: ticks,
                        }
                    };
                }
                value if value < 0xE0 => {
                    // Data byte: relative note offset, one per tick.
                    self.note_offset = value as i8;
                    return MacroState::Running { pc: pc + 1 };
                }
                _ => {
                    log::debug!("FC frequency opcode {:#04X} outside the known set", op);
                    pc += 1;
                }
            }
        }

        log::warn!("FC frequency program {} exceeded its step budget", self.freq_seq);
        MacroState::Idle
    }

    fn step_volume(&mut self, bank: &MacroBank) {
        match self.vol_state {
            MacroState::Idle => {}
            MacroState::Sustaining { pc, ticks_left } => {
                self.vol_state = if ticks_left <= 1 {
                    MacroState::Running { pc }
                } else {
                    MacroState::Sustaining {
                        pc,
                        ticks_left: ticks_left - 1,
                    }
                };
            }
            MacroState::Bending { pc, speed, ticks_left } => {
                self.volume = (self.volume as i16 + speed as i16).clamp(0, 64) as u8;
                self.vol_state = if ticks_left <= 1 {
                    MacroState::Running { pc }
                } else {
                    MacroState::Bending {
                        pc,
                        speed,
                        ticks_left: ticks_left - 1,
                    }
                };
            }
            MacroState::Running { pc } => {
                self.vol_state = self.run_volume(bank, pc);
            }
        }
    }

    fn run_volume(&mut self, bank: &MacroBank, start_pc: usize) -> MacroState {
        let prog = match bank.program(self.vol_seq) {
            Some(p) => p,
            None => return MacroState::Idle,
        };
        let mut pc = start_pc;

        for _ in 0..STEP_BUDGET {
            if pc >= prog.len() {
                return MacroState::Idle;
            }
            let op = prog[pc];
            match op {
                OP_END => return MacroState::Idle,
                OP_LOOP => {
                    let target = (*prog.get(pc + 1).unwrap_or(&0) as usize) % MACRO_LEN;
                    if target == pc {
                        return MacroState::Idle;
                    }
                    pc = target.max(5); // never loop into the header
                }
                OP_SUSTAIN => {
                    let ticks = *prog.get(pc + 1).unwrap_or(&0);
                    return if ticks == 0 {
                        MacroState::Running { pc: pc + 2 }
                    } else {
                        MacroState::Sustaining {
                            pc: pc + 2,
                            ticks_left: ticks,
                        }
                    };
                }
                OP_PITCH_BEND => {
                    // In a volume program this is a volume ramp.
                    let speed = *prog.get(pc + 1).unwrap_or(&0) as i8;
                    let ticks = *prog.get(pc + 2).unwrap_or(&0);
                    return if ticks == 0 {
                        MacroState::Running { pc: pc + 3 }
                    } else {
                        MacroState::Bending {
                            pc: pc + 3,
                            speed,
                            ticks_left: ticks,
                        }
                    };
                }
                value if value <= 64 => {
                    self.volume = value;
                    return MacroState::Running { pc: pc + 1 };
                }
                _ => {
                    log::debug!("FC volume opcode {:#04X} outside the known set", op);
                    pc += 1;
                }
            }
        }

        log::warn!("FC volume program {} exceeded its step budget", self.vol_seq);
        MacroState::Idle
    }
}

impl Default for VoiceSim {
    fn default() -> Self {
        Self::new()
    }
}

/// Triangle vibrato: phase 0..255 sweeps -depth..+depth and back.
fn triangle(phase: u8, depth: u8) -> i16 {
    let d = depth as i16;
    match phase {
        0..=63 => d * phase as i16 / 64,
        64..=191 => d - d * (phase as i16 - 64) / 64,
        _ => -d + d * (phase as i16 - 192) / 64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_with(prog: &[u8]) -> Vec<u8> {
        let mut data = prog.to_vec();
        data.resize(MACRO_LEN, OP_END);
        data
    }

    fn vol_bank_with(code: &[u8]) -> Vec<u8> {
        // speed, frq, vib speed, vib depth, vib delay, then code
        let mut data = vec![3, 0, 0, 0, 0];
        data.extend_from_slice(code);
        data.resize(MACRO_LEN, OP_END);
        data
    }

    #[test]
    fn same_program_same_output() {
        let freq = bank_with(&[OP_SET_WAVE, 5, 2, OP_SUSTAIN, 3, OP_END]);
        let vol = vol_bank_with(&[32, 48, 64, OP_END]);
        let fb = MacroBank::new(&freq);
        let vb = MacroBank::new(&vol);

        let run = || {
            let mut v = VoiceSim::new();
            v.trigger(37, 0, 0, &vb);
            (0..12).map(|_| v.tick(&fb, &vb)).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn zero_speed_vibrato_never_advances() {
        let freq = bank_with(&[OP_END]);
        // vibrato: speed 0, depth 20, no delay
        let mut vol = vec![3, 0, 0, 20, 0];
        vol.resize(MACRO_LEN, OP_END);
        let fb = MacroBank::new(&freq);
        let vb = MacroBank::new(&vol);

        let mut v = VoiceSim::new();
        v.trigger(37, 0, 0, &vb);
        let offsets: Vec<i16> = (0..16).map(|_| v.tick(&fb, &vb).pitch_offset).collect();
        // Phase frozen at 0 => triangle(0) == 0 on every tick
        assert!(offsets.iter().all(|&o| o == 0));
    }

    #[test]
    fn nonzero_speed_vibrato_moves() {
        let freq = bank_with(&[OP_END]);
        let mut vol = vec![3, 0, 16, 20, 0];
        vol.resize(MACRO_LEN, OP_END);
        let fb = MacroBank::new(&freq);
        let vb = MacroBank::new(&vol);

        let mut v = VoiceSim::new();
        v.trigger(37, 0, 0, &vb);
        let offsets: Vec<i16> = (0..8).map(|_| v.tick(&fb, &vb).pitch_offset).collect();
        assert!(offsets.iter().any(|&o| o != 0));
    }

    #[test]
    fn sustain_freezes_pc_for_exactly_n_ticks() {
        // wave 1, sustain 3, wave 2
        let freq = bank_with(&[OP_SET_WAVE, 1, OP_SUSTAIN, 3, OP_SET_WAVE, 2, OP_END]);
        let vol = vol_bank_with(&[OP_END]);
        let fb = MacroBank::new(&freq);
        let vb = MacroBank::new(&vol);

        let mut v = VoiceSim::new();
        v.trigger(37, 0, 0, &vb);
        let waves: Vec<u16> = (0..7).map(|_| v.tick(&fb, &vb).waveform).collect();
        // Tick 1 sets wave 1, tick 2 executes the sustain, ticks 3-5
        // hold the counter frozen, tick 6 resumes and sets wave 2.
        assert_eq!(waves, vec![1, 1, 1, 1, 1, 2, 2]);
    }

    #[test]
    fn pitch_bend_accumulates_for_its_duration() {
        let freq = bank_with(&[OP_PITCH_BEND, 0xFE, 4, OP_END]); // -2 for 4 ticks
        let vol = vol_bank_with(&[OP_END]);
        let fb = MacroBank::new(&freq);
        let vb = MacroBank::new(&vol);

        let mut v = VoiceSim::new();
        v.trigger(37, 0, 0, &vb);
        v.tick(&fb, &vb); // executes the bend opcode, enters Bending
        let offsets: Vec<i16> = (0..5).map(|_| v.tick(&fb, &vb).pitch_offset).collect();
        assert_eq!(offsets, vec![-2, -4, -6, -8, -8]);
    }

    #[test]
    fn volume_ramp_clamps() {
        let vol = vol_bank_with(&[60, OP_PITCH_BEND, 10, 3, OP_END]);
        let freq = bank_with(&[OP_END]);
        let fb = MacroBank::new(&freq);
        let vb = MacroBank::new(&vol);

        let mut v = VoiceSim::new();
        v.trigger(37, 0, 0, &vb);
        let vols: Vec<u8> = (0..6).map(|_| v.tick(&fb, &vb).volume).collect();
        assert_eq!(vols[0], 60);
        assert_eq!(*vols.last().unwrap(), 64); // ramp up, clamped
    }

    #[test]
    fn corrupt_loop_hits_step_budget_not_forever() {
        // Two LOOPs bouncing between each other
        let mut prog = vec![OP_LOOP, 2, OP_LOOP, 0];
        prog.resize(MACRO_LEN, OP_END);
        let vol = vol_bank_with(&[OP_END]);
        let fb = MacroBank::new(&prog);
        let vb = MacroBank::new(&vol);

        let mut v = VoiceSim::new();
        v.trigger(37, 0, 0, &vb);
        // Must return, not spin
        let _ = v.tick(&fb, &vb);
        assert_eq!(v.waveform, 0);
    }

    #[test]
    fn mutually_referencing_sequence_switches_terminate() {
        // Program 0 hands off to program 1 and vice versa
        let mut p0 = vec![OP_NEW_SEQ, 1];
        p0.resize(MACRO_LEN, OP_END);
        let mut p1 = vec![OP_NEW_SEQ, 0];
        p1.resize(MACRO_LEN, OP_END);
        let mut freq = p0;
        freq.extend_from_slice(&p1);
        let vol = vol_bank_with(&[OP_END]);
        let fb = MacroBank::new(&freq);
        let vb = MacroBank::new(&vol);

        let mut v = VoiceSim::new();
        v.trigger(37, 0, 0, &vb);
        // Must return, not overflow the stack
        for _ in 0..4 {
            let out = v.tick(&fb, &vb);
            assert_eq!(out.waveform, 0);
        }
    }

    #[test]
    fn packed_sample_indices_offset_by_base() {
        let freq = bank_with(&[OP_SET_PACKED, 2, OP_END]);
        let vol = vol_bank_with(&[OP_END]);
        let fb = MacroBank::new(&freq);
        let vb = MacroBank::new(&vol);

        let mut v = VoiceSim::new();
        v.trigger(37, 0, 0, &vb);
        assert_eq!(v.tick(&fb, &vb).waveform, PACKED_BASE + 2);
    }
}
