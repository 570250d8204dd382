//! Sample data types.

use arrayvec::ArrayString;

/// A PCM sample definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Sample name
    pub name: ArrayString<28>,
    /// Audio data
    pub data: SampleData,
    /// Loop start position (in frames)
    pub loop_start: u32,
    /// Loop end position (in frames)
    pub loop_end: u32,
    /// Loop type
    pub loop_type: LoopType,
    /// Default volume (0-64)
    pub default_volume: u8,
    /// Default panning (-64 to +64, 0 = center)
    pub default_pan: i8,
    /// Frequency of C-4 in Hz (8363 for zero-finetune Amiga samples)
    pub c4_speed: u32,
    /// Auto-vibrato settings
    pub vibrato: Option<AutoVibrato>,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            name: ArrayString::new(),
            data: SampleData::Mono8(Vec::new()),
            loop_start: 0,
            loop_end: 0,
            loop_type: LoopType::None,
            default_volume: 64,
            default_pan: 0,
            c4_speed: 8363,
            vibrato: None,
        }
    }
}

impl Sample {
    /// Create a new empty sample.
    pub fn new(name: &str) -> Self {
        let mut sample = Self::default();
        let _ = sample.name.try_push_str(name);
        sample
    }

    /// Get the length of the sample in frames.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the sample has no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if the sample has a loop.
    pub fn has_loop(&self) -> bool {
        self.loop_type != LoopType::None && self.loop_end > self.loop_start
    }

    /// Bit depth of the stored PCM (8 or 16).
    pub fn bit_depth(&self) -> u8 {
        match self.data {
            SampleData::Mono8(_) => 8,
            SampleData::Mono16(_) => 16,
        }
    }

    /// Clamp loop bounds to the actual sample length and drop degenerate
    /// loops. Real-world files routinely carry loop_end past EOF.
    pub fn sanitize_loop(&mut self) {
        let len = self.len() as u32;
        if self.loop_end > len {
            self.loop_end = len;
        }
        if self.loop_start >= self.loop_end {
            self.loop_start = 0;
            self.loop_end = 0;
            self.loop_type = LoopType::None;
        }
    }
}

/// Sample audio data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SampleData {
    /// 8-bit signed mono samples
    Mono8(Vec<i8>),
    /// 16-bit signed mono samples
    Mono16(Vec<i16>),
}

impl SampleData {
    /// Get the number of sample frames.
    pub fn len(&self) -> usize {
        match self {
            SampleData::Mono8(v) => v.len(),
            SampleData::Mono16(v) => v.len(),
        }
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a sample value at position (as i16).
    pub fn get(&self, pos: usize) -> i16 {
        match self {
            SampleData::Mono8(v) => v.get(pos).copied().unwrap_or(0) as i16 * 256,
            SampleData::Mono16(v) => v.get(pos).copied().unwrap_or(0),
        }
    }
}

/// Sample loop type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopType {
    /// No loop
    #[default]
    None,
    /// Forward loop
    Forward,
    /// Ping-pong (bidirectional) loop
    PingPong,
}

/// Auto-vibrato settings for a sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AutoVibrato {
    /// Vibrato speed
    pub speed: u8,
    /// Vibrato depth
    pub depth: u8,
    /// Vibrato sweep (ramp-up time)
    pub sweep: u8,
    /// Waveform type (0=sine, 1=ramp down, 2=square, 3=random)
    pub waveform: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_loop_end() {
        let mut s = Sample::new("x");
        s.data = SampleData::Mono8(vec![0; 100]);
        s.loop_start = 10;
        s.loop_end = 500;
        s.loop_type = LoopType::Forward;
        s.sanitize_loop();
        assert_eq!(s.loop_end, 100);
        assert!(s.has_loop());
    }

    #[test]
    fn sanitize_drops_degenerate_loop() {
        let mut s = Sample::new("x");
        s.data = SampleData::Mono8(vec![0; 4]);
        s.loop_start = 8;
        s.loop_end = 12;
        s.loop_type = LoopType::Forward;
        s.sanitize_loop();
        assert!(!s.has_loop());
        assert_eq!(s.loop_type, LoopType::None);
    }

    #[test]
    fn get_scales_8_bit_to_16() {
        let d = SampleData::Mono8(vec![100, -100]);
        assert_eq!(d.get(0), 25600);
        assert_eq!(d.get(1), -25600);
        assert_eq!(d.get(2), 0); // out of range reads as silence
    }
}
