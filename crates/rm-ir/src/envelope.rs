//! Volume/panning envelope types.

/// An envelope: ordered (tick, value) nodes with optional sustain and
/// loop node indices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope points, ordered by tick
    pub points: Vec<EnvelopePoint>,
    /// Sustain point index (None = no sustain)
    pub sustain: Option<u8>,
    /// Loop start point index (None = no loop)
    pub loop_start: Option<u8>,
    /// Loop end point index
    pub loop_end: Option<u8>,
    /// Is the envelope enabled?
    pub enabled: bool,
}

impl Envelope {
    /// Create a new empty envelope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a point to the envelope.
    pub fn add_point(&mut self, tick: u16, value: i8) {
        self.points.push(EnvelopePoint { tick, value });
    }

    /// Get the interpolated value at a given tick.
    pub fn value_at(&self, tick: u16) -> i8 {
        if self.points.is_empty() {
            return 0;
        }

        let mut prev = &self.points[0];
        for point in &self.points {
            if point.tick > tick {
                if point.tick == prev.tick {
                    return point.value;
                }
                let t = (tick.saturating_sub(prev.tick)) as i32;
                let d = (point.tick - prev.tick) as i32;
                let v = prev.value as i32 + (point.value as i32 - prev.value as i32) * t / d;
                return v as i8;
            }
            prev = point;
        }

        // Past the last point
        prev.value
    }
}

/// A point in an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopePoint {
    /// Tick position
    pub tick: u16,
    /// Value (-64 to +64, or 0-64 for volume)
    pub value: i8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_interpolation() {
        let mut env = Envelope::new();
        env.add_point(0, 64);
        env.add_point(100, 0);

        assert_eq!(env.value_at(0), 64);
        assert_eq!(env.value_at(50), 32);
        assert_eq!(env.value_at(100), 0);
        assert_eq!(env.value_at(200), 0); // Past end
    }

    #[test]
    fn envelope_before_first_point() {
        let mut env = Envelope::new();
        env.add_point(10, 40);
        env.add_point(20, 0);
        // Ticks before the first point clamp to it
        assert_eq!(env.value_at(0), 40);
    }
}
