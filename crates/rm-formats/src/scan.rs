//! Bounded bytecode scanner.
//!
//! The compiled-player formats (Music Assembler, Mark Cooksey) carry no
//! data tables at fixed offsets; every table location is recovered by
//! finding known instruction opcode sequences and reading their embedded
//! displacement operands. All of that pointer-chasing goes through this
//! scanner: every scan is bounded by the buffer length and every derived
//! offset is validated before anyone dereferences it. A failed scan is
//! "not this format", never a panic.

/// A file offset proven to lie inside the scanned buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidOffset(usize);

impl ValidOffset {
    pub fn get(self) -> usize {
        self.0
    }
}

pub struct BoundedScanner<'a> {
    data: &'a [u8],
}

impl<'a> BoundedScanner<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Validate an absolute offset (with `need` readable bytes after it).
    pub fn offset(&self, at: usize, need: usize) -> Option<ValidOffset> {
        if at.checked_add(need)? <= self.data.len() {
            Some(ValidOffset(at))
        } else {
            None
        }
    }

    /// Find the first occurrence of `seq` within `start..limit`, capped
    /// at the buffer length.
    pub fn find_seq(&self, seq: &[u8], start: usize, limit: usize) -> Option<ValidOffset> {
        if seq.is_empty() || start >= self.data.len() {
            return None;
        }
        let end = limit.min(self.data.len());
        let window = self.data.get(start..end)?;
        window
            .windows(seq.len())
            .position(|w| w == seq)
            .map(|i| ValidOffset(start + i))
    }

    pub fn byte(&self, at: ValidOffset) -> u8 {
        self.data[at.0]
    }

    pub fn u8_at(&self, at: usize) -> Option<u8> {
        self.data.get(at).copied()
    }

    pub fn u16_be_at(&self, at: usize) -> Option<u16> {
        let b = self.data.get(at..at + 2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u16_le_at(&self, at: usize) -> Option<u16> {
        let b = self.data.get(at..at + 2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read the signed 16-bit big-endian displacement stored at
    /// `operand` and resolve it relative to `base`, validating the
    /// resulting offset leaves `need` readable bytes.
    pub fn rel_offset_be(
        &self,
        operand: usize,
        base: usize,
        need: usize,
    ) -> Option<ValidOffset> {
        let disp = self.u16_be_at(operand)? as i16 as isize;
        let target = (base as isize).checked_add(disp)?;
        if target < 0 {
            return None;
        }
        self.offset(target as usize, need)
    }
}
