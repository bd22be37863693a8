//! 24-bit binary arithmetic range decoder (§4.1) and the integer coders
//! built on top of it.

pub mod chances;
pub mod integers;

pub use chances::{ChanceContext, ChanceTable};
pub use integers::{GnzIntReader, NzIntReader, UniformIntReader};

use crate::constants::{RAC_MAX_RANGE, RAC_MIN_RANGE};
use crate::resumable::{ByteSource, Progress};

/// Arithmetic coder state. `range` and `low` persist across suspension;
/// there is no other hidden state, because the renormalisation loop's
/// continuation condition is purely a function of `range` itself.
pub struct RangeCoder {
    range: u32,
    low: u32,
    init_done: bool,
    init_have: u8,
    /// A bit already decided by `split_bit` whose renormalisation
    /// suspended before completion. Must not be recomputed on resume —
    /// `split_bit` already mutated `range`/`low` (and, for a chance bit,
    /// the chance itself), so re-entering the decision would apply it
    /// twice. Re-entrant calls skip straight to `renorm` while this is set.
    pending_bit: Option<bool>,
}

impl RangeCoder {
    pub fn new() -> Self {
        RangeCoder {
            range: 0,
            low: 0,
            init_done: false,
            init_have: 0,
            pending_bit: None,
        }
    }

    /// Consumes the first 3 bytes of the stream to seed `low`, then sets
    /// `range = 2^24`. Resumable: `init_have` tracks how many of the 3
    /// bytes have already been folded in across prior suspensions.
    pub fn init(&mut self, input: &mut ByteSource) -> Progress<()> {
        if self.init_done {
            return Progress::Ready(());
        }
        while self.init_have < 3 {
            match input.next_byte() {
                Some(b) => {
                    self.low = (self.low << 8) | b as u32;
                    self.init_have += 1;
                }
                None => return Progress::Pending,
            }
        }
        self.range = RAC_MAX_RANGE;
        self.init_done = true;
        Progress::Ready(())
    }

    fn renorm(&mut self, input: &mut ByteSource) -> Progress<()> {
        while self.range <= RAC_MIN_RANGE {
            match input.next_byte() {
                Some(b) => {
                    self.low = (self.low << 8) | b as u32;
                    self.range <<= 8;
                }
                None => return Progress::Pending,
            }
        }
        Progress::Ready(())
    }

    /// Reads one bit at a flat (non-adaptive) 50/50 split. Used for
    /// transform-continue flags and uniform integers.
    pub fn read_equiprobable_bit(&mut self, input: &mut ByteSource) -> Progress<bool> {
        if self.pending_bit.is_none() {
            let split = self.range >> 1;
            self.pending_bit = Some(self.split_bit(split));
        }
        match self.renorm(input) {
            Progress::Ready(()) => Progress::Ready(self.pending_bit.take().unwrap()),
            Progress::Pending => Progress::Pending,
        }
    }

    /// Reads one bit against an adaptive 12-bit chance, updating the
    /// chance in place via `table`.
    pub fn read_chance_bit(
        &mut self,
        chance: &mut u16,
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<bool> {
        if self.pending_bit.is_none() {
            let split = (((self.range as u64) * (*chance as u64) + 0x800) >> 12) as u32;
            let bit = self.split_bit(split);
            *chance = if bit { table.one(*chance) } else { table.zero(*chance) };
            self.pending_bit = Some(bit);
        }
        match self.renorm(input) {
            Progress::Ready(()) => Progress::Ready(self.pending_bit.take().unwrap()),
            Progress::Pending => Progress::Pending,
        }
    }

    #[inline]
    fn split_bit(&mut self, split: u32) -> bool {
        if self.low < self.range - split {
            self.range -= split;
            false
        } else {
            self.low -= self.range - split;
            self.range = split;
            true
        }
    }
}

impl Default for RangeCoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_consumes_exactly_three_bytes() {
        let buf = [0x01, 0x02, 0x03, 0x04];
        let mut pos = 0usize;
        let mut rc = RangeCoder::new();
        let mut src = ByteSource::new(&buf, &mut pos);
        assert!(matches!(rc.init(&mut src), Progress::Ready(())));
        assert_eq!(pos, 3);
        assert_eq!(rc.range, RAC_MAX_RANGE);
    }

    #[test]
    fn init_suspends_on_short_input() {
        let buf = [0x01];
        let mut pos = 0usize;
        let mut rc = RangeCoder::new();
        let mut src = ByteSource::new(&buf, &mut pos);
        assert!(matches!(rc.init(&mut src), Progress::Pending));
        assert_eq!(pos, 1);
        // resuming with the rest completes it without re-reading byte 0.
        let buf2 = [0x02, 0x03];
        let mut pos2 = 0usize;
        let mut src2 = ByteSource::new(&buf2, &mut pos2);
        assert!(matches!(rc.init(&mut src2), Progress::Ready(())));
        assert_eq!(pos2, 2);
    }
}
