//! Integer coders built on the range coder's bit primitives (§4.1):
//! uniform, near-zero (NZ) and general-NZ (GNZ).

use super::{ChanceContext, ChanceTable, RangeCoder};
use crate::resumable::{ByteSource, Progress};

/// Reads an integer uniformly distributed in `[min, min+len]` by
/// recursive binary search: each equiprobable bit halves the remaining
/// `[lo, hi]` window. The window itself is the resumable state — no
/// separate segment counter is needed.
pub struct UniformIntReader {
    lo: i64,
    hi: i64,
    min: i64,
}

impl UniformIntReader {
    pub fn new(min: i32, len: i32) -> Self {
        UniformIntReader {
            lo: 0,
            hi: len as i64,
            min: min as i64,
        }
    }

    pub fn advance(&mut self, rc: &mut RangeCoder, input: &mut ByteSource) -> Progress<i32> {
        loop {
            if self.lo >= self.hi {
                return Progress::Ready((self.min + self.lo) as i32);
            }
            let mid = self.lo + (self.hi - self.lo + 1) / 2;
            match rc.read_equiprobable_bit(input) {
                Progress::Pending => return Progress::Pending,
                Progress::Ready(bit) => {
                    if bit {
                        self.lo = mid;
                    } else {
                        self.hi = mid - 1;
                    }
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Stage {
    Zero,
    Sign,
    Exp,
    Mantissa,
    Done,
}

/// Resumable near-zero integer reader. Field names follow §4.1/§5's
/// description of the persisted locals: `sign`, `e` (exponent),
/// `have`/`left` (accumulated magnitude and remaining mantissa mask),
/// `minabs1`/`maxabs0` (magnitude bounds for the decided sign), `pos`
/// (current mantissa bit position).
pub struct NzIntReader {
    stage: Stage,
    min: i64,
    max: i64,
    sign: bool,
    minabs1: i64,
    maxabs0: i64,
    emax: i32,
    e: i32,
    have: i64,
    left: i64,
    pos: i32,
}

impl NzIntReader {
    pub fn new(min: i32, max: i32) -> Self {
        debug_assert!(min <= 0 && 0 <= max);
        NzIntReader {
            stage: Stage::Zero,
            min: min as i64,
            max: max as i64,
            sign: false,
            minabs1: 1,
            maxabs0: 0,
            emax: 0,
            e: 0,
            have: 0,
            left: 0,
            pos: 0,
        }
    }

    pub fn advance(
        &mut self,
        rc: &mut RangeCoder,
        ctx: &mut ChanceContext,
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<i32> {
        if self.min == self.max {
            return Progress::Ready(self.min as i32);
        }
        loop {
            match self.stage {
                Stage::Zero => match rc.read_chance_bit(&mut ctx.zero, table, input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(true) => return Progress::Ready(0),
                    Progress::Ready(false) => self.stage = Stage::Sign,
                },
                Stage::Sign => {
                    if self.min < 0 && self.max > 0 {
                        match rc.read_chance_bit(&mut ctx.sign, table, input) {
                            Progress::Pending => return Progress::Pending,
                            Progress::Ready(bit) => self.sign = bit,
                        }
                    } else {
                        self.sign = self.max > 0;
                    }
                    self.maxabs0 = if self.sign { self.max } else { -self.min };
                    self.emax = ilog2(self.maxabs0);
                    self.e = 0;
                    self.stage = Stage::Exp;
                }
                Stage::Exp => {
                    while self.e < self.emax {
                        match rc.read_chance_bit(&mut ctx.exp[ctx_exp_index(self.e)], table, input)
                        {
                            Progress::Pending => return Progress::Pending,
                            Progress::Ready(false) => break,
                            Progress::Ready(true) => self.e += 1,
                        }
                    }
                    self.have = 1i64 << self.e;
                    self.left = self.have - 1;
                    self.pos = self.e - 1;
                    self.stage = Stage::Mantissa;
                }
                Stage::Mantissa => {
                    let maxv = if self.e == self.emax {
                        self.maxabs0
                    } else {
                        (1i64 << (self.e + 1)) - 1
                    };
                    let minv = self.minabs1.max(1i64 << self.e);
                    while self.pos >= 0 {
                        let bitval = 1i64 << self.pos;
                        let with_one = self.have | bitval;
                        let hi_valid = with_one <= maxv;
                        if !hi_valid {
                            self.pos -= 1;
                            continue;
                        }
                        let remaining_mask = bitval - 1;
                        let lo_valid = self.have + remaining_mask >= minv;
                        if !lo_valid {
                            self.have = with_one;
                            self.pos -= 1;
                            continue;
                        }
                        match rc.read_chance_bit(
                            &mut ctx.mant[ctx_mant_index(self.pos)],
                            table,
                            input,
                        ) {
                            Progress::Pending => return Progress::Pending,
                            Progress::Ready(true) => self.have = with_one,
                            Progress::Ready(false) => {}
                        }
                        self.pos -= 1;
                    }
                    self.stage = Stage::Done;
                }
                Stage::Done => {
                    let magnitude = self.have;
                    return Progress::Ready(if self.sign { magnitude as i32 } else { -(magnitude as i32) });
                }
            }
        }
    }
}

fn ctx_exp_index(e: i32) -> usize {
    (e as usize).min(super::chances::EXP_CHANCES - 1)
}

fn ctx_mant_index(pos: i32) -> usize {
    (pos.max(0) as usize).min(super::chances::MANT_CHANCES - 1)
}

fn ilog2(v: i64) -> i32 {
    if v <= 1 {
        0
    } else {
        63 - v.leading_zeros() as i32
    }
}

/// General near-zero integer: translates `[min, max]` so that 0 falls
/// inside, runs the NZ reader, then translates the result back.
pub struct GnzIntReader {
    inner: NzIntReader,
    shift: i64,
}

impl GnzIntReader {
    pub fn new(min: i32, max: i32) -> Self {
        let (min, max) = (min as i64, max as i64);
        let shift = if min > 0 {
            min
        } else if max < 0 {
            max
        } else {
            0
        };
        GnzIntReader {
            inner: NzIntReader::new((min - shift) as i32, (max - shift) as i32),
            shift,
        }
    }

    pub fn advance(
        &mut self,
        rc: &mut RangeCoder,
        ctx: &mut ChanceContext,
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<i32> {
        self.inner
            .advance(rc, ctx, table, input)
            .map(|v| (v as i64 + self.shift) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ilog2_matches_expected_bit_lengths() {
        assert_eq!(ilog2(1), 0);
        assert_eq!(ilog2(2), 1);
        assert_eq!(ilog2(3), 1);
        assert_eq!(ilog2(4), 2);
        assert_eq!(ilog2(511), 8);
        assert_eq!(ilog2(512), 9);
    }
}
