//! Secondary, RAC-coded header (§6). Every field here is a flat
//! uniform-integer read against the coder — none of them consult a
//! chance context, mirroring the reference decoder's use of its
//! `FLIF16_RAC_UNI_INT*` reader for this whole section. The chance
//! table itself (built from `alpha`/`cut`) only comes into existence
//! once this section finishes.

use crate::constants::{CHANCETABLE_DEFAULT_ALPHA, CHANCETABLE_DEFAULT_CUT};
use crate::error::{Error, Result};
use crate::header::PrimaryHeader;
use crate::rangecoder::{RangeCoder, UniformIntReader};
use crate::resumable::{ByteSource, Progress};

#[derive(Debug, Clone)]
pub struct SecondaryHeader {
    pub bpc: u32,
    pub alphazero: bool,
    pub loops: u32,
    pub framedelay: Vec<u32>,
    pub cut: u32,
    pub alpha: u32,
}

#[derive(Clone, Copy, PartialEq)]
enum Stage {
    Bpc,
    BpcPerPlane(usize),
    Alphazero,
    Loops,
    FrameDelay(usize),
    CustomAlpha,
    Cut,
    Alpha,
    CustomBc,
}

pub struct SecondaryHeaderReader {
    stage: Stage,
    header: PrimaryHeader,
    reader: Option<UniformIntReader>,
    bpc: u32,
    alphazero: bool,
    loops: u32,
    framedelay: Vec<u32>,
    customalpha: bool,
    cut: u32,
    alpha: u32,
}

impl SecondaryHeaderReader {
    pub fn new(header: PrimaryHeader) -> Self {
        let num_frames = header.num_frames as usize;
        SecondaryHeaderReader {
            stage: Stage::Bpc,
            header,
            reader: None,
            bpc: 0,
            alphazero: false,
            loops: 0,
            framedelay: vec![0; num_frames],
            customalpha: false,
            cut: CHANCETABLE_DEFAULT_CUT,
            alpha: CHANCETABLE_DEFAULT_ALPHA,
        }
    }

    pub fn advance(&mut self, rc: &mut RangeCoder, input: &mut ByteSource) -> Progress<Result<SecondaryHeader>> {
        loop {
            match self.stage {
                Stage::Bpc => {
                    if self.header.bpc_code != b'0' {
                        self.bpc = if self.header.bpc_code == b'1' { 255 } else { 65535 };
                        self.stage = Stage::Alphazero;
                        continue;
                    }
                    self.stage = Stage::BpcPerPlane(0);
                }
                Stage::BpcPerPlane(plane) => {
                    if plane >= self.header.num_planes {
                        self.stage = Stage::Alphazero;
                        continue;
                    }
                    let r = self.reader.get_or_insert_with(|| UniformIntReader::new(1, 14));
                    match r.advance(rc, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(bits) => {
                            self.reader = None;
                            self.bpc = self.bpc.max((1u32 << bits) - 1);
                            self.stage = Stage::BpcPerPlane(plane + 1);
                        }
                    }
                }
                Stage::Alphazero => {
                    if self.header.num_planes <= 3 {
                        self.stage = Stage::Loops;
                        continue;
                    }
                    let r = self.reader.get_or_insert_with(|| UniformIntReader::new(0, 1));
                    match r.advance(rc, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(v) => {
                            self.reader = None;
                            self.alphazero = v != 0;
                            self.stage = Stage::Loops;
                        }
                    }
                }
                Stage::Loops => {
                    if !self.header.animated() {
                        self.stage = Stage::FrameDelay(self.header.num_frames as usize);
                        continue;
                    }
                    let r = self.reader.get_or_insert_with(|| UniformIntReader::new(0, 100));
                    match r.advance(rc, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(v) => {
                            self.reader = None;
                            self.loops = v as u32;
                            self.stage = Stage::FrameDelay(0);
                        }
                    }
                }
                Stage::FrameDelay(idx) => {
                    if !self.header.animated() || idx >= self.framedelay.len() {
                        self.stage = Stage::CustomAlpha;
                        continue;
                    }
                    let r = self.reader.get_or_insert_with(|| UniformIntReader::new(0, 60000));
                    match r.advance(rc, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(v) => {
                            self.reader = None;
                            self.framedelay[idx] = v as u32;
                            self.stage = Stage::FrameDelay(idx + 1);
                        }
                    }
                }
                Stage::CustomAlpha => {
                    let r = self.reader.get_or_insert_with(|| UniformIntReader::new(0, 1));
                    match r.advance(rc, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(v) => {
                            self.reader = None;
                            self.customalpha = v != 0;
                            self.stage = Stage::Cut;
                        }
                    }
                }
                Stage::Cut => {
                    if !self.customalpha {
                        self.stage = Stage::Alpha;
                        continue;
                    }
                    let r = self.reader.get_or_insert_with(|| UniformIntReader::new(1, 127));
                    match r.advance(rc, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(v) => {
                            self.reader = None;
                            self.cut = v as u32;
                            self.stage = Stage::Alpha;
                        }
                    }
                }
                Stage::Alpha => {
                    if !self.customalpha {
                        self.stage = Stage::CustomBc;
                        continue;
                    }
                    let r = self.reader.get_or_insert_with(|| UniformIntReader::new(2, 126));
                    match r.advance(rc, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(v) => {
                            self.reader = None;
                            self.alpha = 0xFFFF_FFFFu32 / v as u32;
                            self.stage = Stage::CustomBc;
                        }
                    }
                }
                Stage::CustomBc => {
                    if !self.customalpha {
                        return Progress::Ready(Ok(self.finish()));
                    }
                    let r = self.reader.get_or_insert_with(|| UniformIntReader::new(0, 1));
                    match r.advance(rc, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(v) => {
                            self.reader = None;
                            if v != 0 {
                                return Progress::Ready(Err(Error::Unsupported(
                                    "custom bitchance mode not implemented".into(),
                                )));
                            }
                            return Progress::Ready(Ok(self.finish()));
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> SecondaryHeader {
        SecondaryHeader {
            bpc: self.bpc,
            alphazero: self.alphazero,
            loops: self.loops,
            framedelay: std::mem::take(&mut self.framedelay),
            cut: self.cut,
            alpha: self.alpha,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resumable::ByteSource;

    fn still_header(num_planes: usize, bpc_code: u8) -> PrimaryHeader {
        PrimaryHeader { ia: 3, num_planes, bpc_code, width: 1, height: 1, num_frames: 1 }
    }

    #[test]
    fn defaults_without_customalpha() {
        // bpc fixed ('1'), no alpha plane, no animation: only the
        // customalpha bit (0) and custombc skip remain to be read.
        let header = still_header(3, b'1');
        let mut reader = SecondaryHeaderReader::new(header);
        let mut rc = RangeCoder::new();
        // 3 init bytes + enough zero bytes so every equiprobable bit reads 0.
        let bytes = [0u8; 16];
        let mut pos = 0;
        let mut src = ByteSource::new(&bytes, &mut pos);
        assert!(matches!(rc.init(&mut src), Progress::Ready(())));
        match reader.advance(&mut rc, &mut src) {
            Progress::Ready(Ok(sh)) => {
                assert_eq!(sh.bpc, 255);
                assert_eq!(sh.cut, CHANCETABLE_DEFAULT_CUT);
                assert_eq!(sh.alpha, CHANCETABLE_DEFAULT_ALPHA);
            }
            Progress::Ready(Err(e)) => panic!("unexpected error: {}", e),
            Progress::Pending => panic!("expected the secondary header to complete"),
        }
    }
}
