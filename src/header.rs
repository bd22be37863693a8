//! Bit-exact primary header (§6): magic, `(ia << 4) | num_planes` byte,
//! bpc-code byte, width/height/frame-count varints, and the metadata
//! chunk loop. None of this is RAC-coded; it is plain bytes, consumed
//! one at a time so the reader can suspend at any byte boundary.

use crate::error::{Error, Result};
use crate::resumable::{ByteSource, Progress};
use crate::varint::VarintReader;

const MAGIC: &[u8; 4] = b"FLIF";

/// Decoded primary header fields (§6).
#[derive(Debug, Clone)]
pub struct PrimaryHeader {
    /// `ia >> 0` raw nibble: 3/4 = still non-interlaced/interlaced,
    /// 5/6 = animation non-interlaced/interlaced.
    pub ia: u8,
    pub num_planes: usize,
    /// Raw bpc-code byte: `'0'` per-plane custom, `'1'` 8-bit, `'2'` 16-bit.
    pub bpc_code: u8,
    pub width: u32,
    pub height: u32,
    pub num_frames: u32,
}

impl PrimaryHeader {
    pub fn interlaced(&self) -> bool {
        self.ia % 2 == 0
    }

    pub fn animated(&self) -> bool {
        self.ia > 4
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Stage {
    Magic,
    IaPlanes,
    Bpc,
    Width,
    Height,
    Frames,
    MetaFirstByte,
    MetaTagRest(u8),
    MetaLen,
    MetaSkip(u32),
}

/// Resumable reader for the whole primary header, including the
/// metadata-chunk loop that follows the fixed fields.
pub struct HeaderReader {
    stage: Stage,
    magic_have: usize,
    ia: u8,
    num_planes: usize,
    bpc_code: u8,
    width: u32,
    height: u32,
    num_frames: u32,
    varint: VarintReader,
}

impl HeaderReader {
    pub fn new() -> Self {
        HeaderReader {
            stage: Stage::Magic,
            magic_have: 0,
            ia: 0,
            num_planes: 0,
            bpc_code: 0,
            width: 0,
            height: 0,
            num_frames: 1,
            varint: VarintReader::new(),
        }
    }

    pub fn advance(&mut self, input: &mut ByteSource) -> Progress<Result<PrimaryHeader>> {
        loop {
            match self.stage {
                Stage::Magic => {
                    while self.magic_have < 4 {
                        match input.next_byte() {
                            None => return Progress::Pending,
                            Some(b) => {
                                if b != MAGIC[self.magic_have] {
                                    return Progress::Ready(Err(Error::InvalidData(
                                        "bad magic number".into(),
                                    )));
                                }
                                self.magic_have += 1;
                            }
                        }
                    }
                    self.stage = Stage::IaPlanes;
                }
                Stage::IaPlanes => match input.next_byte() {
                    None => return Progress::Pending,
                    Some(b) => {
                        self.ia = b >> 4;
                        self.num_planes = (b & 0x0F) as usize;
                        if !(3..=6).contains(&self.ia) {
                            return Progress::Ready(Err(Error::InvalidData(format!(
                                "invalid ia nibble: {}",
                                self.ia
                            ))));
                        }
                        self.stage = Stage::Bpc;
                    }
                },
                Stage::Bpc => match input.next_byte() {
                    None => return Progress::Pending,
                    Some(b) => {
                        self.bpc_code = b;
                        self.varint = VarintReader::new();
                        self.stage = Stage::Width;
                    }
                },
                Stage::Width => match self.varint.advance(input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(v) => {
                        self.width = v as u32 + 1;
                        self.varint = VarintReader::new();
                        self.stage = Stage::Height;
                    }
                },
                Stage::Height => match self.varint.advance(input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(v) => {
                        self.height = v as u32 + 1;
                        if self.ia > 4 {
                            self.varint = VarintReader::new();
                            self.stage = Stage::Frames;
                        } else {
                            self.num_frames = 1;
                            self.stage = Stage::MetaFirstByte;
                        }
                    }
                },
                Stage::Frames => match self.varint.advance(input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(v) => {
                        self.num_frames = v as u32 + 2;
                        self.stage = Stage::MetaFirstByte;
                    }
                },
                Stage::MetaFirstByte => match input.next_byte() {
                    None => return Progress::Pending,
                    Some(0) => {
                        return Progress::Ready(Ok(PrimaryHeader {
                            ia: self.ia,
                            num_planes: self.num_planes,
                            bpc_code: self.bpc_code,
                            width: self.width,
                            height: self.height,
                            num_frames: self.num_frames,
                        }));
                    }
                    Some(_) => self.stage = Stage::MetaTagRest(0),
                },
                Stage::MetaTagRest(n) => {
                    if n >= 3 {
                        self.varint = VarintReader::new();
                        self.stage = Stage::MetaLen;
                        continue;
                    }
                    match input.next_byte() {
                        None => return Progress::Pending,
                        Some(_) => self.stage = Stage::MetaTagRest(n + 1),
                    }
                }
                Stage::MetaLen => match self.varint.advance(input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(len) => self.stage = Stage::MetaSkip(len as u32),
                },
                Stage::MetaSkip(remaining) => {
                    let mut left = remaining;
                    while left > 0 {
                        match input.next_byte() {
                            None => {
                                self.stage = Stage::MetaSkip(left);
                                return Progress::Pending;
                            }
                            Some(_) => left -= 1,
                        }
                    }
                    self.stage = Stage::MetaFirstByte;
                }
            }
        }
    }
}

impl Default for HeaderReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(bytes: &[u8]) -> PrimaryHeader {
        let mut pos = 0;
        let mut r = HeaderReader::new();
        let mut src = ByteSource::new(bytes, &mut pos);
        match r.advance(&mut src) {
            Progress::Ready(Ok(h)) => h,
            Progress::Ready(Err(e)) => panic!("unexpected error: {}", e),
            Progress::Pending => panic!("expected a complete header"),
        }
    }

    #[test]
    fn minimal_still_header() {
        // "FLIF" + ia=3/planes=1 + bpc='1' + width-1=0 + height-1=0 + meta-end.
        let bytes = [b'F', b'L', b'I', b'F', 0x31, 0x31, 0x00, 0x00, 0x00];
        let h = run(&bytes);
        assert_eq!(h.ia, 3);
        assert_eq!(h.num_planes, 1);
        assert_eq!(h.width, 1);
        assert_eq!(h.height, 1);
        assert_eq!(h.num_frames, 1);
        assert!(!h.interlaced());
        assert!(!h.animated());
    }

    #[test]
    fn animated_header_reads_frame_count() {
        let bytes = [b'F', b'L', b'I', b'F', 0x61, 0x33, 0x00, 0x01, 0x00, 0x00];
        let h = run(&bytes);
        assert_eq!(h.ia, 6);
        assert_eq!(h.num_planes, 3);
        assert_eq!(h.num_frames, 2);
        assert!(h.animated());
        assert!(h.interlaced());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let bytes = [b'X', b'L', b'I', b'F'];
        let mut pos = 0;
        let mut r = HeaderReader::new();
        let mut src = ByteSource::new(&bytes, &mut pos);
        assert!(matches!(r.advance(&mut src), Progress::Ready(Err(Error::InvalidData(_)))));
    }

    #[test]
    fn resumes_mid_metadata_skip() {
        let bytes = [
            b'F', b'L', b'I', b'F', 0x31, 0x31, 0x00, 0x00, // fixed fields
            b'x', b'x', b'x', b'x', // 4-byte tag
            0x02, // varint len = 2
            0xAA, 0xBB, // payload
            0x00, // terminator
        ];
        let mut r = HeaderReader::new();
        let mut pos = 0;
        {
            let mut src = ByteSource::new(&bytes[..bytes.len() - 2], &mut pos);
            assert!(matches!(r.advance(&mut src), Progress::Pending));
        }
        let mut pos2 = 0;
        let mut src2 = ByteSource::new(&bytes[pos..], &mut pos2);
        let result = r.advance(&mut src2);
        assert!(matches!(result, Progress::Ready(Ok(_))));
    }
}
