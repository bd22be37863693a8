//! Pixel-format packing (§6): turns a fully reversed [`Frame`] into the
//! flat byte buffer an application actually wants, the way the teacher
//! crate's `Frame` exposes packed `buf`/`buf16` rather than raw plane
//! storage.

use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Gray16,
    GrayAlpha8,
    GrayAlpha16,
    Rgb8,
    Rgb16,
    Rgba8,
    Rgba16,
}

pub struct PixelBuffer {
    pub format: PixelFormat,
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

/// Packs `frame`'s first `num_planes` planes (Y[,Co,Cg][,Alpha], already
/// reversed back to R/G/B order by the transform chain) into an
/// interleaved buffer. `bpc` selects 8-bit vs 16-bit (big-endian) samples,
/// per the secondary header's bit-depth field.
pub fn pack(frame: &Frame, num_planes: usize, bpc: u32) -> PixelBuffer {
    let wide = bpc > 255;
    let format = match (num_planes, wide) {
        (1, false) => PixelFormat::Gray8,
        (1, true) => PixelFormat::Gray16,
        (2, false) => PixelFormat::GrayAlpha8,
        (2, true) => PixelFormat::GrayAlpha16,
        (3, false) => PixelFormat::Rgb8,
        (3, true) => PixelFormat::Rgb16,
        (_, false) => PixelFormat::Rgba8,
        (_, true) => PixelFormat::Rgba16,
    };
    let bytes_per_sample = if wide { 2 } else { 1 };
    let mut data = Vec::with_capacity(frame.width * frame.height * num_planes * bytes_per_sample);
    for row in 0..frame.height as u32 {
        for col in 0..frame.width as u32 {
            for plane in 0..num_planes {
                let v = frame.get(plane, row, col).clamp(0, bpc as i32);
                if wide {
                    data.push((v >> 8) as u8);
                    data.push(v as u8);
                } else {
                    data.push(v as u8);
                }
            }
        }
    }
    PixelBuffer { format, width: frame.width, height: frame.height, data }
}

/// Zeroes Y/Co/Cg wherever alpha is fully transparent, per the
/// alphazero convention: invisible pixels carry whatever the fast
/// predictor happened to guess, which is not meaningful output.
pub fn clear_invisible(frame: &mut Frame, num_planes: usize) {
    if num_planes <= 3 {
        return;
    }
    let n = frame.width * frame.height;
    for idx in 0..n {
        if frame.planes[3].get(idx) == 0 {
            for plane in 0..3.min(num_planes) {
                frame.planes[plane].set(idx, 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_gray8_row_major() {
        let mut frame = Frame::new(2, 1, 1);
        frame.set(0, 0, 0, 10);
        frame.set(0, 0, 1, 20);
        let buf = pack(&frame, 1, 255);
        assert_eq!(buf.format, PixelFormat::Gray8);
        assert_eq!(buf.data, vec![10, 20]);
    }

    #[test]
    fn packs_rgb16_big_endian() {
        let mut frame = Frame::new(1, 1, 3);
        frame.set(0, 0, 0, 0x0102);
        frame.set(1, 0, 0, 0x0304);
        frame.set(2, 0, 0, 0x0506);
        let buf = pack(&frame, 3, 65535);
        assert_eq!(buf.format, PixelFormat::Rgb16);
        assert_eq!(buf.data, vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn clears_invisible_pixels() {
        let mut frame = Frame::new(1, 1, 4);
        frame.set(0, 0, 0, 77);
        frame.set(3, 0, 0, 0);
        clear_invisible(&mut frame, 4);
        assert_eq!(frame.get(0, 0, 0), 0);
    }
}
