//! Pixel predictors and property-vector builders for both scan orders
//! (§4.4 non-interlaced, §4.5 interlaced).

use crate::frame::FrameSet;
use crate::ranges::RangesStack;

/// Three-pixel median, used by every predictor variant.
#[inline]
pub fn median3(a: i32, b: i32, c: i32) -> i32 {
    a + b + c - a.min(b).min(c) - a.max(b).max(c)
}

/// Fast path used when a pixel is skipped (alphazero or lookback): one
/// of three invisible-pixel predictor variants (§6's `ipp`), no property
/// vector, no `snap`. `ipp`: 0 = mean of left/top, 1 = gradient median
/// (the reference decoder's unconditional default, used whenever the
/// stream doesn't carry an explicit `ipp` field), 2 = plain median of
/// left/top/topleft.
pub fn ni_predict(frames: &FrameSet, frame: usize, plane: usize, r: u32, c: u32, gray: i32, ipp: i32) -> i32 {
    let left = if c > 0 {
        frames.get(frame, plane, r, c - 1)
    } else if r > 0 {
        frames.get(frame, plane, r - 1, c)
    } else {
        gray
    };
    let top = if r > 0 { frames.get(frame, plane, r - 1, c) } else { left };
    let topleft = if r > 0 && c > 0 { frames.get(frame, plane, r - 1, c - 1) } else { top };
    match ipp {
        0 => (left + top) >> 1,
        1 => {
            let gradient_tl = left + top - topleft;
            median3(gradient_tl, left, top)
        }
        _ => median3(left, top, topleft),
    }
}

/// Builds the non-interlaced property vector and returns the snapped
/// guess. `nobordercases` lets the row-interior fast path (§4.4) skip
/// the edge-conditionals it already knows can't apply.
#[allow(clippy::too_many_arguments)]
pub fn ni_predict_calcprops(
    frames: &FrameSet,
    ranges: &RangesStack,
    frame: usize,
    plane: usize,
    r: u32,
    c: u32,
    width: u32,
    fallback: i32,
    nobordercases: bool,
    num_planes: usize,
    properties: &mut Vec<i32>,
) -> i32 {
    properties.clear();
    if plane < 3 {
        for pp in 0..plane {
            properties.push(frames.get(frame, pp, r, c));
        }
        if num_planes > 3 {
            properties.push(frames.get(frame, 3, r, c));
        }
    }

    let left = if nobordercases || c > 0 {
        frames.get(frame, plane, r, c - 1)
    } else if r > 0 {
        frames.get(frame, plane, r - 1, c)
    } else {
        fallback
    };
    let top = if nobordercases || r > 0 { frames.get(frame, plane, r - 1, c) } else { left };
    let topleft = if nobordercases || (r > 0 && c > 0) {
        frames.get(frame, plane, r - 1, c - 1)
    } else if r > 0 {
        top
    } else {
        left
    };
    let gradient_tl = left + top - topleft;
    let mut guess = median3(gradient_tl, left, top);

    let prev: Vec<i32> = properties.clone();
    ranges.snap(plane, &prev, &mut guess);

    let which = if guess == gradient_tl {
        0
    } else if guess == left {
        1
    } else if guess == top {
        2
    } else {
        3
    };

    properties.push(guess);
    properties.push(which);

    if nobordercases || (c > 0 && r > 0) {
        properties.push(left - topleft);
        properties.push(topleft - top);
    } else {
        properties.push(0);
        properties.push(0);
    }

    if nobordercases || (c + 1 < width && r > 0) {
        properties.push(top - frames.get(frame, plane, r - 1, c + 1));
    } else {
        properties.push(0);
    }

    if nobordercases || r > 1 {
        properties.push(frames.get(frame, plane, r - 2, c) - top);
    } else {
        properties.push(0);
    }

    if nobordercases || c > 1 {
        properties.push(frames.get(frame, plane, r, c - 2) - left);
    } else {
        properties.push(0);
    }

    guess
}

/// Interlaced horizontal predictor (§4.5, even zoomlevels: filling odd
/// rows between known rows). `predictor` selects mean-of-two (0),
/// median-of-gradient (1), or straight median (else).
pub fn predict_horizontal(
    frames: &FrameSet,
    frame: usize,
    plane: usize,
    z: i32,
    r: u32,
    c: u32,
    rows: u32,
    predictor: i32,
    lookback_plane: usize,
) -> i32 {
    if plane == lookback_plane {
        return 0;
    }
    let top = frame_getz(frames, frame, plane, z, r.wrapping_sub(1), c);
    let bottom = if r + 1 < rows { frame_getz(frames, frame, plane, z, r + 1, c) } else { top };
    match predictor {
        0 => (top + bottom) >> 1,
        1 => {
            let avg = (top + bottom) >> 1;
            let left = if c > 0 { frame_getz(frames, frame, plane, z, r, c - 1) } else { top };
            let topleft = if c > 0 { frame_getz(frames, frame, plane, z, r.wrapping_sub(1), c - 1) } else { top };
            let bottomleft = if c > 0 && r + 1 < rows {
                frame_getz(frames, frame, plane, z, r + 1, c - 1)
            } else {
                left
            };
            median3(avg, left + top - topleft, left + bottom - bottomleft)
        }
        _ => {
            let left = if c > 0 { frame_getz(frames, frame, plane, z, r, c - 1) } else { top };
            median3(top, bottom, left)
        }
    }
}

/// Interlaced vertical predictor (§4.5, odd zoomlevels: filling odd
/// columns between known columns).
pub fn predict_vertical(
    frames: &FrameSet,
    frame: usize,
    plane: usize,
    z: i32,
    r: u32,
    c: u32,
    cols: u32,
    predictor: i32,
    lookback_plane: usize,
) -> i32 {
    if plane == lookback_plane {
        return 0;
    }
    let left = frame_getz(frames, frame, plane, z, r, c.wrapping_sub(1));
    let right = if c + 1 < cols { frame_getz(frames, frame, plane, z, r, c + 1) } else { left };
    match predictor {
        0 => (left + right) >> 1,
        1 => {
            let avg = (left + right) >> 1;
            let top = if r > 0 { frame_getz(frames, frame, plane, z, r - 1, c) } else { left };
            let topleft = if r > 0 { frame_getz(frames, frame, plane, z, r - 1, c.wrapping_sub(1)) } else { left };
            let topright = if r > 0 && c + 1 < cols {
                frame_getz(frames, frame, plane, z, r - 1, c + 1)
            } else {
                top
            };
            median3(avg, left + top - topleft, right + top - topright)
        }
        _ => {
            let top = if r > 0 { frame_getz(frames, frame, plane, z, r - 1, c) } else { left };
            median3(top, left, right)
        }
    }
}

/// Builds the interlaced property vector (§4.2) and returns the
/// snapped guess for `(plane, z, r, c)`. Mirrors [`ni_predict_calcprops`]
/// but on the zoomed grid, using whichever of the horizontal/vertical
/// predictors matches the zoomlevel's parity. Property order follows
/// [`crate::maniac::prop_ranges_init`]: prior-plane values, optional
/// alpha, which-predictor, a chroma-vs-luma delta for Co/Cg, four scan
/// neighbour deltas, the guess, and (except for Cg) two more deltas.
#[allow(clippy::too_many_arguments)]
pub fn i_predict_calcprops(
    frames: &FrameSet,
    ranges: &RangesStack,
    frame: usize,
    plane: usize,
    z: i32,
    r: u32,
    c: u32,
    rows: u32,
    cols: u32,
    predictor: i32,
    num_planes: usize,
    lookback_plane: usize,
    properties: &mut Vec<i32>,
) -> i32 {
    properties.clear();
    let horizontal = z % 2 == 0;

    if plane < 3 {
        for pp in 0..plane {
            properties.push(frame_getz(frames, frame, pp, z, r, c));
        }
        if num_planes > 3 {
            properties.push(frame_getz(frames, frame, 3, z, r, c));
        }
    }

    let mut guess = if horizontal {
        predict_horizontal(frames, frame, plane, z, r, c, rows, predictor, lookback_plane)
    } else {
        predict_vertical(frames, frame, plane, z, r, c, cols, predictor, lookback_plane)
    };
    let prev: Vec<i32> = properties.clone();
    ranges.snap(plane, &prev, &mut guess);

    let (primary, secondary) = if horizontal {
        (
            frame_getz(frames, frame, plane, z, r.wrapping_sub(1), c),
            if r + 1 < rows { frame_getz(frames, frame, plane, z, r + 1, c) } else { 0 },
        )
    } else {
        (
            frame_getz(frames, frame, plane, z, r, c.wrapping_sub(1)),
            if c + 1 < cols { frame_getz(frames, frame, plane, z, r, c + 1) } else { 0 },
        )
    };
    let which = if guess == (primary + secondary) >> 1 {
        0
    } else if guess == primary {
        1
    } else {
        2
    };
    properties.push(which);

    if plane == 1 || plane == 2 {
        let mut y_guess = if horizontal {
            predict_horizontal(frames, frame, 0, z, r, c, rows, predictor, lookback_plane)
        } else {
            predict_vertical(frames, frame, 0, z, r, c, cols, predictor, lookback_plane)
        };
        ranges.snap(0, &[], &mut y_guess);
        let y_actual = frame_getz(frames, frame, 0, z, r, c);
        properties.push(y_actual - y_guess);
    }

    if horizontal {
        let top = frame_getz(frames, frame, plane, z, r.wrapping_sub(1), c);
        let top2 = frame_getz(frames, frame, plane, z, r.wrapping_sub(1).wrapping_sub(1), c);
        let bottom = if r + 1 < rows { frame_getz(frames, frame, plane, z, r + 1, c) } else { top };
        let bottom2 =
            if r + 2 < rows { frame_getz(frames, frame, plane, z, r + 2, c) } else { bottom };
        properties.push(top - top2);
        properties.push(bottom - bottom2);
        let left = if c > 0 { frame_getz(frames, frame, plane, z, r, c.wrapping_sub(1)) } else { top };
        let right = if c + 1 < cols { frame_getz(frames, frame, plane, z, r, c + 1) } else { left };
        properties.push(left - top);
        properties.push(right - bottom);
    } else {
        let left = frame_getz(frames, frame, plane, z, r, c.wrapping_sub(1));
        let left2 = frame_getz(frames, frame, plane, z, r, c.wrapping_sub(1).wrapping_sub(1));
        let right = if c + 1 < cols { frame_getz(frames, frame, plane, z, r, c + 1) } else { left };
        let right2 = if c + 2 < cols { frame_getz(frames, frame, plane, z, r, c + 2) } else { right };
        properties.push(left - left2);
        properties.push(right - right2);
        let top = if r > 0 { frame_getz(frames, frame, plane, z, r.wrapping_sub(1), c) } else { left };
        let bottom = if r + 1 < rows { frame_getz(frames, frame, plane, z, r + 1, c) } else { top };
        properties.push(top - left);
        properties.push(bottom - right);
    }

    properties.push(guess);

    if plane != 2 {
        if horizontal {
            let topleft = if c > 0 {
                frame_getz(frames, frame, plane, z, r.wrapping_sub(1), c.wrapping_sub(1))
            } else {
                0
            };
            let bottomleft = if c > 0 && r + 1 < rows {
                frame_getz(frames, frame, plane, z, r + 1, c.wrapping_sub(1))
            } else {
                0
            };
            properties.push(guess - topleft);
            properties.push(guess - bottomleft);
        } else {
            let topleft = if r > 0 {
                frame_getz(frames, frame, plane, z, r.wrapping_sub(1), c.wrapping_sub(1))
            } else {
                0
            };
            let topright = if r > 0 && c + 1 < cols {
                frame_getz(frames, frame, plane, z, r.wrapping_sub(1), c + 1)
            } else {
                0
            };
            properties.push(guess - topleft);
            properties.push(guess - topright);
        }
    }

    guess
}

#[inline]
fn frame_getz(frames: &FrameSet, frame: usize, plane: usize, z: i32, r: u32, c: u32) -> i32 {
    // `r`/`c` wrap to `u32::MAX` for an out-of-range predecessor only
    // when the caller has already guarded the corresponding border
    // case, so the multiplied zoom coordinate is never dereferenced.
    if r == u32::MAX || c == u32::MAX {
        return 0;
    }
    frames.resolved_frame(frame).getz(plane, z, r, c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median3_matches_definition() {
        assert_eq!(median3(1, 5, 3), 3);
        assert_eq!(median3(5, 1, 3), 3);
        assert_eq!(median3(-5, 5, 0), 0);
    }
}
