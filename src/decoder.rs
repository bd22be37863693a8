//! Top-level pull decoder (§2, §6): drives
//! `HEADER → SECOND_HEADER → TRANSFORM → MANIAC → PIXELDATA → OUTPUT →
//! CHECKSUM → EOS` one `decode()` call at a time, suspending cleanly at
//! any byte boundary the way the teacher's `Decoder::decode_frame`
//! drives its own per-slice loop, generalized to resume across
//! arbitrary input chunking instead of assuming a whole slice is always
//! available up front.

use std::collections::VecDeque;

use log::{debug, trace, warn};

use crate::checksum::Checksum;
use crate::constants::{MAX_PREDICTORS, PLANE_ALPHA, PLANE_CG, PLANE_CO, PLANE_LOOKBACK, PLANE_ORDERING, PLANE_Y};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameSet, PlaneData};
use crate::header::{HeaderReader, PrimaryHeader};
use crate::maniac::{ni_prop_ranges_init, prop_ranges_init, ManiacIntReader, ManiacTree, ManiacTreeReader};
use crate::output::{self, PixelBuffer};
use crate::pred::{i_predict_calcprops, ni_predict, ni_predict_calcprops};
use crate::rangecoder::{ChanceContext, ChanceTable, GnzIntReader, RangeCoder, UniformIntReader};
use crate::ranges::{RangesKind, RangesStack};
use crate::resumable::{ByteSource, Progress};
use crate::secondary_header::{SecondaryHeader, SecondaryHeaderReader};
use crate::transforms::{
    self, BoundsReader, ChannelCompactReader, ColorBucketsReader, DuplicateFrameReader,
    FrameLookbackReader, FrameShapeReader, PaletteReader, PermutePlanesReader, Transform,
    TransformChanceContexts, TransformReader, UniformTagReader,
};
use crate::constants::{
    TRANSFORM_BOUNDS, TRANSFORM_CHANNELCOMPACT, TRANSFORM_COLORBUCKETS, TRANSFORM_DUPLICATEFRAME,
    TRANSFORM_FRAMELOOKBACK, TRANSFORM_FRAMESHAPE, TRANSFORM_PALETTE, TRANSFORM_PALETTEALPHA,
    TRANSFORM_PERMUTEPLANES, TRANSFORM_YCOCG,
};

/// Result of one `decode()` call (§6's pull interface).
pub enum DecodeStatus {
    /// A complete frame is ready.
    Yield(PixelBuffer),
    /// More input bytes are required before any further progress can be
    /// reported; call `decode` again with additional bytes appended.
    NeedMoreInput,
    /// Every frame has been yielded and the trailing checksum (if any)
    /// has been verified.
    EndOfStream,
}

/// Cursor over one plane's pixel scan, shared by both scan orders.
/// `z` is unused (left at 0) for the non-interlaced scan. `top_left`
/// only ever lives across the single root-level pixel of an interlaced
/// plane, read as a plain uniform integer ahead of any tree-based
/// decode (§6's "max-zoomlevel-size decoded top-left pixels").
struct PixelCursor {
    plane_pos: usize,
    z: i32,
    r: u32,
    c: u32,
    maniac: ManiacIntReader,
    top_left: Option<UniformIntReader>,
}

impl PixelCursor {
    fn new(z: i32) -> Self {
        PixelCursor { plane_pos: 0, z, r: 0, c: 0, maniac: ManiacIntReader::new(), top_left: None }
    }
}

enum Phase {
    Header(HeaderReader),
    RacInit,
    SecondHeader(SecondaryHeaderReader),
    TransformContinue,
    TransformTag(UniformTagReader),
    TransformParams(u32, TransformReader),
    Ipp(UniformIntReader),
    DefaultOrder,
    ReadPredictors(usize, UniformIntReader),
    RoughZl(GnzIntReader),
    RoughPixelData(Box<PixelCursor>),
    BuildTrees(usize, ManiacTreeReader, Box<[ChanceContext; 3]>),
    PixelData(usize, Box<PixelCursor>),
    Finish,
    Checksum,
    Done,
}

/// The FLIF16 bytestream decoder. Construction takes no external
/// configuration (§7b) — every behavioural knob lives in the bytestream
/// itself.
pub struct Decoder {
    buf: Vec<u8>,
    pos: usize,
    phase: Phase,
    header: Option<PrimaryHeader>,
    secondary: Option<SecondaryHeader>,
    rc: RangeCoder,
    table: Option<ChanceTable>,
    transform_ctx: TransformChanceContexts,
    interlace_ctx: ChanceContext,
    transforms: Vec<Transform>,
    ranges: RangesStack,
    plane_list: Vec<usize>,
    predictors: Vec<i32>,
    trees: Vec<ManiacTree>,
    rough_trees: Vec<ManiacTree>,
    rough_zl: i32,
    /// Invisible-pixel predictor variant (§6's `ipp`), read only when the
    /// stream carries one; otherwise left at the reference decoder's
    /// unconditional default.
    ipp: i32,
    /// `seen_before[i] >= 0` means frame `i` has no pixel data of its
    /// own in the bytestream and aliases frame `seen_before[i]`.
    seen_before: Vec<i32>,
    /// Per-frame, per-row `(col_begin, col_end)` from the frame-shape
    /// transform, applied to the frame store as soon as it's known
    /// (before pixel data begins, not only at output time).
    frame_shape: Vec<Vec<(u32, u32)>>,
    frames: Option<FrameSet>,
    output_queue: VecDeque<PixelBuffer>,
    checksum_digest: u32,
    checksum_bytes: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            buf: Vec::new(),
            pos: 0,
            phase: Phase::Header(HeaderReader::new()),
            header: None,
            secondary: None,
            rc: RangeCoder::new(),
            table: None,
            transform_ctx: TransformChanceContexts::default(),
            interlace_ctx: ChanceContext::default(),
            transforms: Vec::new(),
            ranges: RangesStack::new(),
            plane_list: Vec::new(),
            predictors: Vec::new(),
            trees: Vec::new(),
            rough_trees: Vec::new(),
            rough_zl: i32::MAX,
            ipp: 1,
            seen_before: Vec::new(),
            frame_shape: Vec::new(),
            frames: None,
            output_queue: VecDeque::new(),
            checksum_digest: 0,
            checksum_bytes: Vec::new(),
        }
    }

    /// Appends `input` to the buffered stream and makes as much progress
    /// as the now-available bytes allow.
    pub fn decode(&mut self, input: &[u8]) -> Result<DecodeStatus> {
        self.buf.extend_from_slice(input);
        loop {
            if let Some(frame) = self.output_queue.pop_front() {
                return Ok(DecodeStatus::Yield(frame));
            }
            let mut src = ByteSource::new(&self.buf, &mut self.pos);
            match self.step(&mut src)? {
                Progress::Pending => return Ok(DecodeStatus::NeedMoreInput),
                Progress::Ready(true) => continue,
                Progress::Ready(false) => return Ok(DecodeStatus::EndOfStream),
            }
        }
    }

    fn max_z(&self) -> i32 {
        match &self.header {
            Some(h) if h.interlaced() => max_zoomlevel(h.width, h.height),
            _ => 0,
        }
    }

    fn is_aliased(&self, frame_idx: usize) -> bool {
        self.seen_before.get(frame_idx).copied().unwrap_or(-1) >= 0
    }

    /// Starting zoomlevel for `frame_idx`'s main (real-tree) pixel pass.
    /// Frame 0 skips straight past whatever the rough pass (§4.5) already
    /// covered; every other frame starts at the true root.
    fn initial_z(&self, frame_idx: usize) -> i32 {
        let max_z = self.max_z();
        if frame_idx == 0 && self.rough_zl < max_z {
            self.rough_zl - 1
        } else {
            max_z
        }
    }

    fn initial_cursor(&self, frame_idx: usize) -> Box<PixelCursor> {
        let z0 = self.initial_z(frame_idx);
        let mut cursor = PixelCursor::new(z0.max(0));
        if z0 < 0 {
            // The rough pass already decoded every zoomlevel for this
            // frame; nothing is left for the real-tree pass.
            cursor.plane_pos = self.plane_list.len();
        }
        Box::new(cursor)
    }

    /// Zoomlevel a plane resets to when the current one finishes. Mirrors
    /// [`Decoder::initial_z`] so frame 0's planes don't re-decode the
    /// zoomlevels the rough pass already consumed.
    fn plane_reset_z(&self, frame_idx: usize) -> i32 {
        self.initial_z(frame_idx).max(0)
    }

    /// Allocates frame storage once the transform chain (and therefore
    /// the final plane count) is known, applying `seen_before`/frame
    /// shape immediately so the pixel decoders can consult them, rather
    /// than waiting for the post-decode reverse pass.
    fn ensure_frames(&mut self) {
        if self.frames.is_some() {
            return;
        }
        let header = self.header.as_ref().unwrap();
        let num_planes_storage = self.ranges.num_planes(header.num_planes);
        let mut frames = FrameSet::new(
            header.num_frames as usize,
            header.width as usize,
            header.height as usize,
            num_planes_storage,
        );
        for frame in frames.frames.iter_mut() {
            for plane in 0..num_planes_storage {
                if self.ranges.min(plane) >= self.ranges.max(plane) {
                    frame.planes[plane] = PlaneData::Constant(self.ranges.min(plane));
                }
            }
        }
        if !self.seen_before.is_empty() {
            frames.apply_seen_before(&self.seen_before);
        }
        if !self.frame_shape.is_empty() {
            frames.apply_shape(&self.frame_shape);
        }
        self.frames = Some(frames);
    }

    /// Advances the state machine by one phase transition. Returns
    /// `Ready(true)` when callers should loop and check again (possibly
    /// after a new frame landed in the output queue), `Ready(false)`
    /// once the stream is fully drained.
    fn step(&mut self, input: &mut ByteSource) -> Result<Progress<bool>> {
        let phase = std::mem::replace(&mut self.phase, Phase::Done);
        match phase {
            Phase::Header(mut reader) => match reader.advance(input) {
                Progress::Pending => {
                    self.phase = Phase::Header(reader);
                    Ok(Progress::Pending)
                }
                Progress::Ready(Err(e)) => Err(e),
                Progress::Ready(Ok(header)) => {
                    debug!(
                        "primary header: {}x{}, ia={}, planes={}",
                        header.width, header.height, header.ia, header.num_planes
                    );
                    self.header = Some(header);
                    self.phase = Phase::RacInit;
                    Ok(Progress::Ready(true))
                }
            },
            Phase::RacInit => match self.rc.init(input) {
                Progress::Pending => {
                    self.phase = Phase::RacInit;
                    Ok(Progress::Pending)
                }
                Progress::Ready(()) => {
                    let header = self.header.clone().expect("header set before RAC init");
                    self.phase = Phase::SecondHeader(SecondaryHeaderReader::new(header));
                    Ok(Progress::Ready(true))
                }
            },
            Phase::SecondHeader(mut reader) => match reader.advance(&mut self.rc, input) {
                Progress::Pending => {
                    self.phase = Phase::SecondHeader(reader);
                    Ok(Progress::Pending)
                }
                Progress::Ready(Err(e)) => Err(e),
                Progress::Ready(Ok(secondary)) => {
                    debug!("secondary header: bpc={}, alphazero={}", secondary.bpc, secondary.alphazero);
                    self.table = Some(ChanceTable::new(secondary.alpha, secondary.cut));
                    let header = self.header.as_ref().unwrap();
                    let bounds = (0..header.num_planes).map(|_| (0, secondary.bpc as i32)).collect();
                    self.secondary = Some(secondary);
                    self.ranges.push(RangesKind::Static { bounds });
                    self.phase = Phase::TransformContinue;
                    Ok(Progress::Ready(true))
                }
            },
            Phase::TransformContinue => match self.rc.read_equiprobable_bit(input) {
                Progress::Pending => {
                    self.phase = Phase::TransformContinue;
                    Ok(Progress::Pending)
                }
                Progress::Ready(false) => {
                    self.phase = self.start_pixel_pipeline();
                    Ok(Progress::Ready(true))
                }
                Progress::Ready(true) => {
                    self.phase = Phase::TransformTag(UniformTagReader::new());
                    Ok(Progress::Ready(true))
                }
            },
            Phase::TransformTag(mut reader) => match reader.advance(&mut self.rc, input) {
                Progress::Pending => {
                    self.phase = Phase::TransformTag(reader);
                    Ok(Progress::Pending)
                }
                Progress::Ready(tag) => {
                    let tag = tag as u32;
                    transforms::tag_is_reserved(tag)?;
                    debug!("transform tag {}", tag);
                    let header = self.header.as_ref().unwrap();
                    let num_planes = self.ranges.num_planes(header.num_planes);
                    let num_frames = header.num_frames as usize;
                    let reader = match tag {
                        TRANSFORM_CHANNELCOMPACT => TransformReader::ChannelCompact(ChannelCompactReader::new(num_planes)),
                        TRANSFORM_YCOCG => TransformReader::None,
                        TRANSFORM_PERMUTEPLANES => TransformReader::PermutePlanes(PermutePlanesReader::new(num_planes)),
                        TRANSFORM_BOUNDS => TransformReader::Bounds(BoundsReader::new(num_planes, &self.ranges)),
                        TRANSFORM_PALETTEALPHA => TransformReader::Palette { alpha: true, reader: PaletteReader::new(4) },
                        TRANSFORM_PALETTE => TransformReader::Palette { alpha: false, reader: PaletteReader::new(3) },
                        TRANSFORM_COLORBUCKETS => {
                            TransformReader::ColorBuckets(ColorBucketsReader::new(num_planes, &self.ranges)?)
                        }
                        TRANSFORM_DUPLICATEFRAME => TransformReader::DuplicateFrame(DuplicateFrameReader::new(num_frames)),
                        TRANSFORM_FRAMESHAPE => {
                            TransformReader::FrameShape(FrameShapeReader::new(num_frames, header.height as usize, header.width as usize))
                        }
                        TRANSFORM_FRAMELOOKBACK => TransformReader::FrameLookback(FrameLookbackReader::new(num_frames)),
                        _ => unreachable!("reserved tags already rejected"),
                    };
                    self.phase = Phase::TransformParams(tag, reader);
                    Ok(Progress::Ready(true))
                }
            },
            Phase::TransformParams(tag, mut reader) => {
                let table_missing = self.table.is_none();
                if table_missing {
                    return Err(Error::InvalidData("transform read before chance table ready".into()));
                }
                let progress = {
                    let ctx = &mut self.transform_ctx.param;
                    let table = self.table.as_ref().unwrap();
                    drive_transform_reader(&mut reader, &mut self.rc, ctx, table, input)
                };
                match progress {
                    Progress::Pending => {
                        self.phase = Phase::TransformParams(tag, reader);
                        Ok(Progress::Pending)
                    }
                    Progress::Ready(transform) => {
                        match &transform {
                            Transform::DuplicateFrame(state) => self.seen_before = state.seen_before.clone(),
                            Transform::FrameShape(state) => self.frame_shape = state.rows.clone(),
                            _ => {}
                        }
                        transforms::push_ranges(&transform, &mut self.ranges);
                        self.transforms.push(transform);
                        self.phase = Phase::TransformContinue;
                        Ok(Progress::Ready(true))
                    }
                }
            }
            Phase::Ipp(mut reader) => match reader.advance(&mut self.rc, input) {
                Progress::Pending => {
                    self.phase = Phase::Ipp(reader);
                    Ok(Progress::Pending)
                }
                Progress::Ready(v) => {
                    self.ipp = v;
                    self.phase = self.route_after_ipp();
                    Ok(Progress::Ready(true))
                }
            },
            Phase::DefaultOrder => match self.rc.read_equiprobable_bit(input) {
                Progress::Pending => {
                    self.phase = Phase::DefaultOrder;
                    Ok(Progress::Pending)
                }
                Progress::Ready(is_default) => {
                    if !is_default {
                        return Err(Error::Unsupported(
                            "explicit per-step interlaced plane ordering is not supported".into(),
                        ));
                    }
                    self.phase = Phase::ReadPredictors(0, UniformIntReader::new(0, MAX_PREDICTORS));
                    Ok(Progress::Ready(true))
                }
            },
            Phase::ReadPredictors(plane_pos, mut reader) => match reader.advance(&mut self.rc, input) {
                Progress::Pending => {
                    self.phase = Phase::ReadPredictors(plane_pos, reader);
                    Ok(Progress::Pending)
                }
                Progress::Ready(v) => {
                    self.predictors.push(v);
                    self.phase = if plane_pos + 1 >= self.plane_list.len() {
                        Phase::RoughZl(GnzIntReader::new(0, self.max_z()))
                    } else {
                        Phase::ReadPredictors(plane_pos + 1, UniformIntReader::new(0, MAX_PREDICTORS))
                    };
                    Ok(Progress::Ready(true))
                }
            },
            Phase::RoughZl(mut reader) => {
                let table_missing = self.table.is_none();
                if table_missing {
                    return Err(Error::InvalidData("rough zoomlevel read before chance table ready".into()));
                }
                let progress = {
                    let ctx = &mut self.interlace_ctx;
                    let table = self.table.as_ref().unwrap();
                    reader.advance(&mut self.rc, ctx, table, input)
                };
                match progress {
                    Progress::Pending => {
                        self.phase = Phase::RoughZl(reader);
                        Ok(Progress::Pending)
                    }
                    Progress::Ready(v) => {
                        let max_z = self.max_z();
                        self.rough_zl = v.clamp(0, max_z);
                        debug!("rough zoomlevel: {}", self.rough_zl);
                        self.phase = if self.rough_zl < max_z {
                            self.rough_trees = self.plane_list.iter().map(|_| ManiacTree::blank()).collect();
                            Phase::RoughPixelData(Box::new(PixelCursor::new(max_z)))
                        } else {
                            self.start_tree_build(0)
                        };
                        Ok(Progress::Ready(true))
                    }
                }
            }
            Phase::RoughPixelData(mut cursor) => match self.drive_rough_pixel_data(&mut cursor, input)? {
                Progress::Pending => {
                    self.phase = Phase::RoughPixelData(cursor);
                    Ok(Progress::Pending)
                }
                Progress::Ready(()) => {
                    self.phase = self.start_tree_build(0);
                    Ok(Progress::Ready(true))
                }
            },
            Phase::BuildTrees(plane_pos, mut reader, mut ctx) => {
                let table_missing = self.table.is_none();
                if table_missing {
                    return Err(Error::InvalidData("tree build before chance table ready".into()));
                }
                let progress = {
                    let table = self.table.as_ref().unwrap();
                    reader.advance(&mut self.rc, &mut ctx, table, input)
                };
                match progress {
                    Progress::Pending => {
                        self.phase = Phase::BuildTrees(plane_pos, reader, ctx);
                        Ok(Progress::Pending)
                    }
                    Progress::Ready(()) => {
                        self.trees.push(reader.finish());
                        self.phase = if plane_pos + 1 >= self.plane_list.len() {
                            Phase::PixelData(0, self.initial_cursor(0))
                        } else {
                            self.start_tree_build(plane_pos + 1)
                        };
                        Ok(Progress::Ready(true))
                    }
                }
            }
            Phase::PixelData(frame_idx, mut cursor) => match self.drive_pixel_data(frame_idx, &mut cursor, input)? {
                Progress::Pending => {
                    self.phase = Phase::PixelData(frame_idx, cursor);
                    Ok(Progress::Pending)
                }
                Progress::Ready(()) => {
                    let header = self.header.as_ref().unwrap();
                    let num_frames = header.num_frames as usize;
                    let mut next = frame_idx + 1;
                    while next < num_frames && self.is_aliased(next) {
                        next += 1;
                    }
                    self.phase = if next >= num_frames {
                        Phase::Finish
                    } else {
                        Phase::PixelData(next, self.initial_cursor(next))
                    };
                    Ok(Progress::Ready(true))
                }
            },
            Phase::Finish => {
                self.finish_decode()?;
                self.phase = Phase::Checksum;
                Ok(Progress::Ready(true))
            }
            Phase::Checksum => {
                loop {
                    if self.checksum_bytes.is_empty() {
                        match input.next_byte() {
                            None => {
                                self.phase = Phase::Checksum;
                                return Ok(Progress::Pending);
                            }
                            Some(0) => {
                                self.phase = Phase::Done;
                                return Ok(Progress::Ready(false));
                            }
                            Some(b) => self.checksum_bytes.push(b),
                        }
                        continue;
                    }
                    if self.checksum_bytes.len() < 4 {
                        match input.next_byte() {
                            None => {
                                self.phase = Phase::Checksum;
                                return Ok(Progress::Pending);
                            }
                            Some(b) => self.checksum_bytes.push(b),
                        }
                        continue;
                    }
                    let value = self.checksum_bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
                    if value != self.checksum_digest {
                        warn!("checksum mismatch: stream={:08x} computed={:08x}", value, self.checksum_digest);
                    } else {
                        trace!("checksum verified: {:08x}", value);
                    }
                    self.phase = Phase::Done;
                    return Ok(Progress::Ready(false));
                }
            }
            Phase::Done => {
                self.phase = Phase::Done;
                Ok(Progress::Ready(false))
            }
        }
    }

    /// Past the transform chain: finalize plane-constant detection, pick
    /// the plane visitation order, and route into predictor-selection
    /// (interlaced) or straight into MANIAC tree building.
    fn start_pixel_pipeline(&mut self) -> Phase {
        let header = self.header.clone().unwrap();
        let num_planes_storage = self.ranges.num_planes(header.num_planes);
        let num_planes_active = num_planes_storage.min(4);
        self.plane_list = PLANE_ORDERING
            .iter()
            .copied()
            .filter(|&p| p < num_planes_storage && self.ranges.min(p) < self.ranges.max(p))
            .collect();
        debug!("pixel plane order: {:?}", self.plane_list);

        let secondary = self.secondary.as_ref().unwrap();
        let needs_ipp = secondary.alphazero
            && num_planes_active > 3
            && self.ranges.min(PLANE_ALPHA) <= 0
            && !header.interlaced();
        if needs_ipp {
            return Phase::Ipp(UniformIntReader::new(0, MAX_PREDICTORS));
        }
        self.route_after_ipp()
    }

    /// Where decoding continues once the (possibly absent) `ipp` field
    /// is resolved: interlaced streams still have predictor selection
    /// and the rough pass ahead of them; non-interlaced streams go
    /// straight to tree building.
    fn route_after_ipp(&mut self) -> Phase {
        let header = self.header.as_ref().unwrap();
        if header.interlaced() && !self.plane_list.is_empty() {
            Phase::DefaultOrder
        } else {
            self.start_tree_build(0)
        }
    }

    fn start_tree_build(&mut self, plane_pos: usize) -> Phase {
        if self.plane_list.is_empty() || plane_pos >= self.plane_list.len() {
            return Phase::PixelData(0, self.initial_cursor(0));
        }
        let plane = self.plane_list[plane_pos];
        let header = self.header.as_ref().unwrap();
        let num_planes_active = self.ranges.num_planes(header.num_planes).min(4);
        let ranges = &self.ranges;
        let min = ranges.min(plane);
        let max = ranges.max(plane);
        let prop_ranges = if header.interlaced() {
            prop_ranges_init(min, max, plane, num_planes_active, |pp| (ranges.min(pp), ranges.max(pp)))
        } else {
            ni_prop_ranges_init(min, max, plane, num_planes_active, |pp| (ranges.min(pp), ranges.max(pp)))
        };
        Phase::BuildTrees(plane_pos, ManiacTreeReader::new(prop_ranges), Box::new(Default::default()))
    }

    /// Decodes the rough pass (§4.5): zoomlevels `[max_z, rough_zl]` for
    /// frame 0 only, against a per-plane single-leaf forest that is never
    /// split, seeding a coarse base image before the real MANIAC forest
    /// is read.
    fn drive_rough_pixel_data(&mut self, cursor: &mut PixelCursor, input: &mut ByteSource) -> Result<Progress<()>> {
        self.ensure_frames();
        let header = self.header.clone().unwrap();
        let width = header.width;
        let height = header.height;
        let frame_idx = 0usize;
        let max_z = self.max_z();
        let num_planes_active = self.ranges.num_planes(header.num_planes).min(4);

        loop {
            if cursor.plane_pos >= self.plane_list.len() {
                return Ok(Progress::Ready(()));
            }
            let plane = self.plane_list[cursor.plane_pos];
            let predictor = self.predictors.get(cursor.plane_pos).copied().unwrap_or(2);
            let rows = zoom_dim(height, Frame::zoom_row_pitch(cursor.z));
            let cols = zoom_dim(width, Frame::zoom_col_pitch(cursor.z));
            if cursor.r >= rows {
                if cursor.z <= self.rough_zl {
                    cursor.plane_pos += 1;
                    cursor.z = max_z;
                } else {
                    cursor.z -= 1;
                }
                cursor.r = 0;
                cursor.c = 0;
                continue;
            }
            let (r, c) = (cursor.r, cursor.c);
            if cursor.z == max_z {
                let min = self.ranges.min(plane);
                let max = self.ranges.max(plane);
                let reader = cursor.top_left.get_or_insert_with(|| UniformIntReader::new(min, max - min));
                match reader.advance(&mut self.rc, input) {
                    Progress::Pending => return Ok(Progress::Pending),
                    Progress::Ready(v) => {
                        cursor.top_left = None;
                        self.frames.as_mut().unwrap().frames[frame_idx].setz(plane, cursor.z, r, c, v);
                        advance_rc(cursor, cols);
                    }
                }
                continue;
            }
            if !is_new_zoom_cell(cursor.z, r, c) {
                advance_rc(cursor, cols);
                continue;
            }
            let tree = &mut self.rough_trees[cursor.plane_pos];
            let frames_ref: &FrameSet = self.frames.as_ref().unwrap();
            let mut properties = Vec::new();
            let guess = i_predict_calcprops(
                frames_ref, &self.ranges, frame_idx, plane, cursor.z, r, c, rows, cols, predictor,
                num_planes_active, PLANE_LOOKBACK, &mut properties,
            );
            let prev: Vec<i32> = properties[..prior_plane_count(plane)].to_vec();
            let (pmin, mut pmax) = self.ranges.minmax(plane, &prev);
            let guess = if plane == PLANE_LOOKBACK {
                pmax = pmax.min(frame_idx as i32);
                guess.clamp(pmin, pmax)
            } else {
                guess
            };
            match cursor.maniac.advance(tree, &mut self.rc, self.table.as_ref().unwrap(), input, &properties, pmin - guess, pmax - guess) {
                Progress::Pending => return Ok(Progress::Pending),
                Progress::Ready(residual) => {
                    let mut value = residual + guess;
                    self.ranges.snap(plane, &prev, &mut value);
                    self.frames.as_mut().unwrap().frames[frame_idx].setz(plane, cursor.z, r, c, value);
                    cursor.maniac = ManiacIntReader::new();
                    advance_rc(cursor, cols);
                }
            }
        }
    }

    fn drive_pixel_data(&mut self, frame_idx: usize, cursor: &mut PixelCursor, input: &mut ByteSource) -> Result<Progress<()>> {
        self.ensure_frames();

        let header = self.header.clone().unwrap();
        let secondary = self.secondary.clone().unwrap();
        let interlaced = header.interlaced();
        let width = header.width;
        let height = header.height;
        let max_z = self.max_z();
        let num_planes_active = self.ranges.num_planes(header.num_planes).min(4);
        let has_lookback = self.plane_list.contains(&PLANE_LOOKBACK);

        loop {
            if cursor.plane_pos >= self.plane_list.len() {
                return Ok(Progress::Ready(()));
            }
            let plane = self.plane_list[cursor.plane_pos];
            let predictor = self.predictors.get(cursor.plane_pos).copied().unwrap_or(2);

            if interlaced {
                let rows = zoom_dim(height, Frame::zoom_row_pitch(cursor.z));
                let cols = zoom_dim(width, Frame::zoom_col_pitch(cursor.z));
                if cursor.r >= rows {
                    if cursor.z == 0 {
                        cursor.plane_pos += 1;
                        cursor.z = self.plane_reset_z(frame_idx);
                    } else {
                        cursor.z -= 1;
                    }
                    cursor.r = 0;
                    cursor.c = 0;
                    continue;
                }
                let (r, c) = (cursor.r, cursor.c);
                if cursor.z == max_z {
                    let min = self.ranges.min(plane);
                    let max = self.ranges.max(plane);
                    let reader = cursor.top_left.get_or_insert_with(|| UniformIntReader::new(min, max - min));
                    match reader.advance(&mut self.rc, input) {
                        Progress::Pending => return Ok(Progress::Pending),
                        Progress::Ready(v) => {
                            cursor.top_left = None;
                            self.frames.as_mut().unwrap().frames[frame_idx].setz(plane, cursor.z, r, c, v);
                            advance_rc(cursor, cols);
                        }
                    }
                    continue;
                }
                if !is_new_zoom_cell(cursor.z, r, c) {
                    advance_rc(cursor, cols);
                    continue;
                }
                let frames_ref: &FrameSet = self.frames.as_ref().unwrap();
                if has_lookback && plane != PLANE_LOOKBACK {
                    let lb = frames_ref.resolved_frame(frame_idx).getz(PLANE_LOOKBACK, cursor.z, r, c);
                    if lb > 0 {
                        let src_frame = frame_idx.saturating_sub(lb as usize);
                        let value = frames_ref.resolved_frame(src_frame).getz(plane, cursor.z, r, c);
                        self.frames.as_mut().unwrap().frames[frame_idx].setz(plane, cursor.z, r, c, value);
                        cursor.maniac = ManiacIntReader::new();
                        advance_rc(cursor, cols);
                        continue;
                    }
                }
                let frames_ref: &FrameSet = self.frames.as_ref().unwrap();
                let mut properties = Vec::new();
                let guess = i_predict_calcprops(
                    frames_ref, &self.ranges, frame_idx, plane, cursor.z, r, c, rows, cols, predictor,
                    num_planes_active, PLANE_LOOKBACK, &mut properties,
                );
                let prev: Vec<i32> = properties[..prior_plane_count(plane)].to_vec();
                let (pmin, mut pmax) = self.ranges.minmax(plane, &prev);
                let guess = if plane == PLANE_LOOKBACK {
                    pmax = pmax.min(frame_idx as i32);
                    guess.clamp(pmin, pmax)
                } else {
                    guess
                };
                let tree = &mut self.trees[cursor.plane_pos];
                match cursor.maniac.advance(tree, &mut self.rc, self.table.as_ref().unwrap(), input, &properties, pmin - guess, pmax - guess) {
                    Progress::Pending => return Ok(Progress::Pending),
                    Progress::Ready(residual) => {
                        let mut value = residual + guess;
                        self.ranges.snap(plane, &prev, &mut value);
                        self.frames.as_mut().unwrap().frames[frame_idx].setz(plane, cursor.z, r, c, value);
                        cursor.maniac = ManiacIntReader::new();
                        advance_rc(cursor, cols);
                    }
                }
            } else {
                if cursor.r >= height {
                    cursor.plane_pos += 1;
                    cursor.r = 0;
                    cursor.c = 0;
                    continue;
                }
                let (r, c) = (cursor.r, cursor.c);
                let frames_ref: &FrameSet = self.frames.as_ref().unwrap();
                let fallback = (self.ranges.min(plane) + self.ranges.max(plane)) / 2;
                let is_color_plane = plane == PLANE_Y || plane == PLANE_CO || plane == PLANE_CG;

                let (col_begin, col_end) = {
                    let f = frames_ref.resolved_frame(frame_idx);
                    (f.col_begin[r as usize], f.col_end[r as usize])
                };
                if c < col_begin || c >= col_end {
                    let value = if frame_idx > 0 {
                        let prev_invisible = secondary.alphazero
                            && num_planes_active > 3
                            && is_color_plane
                            && frames_ref.get(frame_idx - 1, PLANE_ALPHA, r, c) == 0;
                        if prev_invisible {
                            ni_predict(frames_ref, frame_idx - 1, plane, r, c, fallback, self.ipp)
                        } else {
                            frames_ref.get(frame_idx - 1, plane, r, c)
                        }
                    } else {
                        ni_predict(frames_ref, frame_idx, plane, r, c, fallback, self.ipp)
                    };
                    self.frames.as_mut().unwrap().frames[frame_idx].set(plane, r, c, value);
                    advance_rc(cursor, width);
                    continue;
                }

                let skip_decode = secondary.alphazero
                    && num_planes_active > 3
                    && is_color_plane
                    && frames_ref.get(frame_idx, PLANE_ALPHA, r, c) == 0;
                if skip_decode {
                    let value = ni_predict(frames_ref, frame_idx, plane, r, c, fallback, self.ipp);
                    self.frames.as_mut().unwrap().frames[frame_idx].set(plane, r, c, value);
                    advance_rc(cursor, width);
                    continue;
                }

                if has_lookback && plane != PLANE_LOOKBACK {
                    let lb = frames_ref.get(frame_idx, PLANE_LOOKBACK, r, c);
                    if lb > 0 {
                        let src_frame = frame_idx.saturating_sub(lb as usize);
                        let value = frames_ref.get(src_frame, plane, r, c);
                        self.frames.as_mut().unwrap().frames[frame_idx].set(plane, r, c, value);
                        advance_rc(cursor, width);
                        continue;
                    }
                }

                let mut properties = Vec::new();
                let guess = ni_predict_calcprops(
                    frames_ref, &self.ranges, frame_idx, plane, r, c, width, fallback, false, num_planes_active,
                    &mut properties,
                );
                let prev: Vec<i32> = properties[..prior_plane_count(plane)].to_vec();
                let (pmin, mut pmax) = self.ranges.minmax(plane, &prev);
                let guess = if plane == PLANE_LOOKBACK {
                    pmax = pmax.min(frame_idx as i32);
                    guess.clamp(pmin, pmax)
                } else {
                    guess
                };
                let tree = &mut self.trees[cursor.plane_pos];
                match cursor.maniac.advance(tree, &mut self.rc, self.table.as_ref().unwrap(), input, &properties, pmin - guess, pmax - guess) {
                    Progress::Pending => return Ok(Progress::Pending),
                    Progress::Ready(residual) => {
                        let mut value = residual + guess;
                        self.ranges.snap(plane, &prev, &mut value);
                        self.frames.as_mut().unwrap().frames[frame_idx].set(plane, r, c, value);
                        cursor.maniac = ManiacIntReader::new();
                        advance_rc(cursor, width);
                    }
                }
            }
        }
    }

    fn finish_decode(&mut self) -> Result<()> {
        let mut frames = self.frames.take().unwrap_or_else(|| {
            let header = self.header.as_ref().unwrap();
            FrameSet::new(header.num_frames as usize, header.width as usize, header.height as usize, header.num_planes)
        });
        transforms::reverse_all(&self.transforms, &mut frames)?;
        let secondary = self.secondary.as_ref().unwrap();
        let header = self.header.as_ref().unwrap();
        let num_planes_out = self.ranges.num_planes(header.num_planes).min(4);
        let mut checksum = Checksum::new();
        for (i, frame) in frames.frames.iter_mut().enumerate() {
            if frame.seen_before >= 0 {
                continue;
            }
            if secondary.alphazero {
                output::clear_invisible(frame, num_planes_out);
            }
            let packed = output::pack(frame, num_planes_out, secondary.bpc);
            if i == 0 {
                checksum.update(&packed.data);
            }
            self.output_queue.push_back(packed);
        }
        self.checksum_digest = checksum.finish();
        Ok(())
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn drive_transform_reader(
    reader: &mut TransformReader,
    rc: &mut RangeCoder,
    ctx: &mut ChanceContext,
    table: &ChanceTable,
    input: &mut ByteSource,
) -> Progress<Transform> {
    match reader {
        TransformReader::None => Progress::Ready(Transform::YCoCg),
        TransformReader::ChannelCompact(r) => r.advance(rc, ctx, table, input).map(Transform::ChannelCompact),
        TransformReader::PermutePlanes(r) => r.advance(rc, ctx, table, input).map(Transform::PermutePlanes),
        TransformReader::Bounds(r) => r.advance(rc, ctx, table, input).map(Transform::Bounds),
        TransformReader::Palette { alpha, reader } => {
            let alpha = *alpha;
            reader.advance(rc, ctx, table, input).map(
                move |state| if alpha { Transform::PaletteAlpha(state) } else { Transform::Palette(state) },
            )
        }
        TransformReader::ColorBuckets(r) => r.advance(rc, ctx, table, input).map(Transform::ColorBuckets),
        TransformReader::DuplicateFrame(r) => r.advance(rc, ctx, table, input).map(Transform::DuplicateFrame),
        TransformReader::FrameShape(r) => r.advance(rc, ctx, table, input).map(Transform::FrameShape),
        TransformReader::FrameLookback(r) => r.advance(rc, ctx, table, input).map(Transform::FrameLookback),
    }
}

fn advance_rc(cursor: &mut PixelCursor, cols: u32) {
    cursor.c += 1;
    if cursor.c >= cols {
        cursor.c = 0;
        cursor.r += 1;
    }
}

/// Property vectors only carry prior-plane values ahead of everything
/// else when `plane < 3` (§4.2); alpha and lookback never precede
/// themselves with a "previous plane" slot.
fn prior_plane_count(plane: usize) -> usize {
    if plane < 3 {
        plane
    } else {
        0
    }
}

fn zoom_dim(size: u32, pitch: u32) -> u32 {
    (size + pitch - 1) / pitch
}

fn max_zoomlevel(width: u32, height: u32) -> i32 {
    let mut z = 0;
    while zoom_dim(height, Frame::zoom_row_pitch(z)) > 1 || zoom_dim(width, Frame::zoom_col_pitch(z)) > 1 {
        z += 1;
        if z > 64 {
            break;
        }
    }
    z
}

/// A zoomlevel grid cell is "new" (not already known from the previous,
/// coarser pass) iff it sits at an odd row (even `z`, horizontal pass) or
/// odd column (odd `z`, vertical pass).
fn is_new_zoom_cell(z: i32, r: u32, c: u32) -> bool {
    if z % 2 == 0 {
        r % 2 == 1
    } else {
        let _ = r;
        c % 2 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_reports_pending_on_truncated_header() {
        let mut d = Decoder::new();
        let status = d.decode(b"FL").unwrap();
        assert!(matches!(status, DecodeStatus::NeedMoreInput));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut d = Decoder::new();
        let err = d.decode(b"XLIF\x31\x31\x00\x00\x00").unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }
}
