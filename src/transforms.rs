//! The transform chain (§4.3): a stack of reversible colour/structural
//! remappings. Each variant reads its own parameters from the RAC, then
//! narrows the range stack, then (at decode end) reverses itself against
//! the decoded pixel data in LIFO order.

use crate::constants::*;
use crate::error::{Error, Result};
use crate::frame::FrameSet;
use crate::rangecoder::{ChanceContext, ChanceTable, GnzIntReader, NzIntReader, RangeCoder};
use crate::ranges::{ColorBucket, ColorBucketTable, RangesKind, RangesStack, CB0A, CB0B, CB1};
use crate::resumable::{ByteSource, Progress};

/// Chance contexts used while parsing the transform chain itself (the
/// continue-bit is a flat equiprobable bit, not a chance context).
#[derive(Default)]
pub struct TransformChanceContexts {
    pub tag: ChanceContext,
    pub param: ChanceContext,
}

pub enum Transform {
    ChannelCompact(ChannelCompactState),
    YCoCg,
    PermutePlanes(PermutePlanesState),
    Bounds(BoundsState),
    PaletteAlpha(PaletteState),
    Palette(PaletteState),
    ColorBuckets(ColorBucketsState),
    DuplicateFrame(DuplicateFrameState),
    FrameShape(FrameShapeState),
    FrameLookback(FrameLookbackState),
}

pub struct ChannelCompactState {
    pub palettes: Vec<Vec<i32>>,
}

pub struct PermutePlanesState {
    pub subtract: bool,
    pub permutation: Vec<usize>,
}

pub struct BoundsState {
    pub bounds: Vec<(i32, i32)>,
}

pub struct PaletteState {
    pub entries: Vec<Vec<i32>>,
}

pub struct ColorBucketsState {
    pub table: ColorBucketTable,
}

pub struct DuplicateFrameState {
    pub seen_before: Vec<i32>,
}

pub struct FrameShapeState {
    pub rows: Vec<Vec<(u32, u32)>>,
}

pub struct FrameLookbackState {
    pub max_lookback: i32,
}

/// Decodes the 1-bit-continue-gated tag stream described in §6 and
/// dispatches to each transform's own resumable reader. Driven one step
/// at a time by the caller's top-level state machine.
pub enum TransformChainStage {
    ReadContinueBit,
    ReadTag(UniformTagReader),
    ReadParams(Box<TransformReader>),
}

pub struct UniformTagReader {
    inner: crate::rangecoder::UniformIntReader,
}

impl UniformTagReader {
    pub fn new() -> Self {
        UniformTagReader { inner: crate::rangecoder::UniformIntReader::new(0, TRANSFORM_TAG_MAX as i32 - 1) }
    }

    pub fn advance(&mut self, rc: &mut RangeCoder, input: &mut ByteSource) -> Progress<i32> {
        self.inner.advance(rc, input)
    }
}

/// Per-transform resumable parameter reader. Each stage advances the
/// relevant integer reader(s) and accumulates into the transform's
/// state; `finish` is only called once all parameters are in.
pub enum TransformReader {
    ChannelCompact(ChannelCompactReader),
    PermutePlanes(PermutePlanesReader),
    Bounds(BoundsReader),
    Palette { alpha: bool, reader: PaletteReader },
    ColorBuckets(ColorBucketsReader),
    DuplicateFrame(DuplicateFrameReader),
    FrameShape(FrameShapeReader),
    FrameLookback(FrameLookbackReader),
    None,
}

pub struct ChannelCompactReader {
    num_planes: usize,
    plane: usize,
    remaining: i32,
    min: i32,
    size_reader: Option<GnzIntReader>,
    value_reader: Option<GnzIntReader>,
    palettes: Vec<Vec<i32>>,
}

impl ChannelCompactReader {
    pub fn new(num_planes: usize) -> Self {
        ChannelCompactReader {
            num_planes,
            plane: 0,
            remaining: 0,
            min: 0,
            size_reader: Some(GnzIntReader::new(1, 256)),
            value_reader: None,
            palettes: vec![Vec::new(); num_planes],
        }
    }

    pub fn advance(
        &mut self,
        rc: &mut RangeCoder,
        ctx: &mut ChanceContext,
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<ChannelCompactState> {
        loop {
            if self.plane >= self.num_planes {
                return Progress::Ready(ChannelCompactState {
                    palettes: std::mem::take(&mut self.palettes),
                });
            }
            if let Some(r) = self.size_reader.as_mut() {
                match r.advance(rc, ctx, table, input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(size) => {
                        self.size_reader = None;
                        self.remaining = size;
                        self.min = 0;
                        self.value_reader = if self.remaining > 0 {
                            Some(GnzIntReader::new(self.min, 255))
                        } else {
                            None
                        };
                    }
                }
                continue;
            }
            if self.remaining == 0 {
                self.plane += 1;
                self.size_reader = Some(GnzIntReader::new(1, 256));
                continue;
            }
            let r = self.value_reader.as_mut().expect("value reader set when remaining > 0");
            match r.advance(rc, ctx, table, input) {
                Progress::Pending => return Progress::Pending,
                Progress::Ready(value) => {
                    self.palettes[self.plane].push(value);
                    self.remaining -= 1;
                    self.min = value + 1;
                    self.value_reader = if self.remaining > 0 {
                        Some(GnzIntReader::new(self.min, 255))
                    } else {
                        None
                    };
                }
            }
        }
    }
}

pub struct PermutePlanesReader {
    num_planes: usize,
    subtract_read: bool,
    subtract: bool,
    permutation: Vec<usize>,
    reader: GnzIntReader,
}

impl PermutePlanesReader {
    pub fn new(num_planes: usize) -> Self {
        PermutePlanesReader {
            num_planes,
            subtract_read: false,
            subtract: false,
            permutation: Vec::new(),
            reader: GnzIntReader::new(0, 0),
        }
    }

    pub fn advance(
        &mut self,
        rc: &mut RangeCoder,
        ctx: &mut ChanceContext,
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<PermutePlanesState> {
        if !self.subtract_read {
            match rc.read_equiprobable_bit(input) {
                Progress::Pending => return Progress::Pending,
                Progress::Ready(bit) => {
                    self.subtract_read = true;
                    self.subtract = bit;
                    self.reader = GnzIntReader::new(0, self.num_planes as i32 - 1);
                }
            }
        }
        loop {
            if self.permutation.len() >= self.num_planes {
                return Progress::Ready(PermutePlanesState {
                    subtract: self.subtract,
                    permutation: std::mem::take(&mut self.permutation),
                });
            }
            match self.reader.advance(rc, ctx, table, input) {
                Progress::Pending => return Progress::Pending,
                Progress::Ready(v) => {
                    self.permutation.push(v as usize);
                    self.reader = GnzIntReader::new(0, self.num_planes as i32 - 1);
                }
            }
        }
    }
}

pub struct BoundsReader {
    num_planes: usize,
    plane: usize,
    bounds: Vec<(i32, i32)>,
    min_reader: Option<GnzIntReader>,
    min_val: i32,
    parent_bounds: Vec<(i32, i32)>,
}

impl BoundsReader {
    pub fn new(num_planes: usize, parent: &RangesStack) -> Self {
        let parent_bounds = (0..num_planes).map(|p| parent.minmax(p, &[])).collect();
        BoundsReader {
            num_planes,
            plane: 0,
            bounds: Vec::new(),
            min_reader: Some(GnzIntReader::new(i32::MIN / 4, i32::MAX / 4)),
            min_val: 0,
            parent_bounds,
        }
    }

    pub fn advance(
        &mut self,
        rc: &mut RangeCoder,
        ctx: &mut ChanceContext,
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<BoundsState> {
        loop {
            if self.plane >= self.num_planes {
                return Progress::Ready(BoundsState { bounds: std::mem::take(&mut self.bounds) });
            }
            let (lo, hi) = self.parent_bounds[self.plane];
            if let Some(r) = self.min_reader.as_mut() {
                match r.advance(rc, ctx, table, input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(v) => {
                        self.min_reader = None;
                        self.min_val = v.clamp(lo, hi);
                    }
                }
                continue;
            }
            let mut max_reader = GnzIntReader::new(self.min_val, hi);
            match max_reader.advance(rc, ctx, table, input) {
                Progress::Pending => return Progress::Pending,
                Progress::Ready(maxv) => {
                    self.bounds.push((self.min_val, maxv));
                    self.plane += 1;
                    self.min_reader = Some(GnzIntReader::new(i32::MIN / 4, i32::MAX / 4));
                }
            }
        }
    }
}

pub struct PaletteReader {
    size_reader: Option<GnzIntReader>,
    size: i32,
    remaining: i32,
    component: usize,
    components: usize,
    current: Vec<i32>,
    component_reader: Option<GnzIntReader>,
    entries: Vec<Vec<i32>>,
}

impl PaletteReader {
    pub fn new(components: usize) -> Self {
        PaletteReader {
            size_reader: Some(GnzIntReader::new(1, 1 << 20)),
            size: 0,
            remaining: 0,
            component: 0,
            components,
            current: Vec::new(),
            component_reader: None,
            entries: Vec::new(),
        }
    }

    pub fn advance(
        &mut self,
        rc: &mut RangeCoder,
        ctx: &mut ChanceContext,
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<PaletteState> {
        loop {
            if let Some(r) = self.size_reader.as_mut() {
                match r.advance(rc, ctx, table, input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(size) => {
                        self.size_reader = None;
                        self.size = size;
                        self.remaining = size;
                    }
                }
                continue;
            }
            if self.remaining == 0 {
                return Progress::Ready(PaletteState { entries: std::mem::take(&mut self.entries) });
            }
            if self.component_reader.is_none() {
                self.component_reader = Some(GnzIntReader::new(0, 255));
            }
            let r = self.component_reader.as_mut().unwrap();
            match r.advance(rc, ctx, table, input) {
                Progress::Pending => return Progress::Pending,
                Progress::Ready(v) => {
                    self.current.push(v);
                    self.component += 1;
                    if self.component == self.components {
                        self.entries.push(std::mem::take(&mut self.current));
                        self.component = 0;
                        self.remaining -= 1;
                    }
                    self.component_reader = None;
                }
            }
        }
    }
}

/// Maximum discrete values per bucket, indexed by plane (Y, Co, Cg, Alpha).
const MAX_PER_COLORBUCKET: [i32; 4] = [255, 510, 5, 255];

/// Resumable reader for a single bucket's `(min, max, discrete, values)`
/// fields. Mirrors the reference's bucket-loading state machine one
/// RAC-read at a time so a truncated input can suspend mid-bucket.
struct BucketLoad {
    stage: u8,
    smin: i32,
    smax: i32,
    bucket: ColorBucket,
    nb: i32,
    i2: i32,
    v: i32,
    exists_reader: Option<GnzIntReader>,
    min_reader: Option<GnzIntReader>,
    max_reader: Option<GnzIntReader>,
    discrete_reader: Option<GnzIntReader>,
    nb_reader: Option<GnzIntReader>,
    value_reader: Option<GnzIntReader>,
}

impl BucketLoad {
    fn new(smin: i32, smax: i32) -> Self {
        BucketLoad {
            stage: 1,
            smin,
            smax,
            bucket: ColorBucket::empty(),
            nb: 0,
            i2: 1,
            v: 0,
            exists_reader: Some(GnzIntReader::new(0, 1)),
            min_reader: None,
            max_reader: None,
            discrete_reader: None,
            nb_reader: None,
            value_reader: None,
        }
    }

    fn finish_values(&mut self) {
        if self.bucket.min < self.bucket.max {
            self.bucket.values.push(self.bucket.max);
        }
    }

    fn advance(
        &mut self,
        plane: usize,
        rc: &mut RangeCoder,
        ctx: &mut ChanceContext,
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<ColorBucket> {
        loop {
            match self.stage {
                1 => match self.exists_reader.as_mut().unwrap().advance(rc, ctx, table, input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(exists) => {
                        if exists == 0 {
                            return Progress::Ready(std::mem::replace(&mut self.bucket, ColorBucket::empty()));
                        }
                        if self.smin == self.smax {
                            self.bucket.min = self.smin;
                            self.bucket.max = self.smin;
                            self.bucket.discrete = false;
                            return Progress::Ready(std::mem::replace(&mut self.bucket, ColorBucket::empty()));
                        }
                        self.min_reader = Some(GnzIntReader::new(self.smin, self.smax));
                        self.stage = 2;
                    }
                },
                2 => match self.min_reader.as_mut().unwrap().advance(rc, ctx, table, input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(v) => {
                        self.bucket.min = v;
                        self.max_reader = Some(GnzIntReader::new(v, self.smax));
                        self.stage = 3;
                    }
                },
                3 => match self.max_reader.as_mut().unwrap().advance(rc, ctx, table, input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(v) => {
                        self.bucket.max = v;
                        if self.bucket.min == self.bucket.max || self.bucket.min + 1 == self.bucket.max {
                            self.bucket.discrete = false;
                            return Progress::Ready(std::mem::replace(&mut self.bucket, ColorBucket::empty()));
                        }
                        self.discrete_reader = Some(GnzIntReader::new(0, 1));
                        self.stage = 4;
                    }
                },
                4 => match self.discrete_reader.as_mut().unwrap().advance(rc, ctx, table, input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(d) => {
                        self.bucket.discrete = d != 0;
                        if !self.bucket.discrete {
                            return Progress::Ready(std::mem::replace(&mut self.bucket, ColorBucket::empty()));
                        }
                        let cap = MAX_PER_COLORBUCKET[plane].min(self.bucket.max - self.bucket.min);
                        self.nb_reader = Some(GnzIntReader::new(2, cap));
                        self.stage = 5;
                    }
                },
                5 => match self.nb_reader.as_mut().unwrap().advance(rc, ctx, table, input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(nb) => {
                        self.nb = nb;
                        self.bucket.values = vec![self.bucket.min];
                        self.v = self.bucket.min;
                        self.i2 = 1;
                        if self.i2 < self.nb - 1 {
                            self.value_reader =
                                Some(GnzIntReader::new(self.v + 1, self.bucket.max + 1 - self.nb + self.i2));
                            self.stage = 6;
                        } else {
                            self.finish_values();
                            return Progress::Ready(std::mem::replace(&mut self.bucket, ColorBucket::empty()));
                        }
                    }
                },
                6 => match self.value_reader.as_mut().unwrap().advance(rc, ctx, table, input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(v) => {
                        self.bucket.values.push(v);
                        self.v = v;
                        self.i2 += 1;
                        if self.i2 < self.nb - 1 {
                            self.value_reader =
                                Some(GnzIntReader::new(self.v + 1, self.bucket.max + 1 - self.nb + self.i2));
                        } else {
                            self.finish_values();
                            return Progress::Ready(std::mem::replace(&mut self.bucket, ColorBucket::empty()));
                        }
                    }
                },
                _ => unreachable!("bucket load stage out of range"),
            }
        }
    }
}

/// Resumable reader for the whole `ColorBuckets` transform: bucket0 (Y),
/// bucket1[] (Co given Y), bucket2[][] (Cg given Y and a 4-wide Co band,
/// only recorded when Cg actually varies) and bucket3 (any further
/// plane, e.g. alpha).
pub struct ColorBucketsReader {
    parent: RangesStack,
    num_planes: usize,
    min0: i32,
    min1: i32,
    bucket1_len: usize,
    bucket2_rows: usize,
    bucket2_cols: usize,
    cg_varies: bool,
    table: ColorBucketTable,
    stage: u8,
    j: usize,
    k: usize,
    pixel_l: [i32; 2],
    pixel_u: [i32; 2],
    load: Option<BucketLoad>,
}

impl ColorBucketsReader {
    /// Mirrors the reference's applicability guard: colour buckets only
    /// make sense with at least three planes whose chroma actually
    /// varies and whose joint range is small enough to bucket.
    pub fn new(num_planes: usize, ranges: &RangesStack) -> Result<Self> {
        let (min0, max0) = (ranges.min(0), ranges.max(0));
        let (min1, max1) = (ranges.min(1), ranges.max(1));
        let (min2, max2) = (ranges.min(2), ranges.max(2));
        let disallowed = num_planes < 3
            || (min0 == 0 && max0 == 0 && min2 == 0 && max2 == 0)
            || (min0 == max0 && min1 == max1 && min2 == max2)
            || (max0 - min0 > 1023 || max1 - min1 > 1023 || max2 - min2 > 1023)
            || (min1 == max1);
        if disallowed {
            return Err(Error::InvalidData("colour buckets transform not applicable here".into()));
        }
        let bucket1_len = ((max0 - min0) / CB0A + 1).max(0) as usize;
        let bucket2_rows = ((max0 - min0) / CB0B + 1).max(0) as usize;
        let bucket2_cols = ((max1 - min1) / CB1 + 1).max(0) as usize;
        Ok(ColorBucketsReader {
            parent: ranges.clone(),
            num_planes,
            min0,
            min1,
            bucket1_len,
            bucket2_rows,
            bucket2_cols,
            cg_varies: min2 < max2,
            table: ColorBucketTable {
                min0,
                min1,
                bucket0: ColorBucket::empty(),
                bucket1: vec![ColorBucket::empty(); bucket1_len],
                bucket2: vec![vec![ColorBucket::empty(); bucket2_cols]; bucket2_rows],
                bucket3: ColorBucket::empty(),
            },
            stage: 0,
            j: 0,
            k: 0,
            pixel_l: [0, 0],
            pixel_u: [0, 0],
            load: None,
        })
    }

    /// The envelope a bucket's `(min, max)` fields are RAC-coded
    /// against: the union of the parent ranges' legal values over every
    /// pixel this bucket's quantization cell covers.
    fn envelope(&self, plane: usize, lower: [i32; 2], upper: [i32; 2]) -> (i32, i32) {
        match plane {
            0 => self.parent.minmax(0, &[]),
            1 => {
                let mut smin = i32::MAX;
                let mut smax = i32::MIN;
                for y in lower[0]..=upper[0] {
                    let (rmin, rmax) = self.parent.minmax(1, &[y]);
                    smin = smin.min(rmin);
                    smax = smax.max(rmax);
                }
                (smin, smax)
            }
            2 => {
                let mut smin = i32::MAX;
                let mut smax = i32::MIN;
                for y in lower[0]..=upper[0] {
                    for co in lower[1]..=upper[1] {
                        let (rmin, rmax) = self.parent.minmax(2, &[y, co]);
                        smin = smin.min(rmin);
                        smax = smax.max(rmax);
                    }
                }
                (smin, smax)
            }
            _ => self.parent.minmax(plane, &[lower[0], lower[1]]),
        }
    }

    /// Does a legal colour exist at plane `p` within `[lower, upper]`,
    /// given the buckets already read so far?
    fn exists2(&self, plane: usize, pixel: [i32; 2]) -> bool {
        if plane > 0 && (pixel[0] < self.min0 || pixel[0] > self.parent.max(0)) {
            return false;
        }
        if plane > 1 && (pixel[1] < self.min1 || pixel[1] > self.parent.max(1)) {
            return false;
        }
        let prev: Vec<i32> = pixel[..plane].to_vec();
        let mut v = pixel[plane];
        self.parent.snap(plane, &prev, &mut v);
        if v != pixel[plane] {
            return false;
        }
        let bucket = self.table.bucket_for(plane, &prev);
        bucket.snap_slow(pixel[plane]) == pixel[plane]
    }

    fn exists_range(&self, plane: usize, lower: [i32; 2], upper: [i32; 2]) -> bool {
        match plane {
            0 => (lower[0]..=upper[0]).any(|y| self.exists2(0, [y, lower[1]])),
            1 => (lower[0]..=upper[0]).any(|y| (lower[1]..=upper[1]).any(|co| self.exists2(1, [y, co]))),
            _ => false,
        }
    }

    /// A bucket at `plane` is only worth reading if a legal colour could
    /// reach it given every earlier plane's buckets; alpha (plane 3)
    /// skips this check entirely, matching the reference.
    fn precheck_exists(&self, plane: usize, lower: [i32; 2], upper: [i32; 2]) -> bool {
        if plane >= PLANE_ALPHA {
            return true;
        }
        (0..plane).all(|p| self.exists_range(p, lower, upper))
    }

    /// Post-pass: drop Co values from bucket1 rows whose corresponding
    /// Cg cell turned out empty, then build every bucket's fast-snap
    /// table.
    fn finish(&mut self) -> ColorBucketsState {
        if self.cg_varies {
            for i in 0..self.bucket2_rows {
                for j in 0..self.bucket2_cols {
                    if self.table.bucket2[i][j].is_empty() {
                        let co_lo = self.min1 + j as i32 * CB1;
                        for co in co_lo..co_lo + CB1 {
                            self.table.bucket1[i].remove_color(co);
                        }
                    }
                }
            }
        }
        self.table.bucket0.prepare_snapvalues();
        self.table.bucket3.prepare_snapvalues();
        for b in self.table.bucket1.iter_mut() {
            b.prepare_snapvalues();
        }
        for row in self.table.bucket2.iter_mut() {
            for b in row.iter_mut() {
                b.prepare_snapvalues();
            }
        }
        ColorBucketsState { table: self.table.clone() }
    }

    pub fn advance(
        &mut self,
        rc: &mut RangeCoder,
        ctx: &mut ChanceContext,
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<ColorBucketsState> {
        loop {
            match self.stage {
                0 => {
                    if self.load.is_none() {
                        let (smin, smax) = self.envelope(0, self.pixel_l, self.pixel_u);
                        self.load = Some(BucketLoad::new(smin, smax));
                    }
                    match self.load.as_mut().unwrap().advance(0, rc, ctx, table, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(bucket) => {
                            self.table.bucket0 = bucket;
                            self.load = None;
                            self.pixel_l[0] = self.min0;
                            self.pixel_u[0] = self.min0 + CB0A - 1;
                            self.stage = 1;
                        }
                    }
                }
                1 => {
                    if self.j >= self.bucket1_len {
                        self.j = 0;
                        if self.cg_varies {
                            self.pixel_l = [self.min0, self.min1];
                            self.pixel_u = [self.min0 + CB0B - 1, self.min1 + CB1 - 1];
                            self.stage = 2;
                        } else {
                            self.stage = 3;
                        }
                        continue;
                    }
                    if self.load.is_none() {
                        if !self.precheck_exists(1, self.pixel_l, self.pixel_u) {
                            self.table.bucket1[self.j] = ColorBucket::empty();
                            self.j += 1;
                            self.pixel_l[0] += CB0A;
                            self.pixel_u[0] += CB0A;
                            continue;
                        }
                        let (smin, smax) = self.envelope(1, self.pixel_l, self.pixel_u);
                        self.load = Some(BucketLoad::new(smin, smax));
                    }
                    match self.load.as_mut().unwrap().advance(1, rc, ctx, table, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(bucket) => {
                            self.table.bucket1[self.j] = bucket;
                            self.load = None;
                            self.j += 1;
                            self.pixel_l[0] += CB0A;
                            self.pixel_u[0] += CB0A;
                        }
                    }
                }
                2 => {
                    if self.j >= self.bucket2_rows {
                        self.j = 0;
                        self.k = 0;
                        self.stage = 3;
                        continue;
                    }
                    if self.k >= self.bucket2_cols {
                        self.pixel_l[0] += CB0B;
                        self.pixel_u[0] += CB0B;
                        self.j += 1;
                        self.k = 0;
                        self.pixel_l[1] = self.min1;
                        self.pixel_u[1] = self.min1 + CB1 - 1;
                        continue;
                    }
                    if self.load.is_none() {
                        if !self.precheck_exists(2, self.pixel_l, self.pixel_u) {
                            self.table.bucket2[self.j][self.k] = ColorBucket::empty();
                            self.k += 1;
                            self.pixel_l[1] += CB1;
                            self.pixel_u[1] += CB1;
                            continue;
                        }
                        let (smin, smax) = self.envelope(2, self.pixel_l, self.pixel_u);
                        self.load = Some(BucketLoad::new(smin, smax));
                    }
                    match self.load.as_mut().unwrap().advance(2, rc, ctx, table, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(bucket) => {
                            self.table.bucket2[self.j][self.k] = bucket;
                            self.load = None;
                            self.k += 1;
                            self.pixel_l[1] += CB1;
                            self.pixel_u[1] += CB1;
                        }
                    }
                }
                3 => {
                    if self.num_planes <= 3 {
                        return Progress::Ready(self.finish());
                    }
                    if self.load.is_none() {
                        let (smin, smax) = self.envelope(3, self.pixel_l, self.pixel_u);
                        self.load = Some(BucketLoad::new(smin, smax));
                    }
                    match self.load.as_mut().unwrap().advance(3, rc, ctx, table, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(bucket) => {
                            self.table.bucket3 = bucket;
                            self.load = None;
                            return Progress::Ready(self.finish());
                        }
                    }
                }
                _ => unreachable!("colour buckets read stage out of range"),
            }
        }
    }
}

pub struct DuplicateFrameReader {
    frame: usize,
    num_frames: usize,
    reader: Option<GnzIntReader>,
    seen_before: Vec<i32>,
}

impl DuplicateFrameReader {
    pub fn new(num_frames: usize) -> Self {
        DuplicateFrameReader { frame: 0, num_frames, reader: None, seen_before: vec![-1; num_frames] }
    }

    pub fn advance(
        &mut self,
        rc: &mut RangeCoder,
        ctx: &mut ChanceContext,
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<DuplicateFrameState> {
        loop {
            if self.frame >= self.num_frames {
                return Progress::Ready(DuplicateFrameState { seen_before: std::mem::take(&mut self.seen_before) });
            }
            if self.reader.is_none() {
                self.reader = Some(GnzIntReader::new(-1, self.frame as i32 - 1));
            }
            match self.reader.as_mut().unwrap().advance(rc, ctx, table, input) {
                Progress::Pending => return Progress::Pending,
                Progress::Ready(v) => {
                    self.seen_before[self.frame] = v;
                    self.frame += 1;
                    self.reader = None;
                }
            }
        }
    }
}

pub struct FrameShapeReader {
    height: usize,
    width: usize,
    row: usize,
    begin_reader: Option<GnzIntReader>,
    begin: u32,
    rows: Vec<Vec<(u32, u32)>>,
}

impl FrameShapeReader {
    pub fn new(num_frames: usize, height: usize, width: usize) -> Self {
        FrameShapeReader {
            height,
            width,
            row: 0,
            begin_reader: Some(GnzIntReader::new(0, width as i32)),
            begin: 0,
            rows: vec![Vec::with_capacity(height); num_frames],
        }
    }

    pub fn advance(
        &mut self,
        rc: &mut RangeCoder,
        ctx: &mut ChanceContext,
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<FrameShapeState> {
        loop {
            if self.row >= self.height * self.rows.len() {
                return Progress::Ready(FrameShapeState { rows: std::mem::take(&mut self.rows) });
            }
            if let Some(r) = self.begin_reader.as_mut() {
                match r.advance(rc, ctx, table, input) {
                    Progress::Pending => return Progress::Pending,
                    Progress::Ready(b) => {
                        self.begin_reader = None;
                        self.begin = b as u32;
                    }
                }
                continue;
            }
            let mut end_reader = GnzIntReader::new(self.begin as i32, self.width as i32);
            match end_reader.advance(rc, ctx, table, input) {
                Progress::Pending => return Progress::Pending,
                Progress::Ready(e) => {
                    let frame = self.row / self.height;
                    self.rows[frame].push((self.begin, e as u32));
                    self.row += 1;
                    self.begin_reader = Some(GnzIntReader::new(0, self.width as i32));
                }
            }
        }
    }
}

pub struct FrameLookbackReader {
    reader: GnzIntReader,
}

impl FrameLookbackReader {
    pub fn new(num_frames: usize) -> Self {
        FrameLookbackReader { reader: GnzIntReader::new(1, num_frames.max(1) as i32 - 1) }
    }

    pub fn advance(
        &mut self,
        rc: &mut RangeCoder,
        ctx: &mut ChanceContext,
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<FrameLookbackState> {
        self.reader.advance(rc, ctx, table, input).map(|v| FrameLookbackState { max_lookback: v })
    }
}

/// Applies every transform's reverse operation, innermost (last pushed)
/// first, against every frame not aliased via `seen_before`.
pub fn reverse_all(transforms: &[Transform], frames: &mut FrameSet) -> Result<()> {
    for t in transforms.iter().rev() {
        reverse_one(t, frames)?;
    }
    Ok(())
}

fn reverse_one(t: &Transform, frames: &mut FrameSet) -> Result<()> {
    match t {
        Transform::ChannelCompact(state) => {
            for frame in frames.iter_mut() {
                for (plane, palette) in state.palettes.iter().enumerate() {
                    if palette.is_empty() {
                        continue;
                    }
                    frame.map_plane(plane, |idx| {
                        palette.get(idx.max(0) as usize).copied().unwrap_or(0)
                    });
                }
            }
        }
        Transform::YCoCg => {
            for frame in frames.iter_mut() {
                frame.for_each_pixel3(|y, co, cg| {
                    let tmp = y - (cg >> 1);
                    let g = cg + tmp;
                    let b = tmp - (co >> 1);
                    let r = b + co;
                    (r, g, b)
                });
            }
        }
        Transform::PermutePlanes(state) => {
            for frame in frames.iter_mut() {
                frame.permute_planes(&state.permutation, state.subtract);
            }
        }
        Transform::Bounds(_) => {}
        Transform::PaletteAlpha(state) => {
            for frame in frames.iter_mut() {
                frame.map_plane_alpha(&state.entries);
            }
        }
        Transform::Palette(state) => {
            for frame in frames.iter_mut() {
                frame.map_plane_palette(&state.entries);
            }
        }
        Transform::ColorBuckets(_) => {}
        Transform::DuplicateFrame(state) => {
            frames.apply_seen_before(&state.seen_before);
        }
        Transform::FrameShape(state) => {
            frames.apply_shape(&state.rows);
        }
        Transform::FrameLookback(state) => {
            frames.resolve_lookback(state.max_lookback)?;
        }
    }
    Ok(())
}

pub fn push_ranges(t: &Transform, ranges: &mut RangesStack) {
    match t {
        Transform::ChannelCompact(state) => {
            ranges.push(RangesKind::ChannelCompact {
                nb_colors: state.palettes.iter().map(|p| p.len() as i32).collect(),
            });
        }
        Transform::YCoCg => {
            let origmax4 = ((ranges.max(0).max(ranges.max(1)).max(ranges.max(2)) + 1) / 4).max(1);
            ranges.push(RangesKind::YCoCg { origmax4 });
        }
        Transform::PermutePlanes(state) => {
            ranges.push(RangesKind::PermutePlanes {
                subtract: state.subtract,
                permutation: state.permutation.clone(),
            });
        }
        Transform::Bounds(state) => {
            ranges.push(RangesKind::Bounds { bounds: state.bounds.clone() });
        }
        Transform::PaletteAlpha(state) => {
            ranges.push(RangesKind::PaletteAlpha { size: state.entries.len() as i32 });
        }
        Transform::Palette(state) => {
            ranges.push(RangesKind::Palette { size: state.entries.len() as i32 });
        }
        Transform::ColorBuckets(state) => {
            ranges.push(RangesKind::ColorBuckets { table: state.table.clone() });
        }
        Transform::DuplicateFrame(_) => {}
        Transform::FrameShape(_) => {}
        Transform::FrameLookback(state) => {
            ranges.push(RangesKind::FrameLookback { max_lookback: state.max_lookback });
        }
    }
}

pub fn tag_is_reserved(tag: u32) -> Result<()> {
    if tag == 2 || tag == 8 || tag == 9 {
        Err(Error::Unsupported(format!("reserved transform tag {}", tag)))
    } else if tag >= TRANSFORM_TAG_MAX {
        Err(Error::InvalidData(format!("transform tag out of range: {}", tag)))
    } else {
        Ok(())
    }
}
