//! Crate-wide numeric constants shared across the range coder, the MANIAC
//! engine, the transform chain and the two pixel decoders.

/// Planes a frame may carry, in storage order: Y, Co, Cg, Alpha, Lookback.
pub(crate) const MAX_PLANES: usize = 5;

pub(crate) const PLANE_Y: usize = 0;
pub(crate) const PLANE_CO: usize = 1;
pub(crate) const PLANE_CG: usize = 2;
pub(crate) const PLANE_ALPHA: usize = 3;
pub(crate) const PLANE_LOOKBACK: usize = 4;

/// Plane visitation order used by both pixel decoders: lookback and alpha
/// are resolved before colour so that later planes can consult them.
pub(crate) const PLANE_ORDERING: [usize; MAX_PLANES] =
    [PLANE_LOOKBACK, PLANE_ALPHA, PLANE_Y, PLANE_CO, PLANE_CG];

pub(crate) const MAX_PREDICTORS: i32 = 2;

pub(crate) const RAC_MAX_RANGE_BITS: u32 = 24;
pub(crate) const RAC_MIN_RANGE_BITS: u32 = 16;
pub(crate) const RAC_MAX_RANGE: u32 = 1 << RAC_MAX_RANGE_BITS;
pub(crate) const RAC_MIN_RANGE: u32 = 1 << RAC_MIN_RANGE_BITS;

pub(crate) const CHANCETABLE_DEFAULT_ALPHA: u32 = 0xFFFF_FFFF / 19;
pub(crate) const CHANCETABLE_DEFAULT_CUT: u32 = 2;

pub(crate) const MANIAC_TREE_BASE_SIZE: usize = 1600;
pub(crate) const MANIAC_TREE_MIN_COUNT: i32 = 1;
pub(crate) const MANIAC_TREE_MAX_COUNT: i32 = 512;

/// Transform tags, §4.3 of the design. 2, 8 and 9 are reserved.
pub(crate) const TRANSFORM_CHANNELCOMPACT: u32 = 0;
pub(crate) const TRANSFORM_YCOCG: u32 = 1;
pub(crate) const TRANSFORM_PERMUTEPLANES: u32 = 3;
pub(crate) const TRANSFORM_BOUNDS: u32 = 4;
pub(crate) const TRANSFORM_PALETTEALPHA: u32 = 5;
pub(crate) const TRANSFORM_PALETTE: u32 = 6;
pub(crate) const TRANSFORM_COLORBUCKETS: u32 = 7;
pub(crate) const TRANSFORM_DUPLICATEFRAME: u32 = 10;
pub(crate) const TRANSFORM_FRAMESHAPE: u32 = 11;
pub(crate) const TRANSFORM_FRAMELOOKBACK: u32 = 12;
pub(crate) const TRANSFORM_TAG_MAX: u32 = 13;
