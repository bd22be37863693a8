//! The MANIAC adaptive context-tree model (§4.2): tree build (read) and
//! leaf descent/split, both fully resumable.

use crate::constants::{MANIAC_TREE_MAX_COUNT, MANIAC_TREE_MIN_COUNT};
use crate::rangecoder::{ChanceContext, ChanceTable, GnzIntReader, NzIntReader, RangeCoder};
use crate::resumable::{ByteSource, Progress};

/// One node of a plane's context tree. `property < 0` marks a node that
/// will never branch (the tree-read phase decoded a leaf marker for
/// it); such a node's `leaf_id` is permanent. A node with `property >=
/// 0` holds a training budget in `count`: while positive, descents stop
/// here and reuse `leaf_id` directly without branching. The first
/// descent to find `count == 0` duplicates the shared context into a
/// fresh leaf, hands the old and new contexts to `left`/`right`
/// respectively, and answers using whichever child the current
/// property value selects.
#[derive(Clone, Copy)]
pub struct ManiacNode {
    pub property: i32,
    pub split_val: i32,
    pub count: i32,
    pub left: u32,
    pub right: u32,
    pub leaf_id: u32,
}

impl ManiacNode {
    fn unbuilt() -> Self {
        ManiacNode { property: -1, split_val: 0, count: 0, left: 0, right: 0, leaf_id: 0 }
    }
}

pub struct ManiacTree {
    pub nodes: Vec<ManiacNode>,
    pub leaves: Vec<ChanceContext>,
}

impl ManiacTree {
    /// A tree with a single, never-splitting root leaf — the "blank"
    /// forest used to seed the interlaced decoder's rough pass (§4.5).
    pub fn blank() -> Self {
        ManiacTree { nodes: vec![ManiacNode::unbuilt()], leaves: vec![ChanceContext::default()] }
    }

    /// Walks from the root, branching through already-split inner
    /// nodes, stopping at the first not-yet-split node or true leaf.
    /// Mutates tree state: decrements a training budget, or performs
    /// exactly one split the instant a budget reaches zero.
    pub fn find_leaf(&mut self, properties: &[i32]) -> usize {
        let mut pos = 0usize;
        loop {
            let node = self.nodes[pos];
            if node.property < 0 {
                return node.leaf_id as usize;
            }
            if node.count < 0 {
                pos = if properties[node.property as usize] > node.split_val {
                    node.right as usize
                } else {
                    node.left as usize
                };
                continue;
            }
            if node.count > 0 {
                self.nodes[pos].count -= 1;
                return node.leaf_id as usize;
            }
            let new_leaf_id = self.leaves.len() as u32;
            self.leaves.push(self.leaves[node.leaf_id as usize].clone());
            self.nodes[pos].count = -1;
            let goes_right = properties[node.property as usize] > node.split_val;
            let (right_leaf, left_leaf) = if goes_right {
                (new_leaf_id, node.leaf_id)
            } else {
                (node.leaf_id, new_leaf_id)
            };
            self.nodes[node.right as usize].leaf_id = right_leaf;
            self.nodes[node.left as usize].leaf_id = left_leaf;
            return if goes_right { right_leaf as usize } else { left_leaf as usize };
        }
    }
}

enum StackItem {
    Process(u32),
    EnterChild { node_id: u32, property: usize, range: (i32, i32) },
    Restore { property: usize, range: (i32, i32) },
}

#[derive(Clone, Copy, PartialEq)]
enum Stage {
    ReadProperty,
    ReadCount,
    ReadSplit,
}

/// Resumable builder for one plane's tree, driven by three dedicated
/// chance contexts (property, count, split value).
pub struct ManiacTreeReader {
    stack: Vec<StackItem>,
    prop_ranges: Vec<(i32, i32)>,
    building: Option<u32>,
    stage: Stage,
    property_reader: Option<GnzIntReader>,
    count_reader: Option<GnzIntReader>,
    split_reader: Option<GnzIntReader>,
    current_property: i32,
    pending_count: i32,
    nodes: Vec<ManiacNode>,
    leaves: Vec<ChanceContext>,
}

impl ManiacTreeReader {
    pub fn new(prop_ranges: Vec<(i32, i32)>) -> Self {
        ManiacTreeReader {
            stack: vec![StackItem::Process(0)],
            prop_ranges,
            building: None,
            stage: Stage::ReadProperty,
            property_reader: None,
            count_reader: None,
            split_reader: None,
            current_property: -1,
            pending_count: 0,
            nodes: vec![ManiacNode::unbuilt()],
            leaves: vec![ChanceContext::default()],
        }
    }

    pub fn advance(
        &mut self,
        rc: &mut RangeCoder,
        build_ctx: &mut [ChanceContext; 3],
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<()> {
        loop {
            match self.stack.last() {
                None => return Progress::Ready(()),
                Some(StackItem::Restore { .. }) => {
                    if let Some(StackItem::Restore { property, range }) = self.stack.pop() {
                        self.prop_ranges[property] = range;
                    }
                }
                Some(StackItem::EnterChild { .. }) => {
                    if let Some(StackItem::EnterChild { node_id, property, range }) = self.stack.pop() {
                        self.prop_ranges[property] = range;
                        self.stack.push(StackItem::Process(node_id));
                    }
                }
                Some(&StackItem::Process(node_id)) => {
                    if self.building != Some(node_id) {
                        self.building = Some(node_id);
                        self.stage = Stage::ReadProperty;
                        self.property_reader = None;
                        self.count_reader = None;
                        self.split_reader = None;
                    }
                    match self.drive_node(node_id, rc, build_ctx, table, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(None) => {
                            self.stack.pop();
                            self.building = None;
                        }
                        Progress::Ready(Some((property, split_val, count, left_range, right_id))) => {
                            self.stack.pop();
                            let saved = self.prop_ranges[property];
                            self.stack.push(StackItem::Restore { property, range: saved });
                            let left_id = self.nodes[node_id as usize].left;
                            self.stack.push(StackItem::EnterChild { node_id: left_id, property, range: left_range });
                            self.stack.push(StackItem::Process(right_id));
                            self.building = None;
                            let _ = (property, split_val, count);
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn drive_node(
        &mut self,
        node_id: u32,
        rc: &mut RangeCoder,
        build_ctx: &mut [ChanceContext; 3],
        table: &ChanceTable,
        input: &mut ByteSource,
    ) -> Progress<Option<(usize, i32, i32, (i32, i32), u32)>> {
        loop {
            match self.stage {
                Stage::ReadProperty => {
                    let prop_ranges_size = self.prop_ranges.len() as i32;
                    let reader = self
                        .property_reader
                        .get_or_insert_with(|| GnzIntReader::new(0, prop_ranges_size));
                    match reader.advance(rc, &mut build_ctx[0], table, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(v) => {
                            self.property_reader = None;
                            if v == 0 {
                                return Progress::Ready(None);
                            }
                            self.current_property = v - 1;
                            self.stage = Stage::ReadCount;
                        }
                    }
                }
                Stage::ReadCount => {
                    let reader = self
                        .count_reader
                        .get_or_insert_with(|| GnzIntReader::new(MANIAC_TREE_MIN_COUNT, MANIAC_TREE_MAX_COUNT));
                    match reader.advance(rc, &mut build_ctx[1], table, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(count) => {
                            self.count_reader = None;
                            self.pending_count = count;
                            self.stage = Stage::ReadSplit;
                        }
                    }
                }
                Stage::ReadSplit => {
                    let (pmin, pmax) = self.prop_ranges[self.current_property as usize];
                    let reader = self
                        .split_reader
                        .get_or_insert_with(|| GnzIntReader::new(pmin, (pmax - 1).max(pmin)));
                    match reader.advance(rc, &mut build_ctx[2], table, input) {
                        Progress::Pending => return Progress::Pending,
                        Progress::Ready(split_val) => {
                            self.split_reader = None;
                            let right_id = self.nodes.len() as u32;
                            self.nodes.push(ManiacNode::unbuilt());
                            let left_id = self.nodes.len() as u32;
                            self.nodes.push(ManiacNode::unbuilt());
                            let leaf_id = self.nodes[node_id as usize].leaf_id;
                            self.nodes[node_id as usize] = ManiacNode {
                                property: self.current_property,
                                split_val,
                                count: self.pending_count,
                                left: left_id,
                                right: right_id,
                                leaf_id,
                            };
                            // right subtree is processed immediately, so its
                            // range is set directly; left's is deferred to
                            // an `EnterChild` marker.
                            self.prop_ranges[self.current_property as usize] = (pmin, split_val);
                            let property = self.current_property as usize;
                            let left_range = (split_val + 1, pmax);
                            return Progress::Ready(Some((property, split_val, self.pending_count, left_range, right_id)));
                        }
                    }
                }
            }
        }
    }

    pub fn finish(self) -> ManiacTree {
        ManiacTree { nodes: self.nodes, leaves: self.leaves }
    }
}

/// Reads one residual against a plane's tree: descends (possibly
/// splitting) to find the governing leaf, then decodes a near-zero
/// integer against that leaf's context.
pub struct ManiacIntReader {
    leaf: Option<usize>,
    nz: Option<NzIntReader>,
    shift: i32,
}

impl ManiacIntReader {
    pub fn new() -> Self {
        ManiacIntReader { leaf: None, nz: None, shift: 0 }
    }

    pub fn advance(
        &mut self,
        tree: &mut ManiacTree,
        rc: &mut RangeCoder,
        table: &ChanceTable,
        input: &mut ByteSource,
        properties: &[i32],
        min: i32,
        max: i32,
    ) -> Progress<i32> {
        if min == max {
            return Progress::Ready(min);
        }
        if self.leaf.is_none() {
            self.leaf = Some(tree.find_leaf(properties));
        }
        let leaf_id = self.leaf.unwrap();
        if self.nz.is_none() {
            self.shift = if min > 0 {
                min
            } else if max < 0 {
                max
            } else {
                0
            };
            self.nz = Some(NzIntReader::new(min - self.shift, max - self.shift));
        }
        let ctx = &mut tree.leaves[leaf_id];
        match self.nz.as_mut().unwrap().advance(rc, ctx, table, input) {
            Progress::Pending => Progress::Pending,
            Progress::Ready(v) => {
                self.leaf = None;
                self.nz = None;
                Progress::Ready(v + self.shift)
            }
        }
    }
}

impl Default for ManiacIntReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Seeds the per-plane property-value ranges the MANIAC tree reader
/// consults while parsing split points (§4.2). Non-interlaced layout:
/// values of prior planes, optional alpha, guess, which-predictor, then
/// five delta features each spanning the plane's full `min-max`/`max-min`.
pub fn ni_prop_ranges_init(min: i32, max: i32, plane: usize, num_planes: usize, plane_minmax: impl Fn(usize) -> (i32, i32)) -> Vec<(i32, i32)> {
    let mind = min - max;
    let maxd = max - min;
    let mut out = Vec::new();
    if plane < 3 {
        for pp in 0..plane {
            out.push(plane_minmax(pp));
        }
        if num_planes > 3 {
            out.push(plane_minmax(3));
        }
    }
    out.push((min, max));
    out.push((0, 2));
    for _ in 0..5 {
        out.push((mind, maxd));
    }
    out
}

/// Interlaced layout (§4.2): prior planes/alpha, which-predictor, a
/// chroma-vs-luma delta slot for Co/Cg, four delta features, the guess,
/// and (except for Cg) two more delta features for the scan-axis
/// neighbour differences.
#[allow(clippy::too_many_arguments)]
pub fn prop_ranges_init(min: i32, max: i32, plane: usize, num_planes: usize, plane_minmax: impl Fn(usize) -> (i32, i32)) -> Vec<(i32, i32)> {
    let mind = min - max;
    let maxd = max - min;
    let mut out = Vec::new();
    if plane < 3 {
        for pp in 0..plane {
            out.push(plane_minmax(pp));
        }
        if num_planes > 3 {
            out.push(plane_minmax(3));
        }
    }
    out.push((0, 2));
    if plane == 1 || plane == 2 {
        let (y_min, y_max) = plane_minmax(0);
        out.push((y_min - y_max, y_max - y_min));
    }
    for _ in 0..4 {
        out.push((mind, maxd));
    }
    out.push((min, max));
    if plane != 2 {
        out.push((mind, maxd));
        out.push((mind, maxd));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_tree_always_returns_root_leaf() {
        let mut tree = ManiacTree::blank();
        assert_eq!(tree.find_leaf(&[0, 0, 0]), 0);
        assert_eq!(tree.find_leaf(&[5, -5, 2]), 0);
    }

    #[test]
    fn ni_prop_ranges_size_matches_reference_formula() {
        // plane 1 (Co), 4 planes total (has alpha): 1 prior plane + alpha
        // + guess + which + 5 deltas = 9.
        let ranges = ni_prop_ranges_init(-100, 100, 1, 4, |_| (0, 255));
        assert_eq!(ranges.len(), 9);
    }

    #[test]
    fn interlaced_prop_ranges_size_matches_reference_formula() {
        // plane 2 (Cg), 4 planes: 2 prior + alpha + which + luma-miss +
        // 4 deltas + guess (no trailing pair since plane == 2) = 9.
        let ranges = prop_ranges_init(-100, 100, 2, 4, |_| (0, 255));
        assert_eq!(ranges.len(), 9);
    }
}
