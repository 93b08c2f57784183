//! Binary BVH over voxel-body bounding spheres: SAH build, refit, and
//! ray/sphere/AABB candidate queries.
//!
//! Node layout is grounded on [`crate::world::compute::bvh::BvhNode`] (32-byte
//! `repr(C)` node, `prim_count == 0` marks an internal node) stripped of every
//! GPU-upload concern; the SAH build algorithm (binned cost, no-split
//! fallback) is adapted from the same file's `find_best_split`/`build_recursive`.
//!
//! Per SPEC_FULL.md §9 / the "store AABBs at world index, not BVH-internal
//! index" bug the source engine documents: [`Bvh::object_aabb`] and
//! [`Bvh::object_centroid`] are indexed by the *world* body-slot index, never
//! by a compacted build-time position. Only `leaf_objects` (which stores world
//! indices as its payload) and `nodes` use BVH-internal numbering.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use static_assertions::const_assert_eq;

use crate::constants::bvh::{LEAF_MAX_OBJECTS, MAX_DEPTH, SAH_BINS};
use crate::constants::vobj::MAX_OBJECTS as MAX_WORLD_OBJECTS;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: i32,
    pub aabb_max: [f32; 3],
    pub count: i32,
}

const_assert_eq!(std::mem::size_of::<BvhNode>(), 32);

impl BvhNode {
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeAabb {
    min: Vec3,
    max: Vec3,
}

impl NodeAabb {
    fn empty() -> Self {
        NodeAabb {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    fn grow(&mut self, min: Vec3, max: Vec3) {
        self.min = self.min.min(min);
        self.max = self.max.max(max);
    }

    fn union(&mut self, other: NodeAabb) {
        self.grow(other.min, other.max);
    }

    fn surface_area(&self) -> f32 {
        let d = (self.max - self.min).max(Vec3::ZERO);
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }
}

/// One body's cached bounding data, keyed by BVH build-time (compacted) slot;
/// the world index it refers back to travels alongside it.
#[derive(Debug, Clone, Copy)]
struct BuildEntry {
    world_index: i32,
    center: Vec3,
    min: Vec3,
    max: Vec3,
}

pub struct Bvh {
    pub nodes: Vec<BvhNode>,
    pub leaf_objects: Vec<i32>,
    /// World-index-keyed caches, per SPEC_FULL.md §9's documented bug fix.
    pub object_aabb: Vec<NodeAabbPublic>,
    root: i32,
    referenced_world_indices: Vec<i32>,
}

/// Public alias so the AABB cache can be read by callers without exposing
/// the build-time-only [`NodeAabb`] helper type.
pub type NodeAabbPublic = NodeAabb;

pub fn create() -> Bvh {
    Bvh {
        nodes: Vec::new(),
        leaf_objects: Vec::new(),
        object_aabb: vec![NodeAabb::empty(); MAX_WORLD_OBJECTS],
        root: -1,
        referenced_world_indices: Vec::new(),
    }
}

/// Bounding-sphere source for one active body: world index, center, radius.
pub type BodyBounds = (i32, Vec3, f32);

fn sphere_aabb(center: Vec3, radius: f32) -> (Vec3, Vec3) {
    (center - Vec3::splat(radius), center + Vec3::splat(radius))
}

/// Full rebuild from scratch. Called when active-body count changes or a
/// previously referenced world index has gone inactive (§4.6).
pub fn rebuild(bvh: &mut Bvh, bodies: &[BodyBounds]) {
    bvh.nodes.clear();
    bvh.leaf_objects.clear();
    bvh.referenced_world_indices.clear();

    let mut entries: Vec<BuildEntry> = bodies
        .iter()
        .map(|&(world_index, center, radius)| {
            let (min, max) = sphere_aabb(center, radius);
            bvh.object_aabb[world_index as usize] = NodeAabb { min, max };
            BuildEntry {
                world_index,
                center,
                min,
                max,
            }
        })
        .collect();

    if entries.is_empty() {
        bvh.root = -1;
        return;
    }

    bvh.root = 0;
    let len = entries.len();
    build_recursive(bvh, &mut entries, 0, len, 0);

    bvh.referenced_world_indices = entries.iter().map(|e| e.world_index).collect();
}

fn build_recursive(bvh: &mut Bvh, entries: &mut [BuildEntry], start: usize, end: usize, depth: u32) -> i32 {
    let node_index = bvh.nodes.len() as i32;
    bvh.nodes.push(BvhNode {
        aabb_min: [0.0; 3],
        aabb_max: [0.0; 3],
        left_or_first: 0,
        count: 0,
    });

    let mut bounds = NodeAabb::empty();
    for e in &entries[start..end] {
        bounds.grow(e.min, e.max);
    }

    let count = end - start;
    let make_leaf = count <= LEAF_MAX_OBJECTS || depth >= MAX_DEPTH;

    if !make_leaf {
        if let Some((axis, split_pos, cost)) = find_best_split(&entries[start..end], bounds) {
            let leaf_cost = count as f32;
            if cost < leaf_cost {
                let mut mid = start;
                for i in start..end {
                    if entries[i].center[axis] < split_pos {
                        entries.swap(mid, i);
                        mid += 1;
                    }
                }
                if mid != start && mid != end {
                    let left = build_recursive(bvh, entries, start, mid, depth + 1);
                    let right = build_recursive(bvh, entries, mid, end, depth + 1);
                    bvh.nodes[node_index as usize] = BvhNode {
                        aabb_min: bounds.min.into(),
                        aabb_max: bounds.max.into(),
                        left_or_first: left,
                        count: 0,
                    };
                    debug_assert_eq!(right, left + 1);
                    return node_index;
                }
            }
        }
    }

    let first = bvh.leaf_objects.len() as i32;
    for e in &entries[start..end] {
        bvh.leaf_objects.push(e.world_index);
    }
    bvh.nodes[node_index as usize] = BvhNode {
        aabb_min: bounds.min.into(),
        aabb_max: bounds.max.into(),
        left_or_first: first,
        count: count as i32,
    };
    node_index
}

/// Binned SAH split search (8 bins per axis, per SPEC_FULL.md §4.6). Returns
/// `None` if the entries share one point (degenerate, always a leaf).
fn find_best_split(entries: &[BuildEntry], bounds: NodeAabb) -> Option<(usize, f32, f32)> {
    let extent = bounds.max - bounds.min;
    let parent_area = bounds.surface_area();
    if parent_area <= 0.0 {
        return None;
    }

    let mut best: Option<(usize, f32, f32)> = None;

    for axis in 0..3 {
        if extent[axis] <= 1e-5 {
            continue;
        }
        let bin_count = SAH_BINS;
        let bin_size = extent[axis] / bin_count as f32;

        let mut bin_bounds = vec![NodeAabb::empty(); bin_count];
        let mut bin_counts = vec![0u32; bin_count];

        for e in entries {
            let rel = ((e.center[axis] - bounds.min[axis]) / bin_size) as usize;
            let b = rel.min(bin_count - 1);
            bin_bounds[b].grow(e.min, e.max);
            bin_counts[b] += 1;
        }

        for split_bin in 1..bin_count {
            let mut left = NodeAabb::empty();
            let mut left_count = 0u32;
            for b in &bin_bounds[..split_bin] {
                left.union(*b);
            }
            for c in &bin_counts[..split_bin] {
                left_count += c;
            }

            let mut right = NodeAabb::empty();
            let mut right_count = 0u32;
            for b in &bin_bounds[split_bin..] {
                right.union(*b);
            }
            for c in &bin_counts[split_bin..] {
                right_count += c;
            }

            if left_count == 0 || right_count == 0 {
                continue;
            }

            let cost = 1.0
                + (left.surface_area() * left_count as f32 + right.surface_area() * right_count as f32)
                    / parent_area;

            if best.map_or(true, |(_, _, bc)| cost < bc) {
                let split_pos = bounds.min[axis] + split_bin as f32 * bin_size;
                best = Some((axis, split_pos, cost));
            }
        }
    }

    best
}

/// Refit every node bottom-up from the bodies' current positions, without
/// changing tree topology. Caller is responsible for calling [`rebuild`]
/// instead when topology must change (§4.6).
pub fn refit(bvh: &mut Bvh, bodies: &[BodyBounds]) {
    for &(world_index, center, radius) in bodies {
        let (min, max) = sphere_aabb(center, radius);
        bvh.object_aabb[world_index as usize] = NodeAabb { min, max };
    }

    if bvh.root < 0 {
        return;
    }
    refit_node(bvh, bvh.root as usize);
}

fn refit_node(bvh: &mut Bvh, node_idx: usize) -> NodeAabb {
    let node = bvh.nodes[node_idx];
    if node.is_leaf() {
        let mut bounds = NodeAabb::empty();
        let first = node.left_or_first as usize;
        let count = node.count as usize;
        for &world_index in &bvh.leaf_objects[first..first + count] {
            bounds.union(bvh.object_aabb[world_index as usize]);
        }
        bvh.nodes[node_idx].aabb_min = bounds.min.into();
        bvh.nodes[node_idx].aabb_max = bounds.max.into();
        bounds
    } else {
        let left = node.left_or_first as usize;
        let right = left + 1;
        let lb = refit_node(bvh, left);
        let rb = refit_node(bvh, right);
        let mut bounds = lb;
        bounds.union(rb);
        bvh.nodes[node_idx].aabb_min = bounds.min.into();
        bvh.nodes[node_idx].aabb_max = bounds.max.into();
        bounds
    }
}

/// True if any world index referenced by the current tree is no longer in
/// `active_world_indices` — the rebuild trigger from §4.6.
pub fn needs_rebuild(bvh: &Bvh, active_world_indices: &[i32]) -> bool {
    if bvh.referenced_world_indices.len() != active_world_indices.len() {
        return true;
    }
    let mut a: Vec<i32> = bvh.referenced_world_indices.clone();
    let mut b: Vec<i32> = active_world_indices.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a != b
}

fn node_aabb(node: &BvhNode) -> NodeAabb {
    NodeAabb {
        min: Vec3::from(node.aabb_min),
        max: Vec3::from(node.aabb_max),
    }
}

fn ray_slab(aabb: NodeAabb, origin: Vec3, inv_dir: Vec3) -> bool {
    let t1 = (aabb.min - origin) * inv_dir;
    let t2 = (aabb.max - origin) * inv_dir;
    let tmin = t1.min(t2);
    let tmax = t1.max(t2);
    let near = tmin.x.max(tmin.y).max(tmin.z);
    let far = tmax.x.min(tmax.y).min(tmax.z);
    far >= near && far >= 0.0
}

/// Front-to-back ray candidate collection, capped at `out.capacity()` (or
/// unbounded if `out` has none).
pub fn query_ray(bvh: &Bvh, origin: Vec3, dir: Vec3, max_candidates: usize, out: &mut Vec<i32>) {
    if bvh.root < 0 {
        return;
    }
    let inv_dir = Vec3::new(
        if dir.x.abs() > 1e-8 { 1.0 / dir.x } else { 1e10 },
        if dir.y.abs() > 1e-8 { 1.0 / dir.y } else { 1e10 },
        if dir.z.abs() > 1e-8 { 1.0 / dir.z } else { 1e10 },
    );
    let mut stack = vec![bvh.root];
    while let Some(idx) = stack.pop() {
        if out.len() >= max_candidates {
            return;
        }
        let node = bvh.nodes[idx as usize];
        if !ray_slab(node_aabb(&node), origin, inv_dir) {
            continue;
        }
        if node.is_leaf() {
            let first = node.left_or_first as usize;
            let count = node.count as usize;
            for &w in &bvh.leaf_objects[first..first + count] {
                if out.len() >= max_candidates {
                    return;
                }
                out.push(w);
            }
        } else {
            stack.push(node.left_or_first);
            stack.push(node.left_or_first + 1);
        }
    }
}

fn aabb_closest_point(aabb: NodeAabb, point: Vec3) -> Vec3 {
    point.clamp(aabb.min, aabb.max)
}

pub fn query_sphere(bvh: &Bvh, center: Vec3, radius: f32, out: &mut Vec<i32>) {
    if bvh.root < 0 {
        return;
    }
    let mut stack = vec![bvh.root];
    let r2 = radius * radius;
    while let Some(idx) = stack.pop() {
        let node = bvh.nodes[idx as usize];
        let aabb = node_aabb(&node);
        let closest = aabb_closest_point(aabb, center);
        if (closest - center).length_squared() > r2 {
            continue;
        }
        if node.is_leaf() {
            let first = node.left_or_first as usize;
            let count = node.count as usize;
            out.extend_from_slice(&bvh.leaf_objects[first..first + count]);
        } else {
            stack.push(node.left_or_first);
            stack.push(node.left_or_first + 1);
        }
    }
}

pub fn query_aabb(bvh: &Bvh, query_min: Vec3, query_max: Vec3, out: &mut Vec<i32>) {
    if bvh.root < 0 {
        return;
    }
    let mut stack = vec![bvh.root];
    while let Some(idx) = stack.pop() {
        let node = bvh.nodes[idx as usize];
        let aabb = node_aabb(&node);
        let overlap = aabb.min.x <= query_max.x
            && aabb.max.x >= query_min.x
            && aabb.min.y <= query_max.y
            && aabb.max.y >= query_min.y
            && aabb.min.z <= query_max.z
            && aabb.max.z >= query_min.z;
        if !overlap {
            continue;
        }
        if node.is_leaf() {
            let first = node.left_or_first as usize;
            let count = node.count as usize;
            out.extend_from_slice(&bvh.leaf_objects[first..first + count]);
        } else {
            stack.push(node.left_or_first);
            stack.push(node.left_or_first + 1);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BvhStats {
    pub node_count: usize,
    pub leaf_count: usize,
    pub object_count: usize,
}

pub fn stats(bvh: &Bvh) -> BvhStats {
    BvhStats {
        node_count: bvh.nodes.len(),
        leaf_count: bvh.nodes.iter().filter(|n| n.is_leaf()).count(),
        object_count: bvh.leaf_objects.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_body_builds_one_leaf() {
        let mut bvh = create();
        rebuild(&mut bvh, &[(0, Vec3::ZERO, 1.0)]);
        assert_eq!(bvh.nodes.len(), 1);
        assert!(bvh.nodes[0].is_leaf());
    }

    #[test]
    fn ray_query_finds_body_on_axis() {
        let mut bvh = create();
        rebuild(&mut bvh, &[(5, Vec3::new(10.0, 0.0, 0.0), 1.0)]);
        let mut hits = Vec::new();
        query_ray(&bvh, Vec3::ZERO, Vec3::X, 16, &mut hits);
        assert_eq!(hits, vec![5]);
    }

    #[test]
    fn sphere_query_excludes_far_bodies() {
        let mut bvh = create();
        rebuild(
            &mut bvh,
            &[(0, Vec3::ZERO, 1.0), (1, Vec3::new(100.0, 0.0, 0.0), 1.0)],
        );
        let mut hits = Vec::new();
        query_sphere(&bvh, Vec3::ZERO, 5.0, &mut hits);
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn refit_updates_bounds_without_changing_topology() {
        let mut bvh = create();
        rebuild(&mut bvh, &[(0, Vec3::ZERO, 1.0), (1, Vec3::splat(20.0), 1.0)]);
        let node_count_before = bvh.nodes.len();
        refit(&mut bvh, &[(0, Vec3::splat(5.0), 1.0), (1, Vec3::splat(20.0), 1.0)]);
        assert_eq!(bvh.nodes.len(), node_count_before);
        let root = bvh.nodes[bvh.root as usize];
        assert!(root.aabb_min[0] <= 5.0);
    }

    #[test]
    fn needs_rebuild_detects_world_index_change() {
        let mut bvh = create();
        rebuild(&mut bvh, &[(0, Vec3::ZERO, 1.0), (1, Vec3::splat(5.0), 1.0)]);
        assert!(!needs_rebuild(&bvh, &[0, 1]));
        assert!(needs_rebuild(&bvh, &[0]));
        assert!(needs_rebuild(&bvh, &[0, 2]));
    }

    #[test]
    fn object_aabb_is_indexed_by_world_slot() {
        let mut bvh = create();
        // World index 7, even though it's the only (and thus compacted-index-0) body.
        rebuild(&mut bvh, &[(7, Vec3::splat(3.0), 2.0)]);
        let cached = bvh.object_aabb[7];
        assert_eq!(cached.min, Vec3::splat(1.0));
    }
}
