//! Axis-aligned bounding box primitives.
//!
//! Pure functions for collision detection - no methods, just data transformations.

use glam::Vec3;

/// Axis-Aligned Bounding Box - pure data structure
#[derive(Debug, Clone, Copy)]
pub struct AABB {
    pub min: Vec3,
    pub max: Vec3,
}

/// Create new AABB from min/max points
pub fn create_aabb(min: Vec3, max: Vec3) -> AABB {
    AABB { min, max }
}

/// Create AABB from center point and half extents
pub fn aabb_from_center_half_extents(center: Vec3, half_extents: Vec3) -> AABB {
    AABB {
        min: center - half_extents,
        max: center + half_extents,
    }
}

/// Get center point of AABB
pub fn aabb_center(aabb: &AABB) -> Vec3 {
    (aabb.min + aabb.max) * 0.5
}

/// Get half extents of AABB
pub fn aabb_half_extents(aabb: &AABB) -> Vec3 {
    (aabb.max - aabb.min) * 0.5
}

/// Test if two AABBs intersect
pub fn aabb_intersects(aabb1: &AABB, aabb2: &AABB) -> bool {
    aabb1.min.x <= aabb2.max.x
        && aabb1.max.x >= aabb2.min.x
        && aabb1.min.y <= aabb2.max.y
        && aabb1.max.y >= aabb2.min.y
        && aabb1.min.z <= aabb2.max.z
        && aabb1.max.z >= aabb2.min.z
}

/// Test if AABB contains a point
pub fn aabb_contains_point(aabb: &AABB, point: Vec3) -> bool {
    point.x >= aabb.min.x
        && point.x <= aabb.max.x
        && point.y >= aabb.min.y
        && point.y <= aabb.max.y
        && point.z >= aabb.min.z
        && point.z <= aabb.max.z
}

/// Translate AABB by offset (mutating)
pub fn aabb_translate(aabb: &mut AABB, offset: Vec3) {
    aabb.min += offset;
    aabb.max += offset;
}

/// Create translated copy of AABB
pub fn aabb_translated(aabb: &AABB, offset: Vec3) -> AABB {
    AABB {
        min: aabb.min + offset,
        max: aabb.max + offset,
    }
}

/// Calculate penetration depth and direction for collision resolution.
/// Resolves along the axis of minimum overlap, as is conventional for AABB
/// manifolds where only one contact normal is needed.
pub fn aabb_penetration_vector(aabb1: &AABB, aabb2: &AABB) -> Option<Vec3> {
    if !aabb_intersects(aabb1, aabb2) {
        return None;
    }

    let x_overlap = (aabb1.max.x.min(aabb2.max.x) - aabb1.min.x.max(aabb2.min.x)).abs();
    let y_overlap = (aabb1.max.y.min(aabb2.max.y) - aabb1.min.y.max(aabb2.min.y)).abs();
    let z_overlap = (aabb1.max.z.min(aabb2.max.z) - aabb1.min.z.max(aabb2.min.z)).abs();

    let c1 = aabb_center(aabb1);
    let c2 = aabb_center(aabb2);

    if x_overlap <= y_overlap && x_overlap <= z_overlap {
        let sign = if c1.x < c2.x { -1.0 } else { 1.0 };
        Some(Vec3::new(x_overlap * sign, 0.0, 0.0))
    } else if y_overlap <= x_overlap && y_overlap <= z_overlap {
        let sign = if c1.y < c2.y { -1.0 } else { 1.0 };
        Some(Vec3::new(0.0, y_overlap * sign, 0.0))
    } else {
        let sign = if c1.z < c2.z { -1.0 } else { 1.0 };
        Some(Vec3::new(0.0, 0.0, z_overlap * sign))
    }
}

/// Swept AABB collision detection: ray casts `aabb`'s center against `other`
/// expanded by `aabb`'s half extents (Minkowski-sum trick), returning the
/// fraction of `dt` at which they first touch.
pub fn aabb_swept_collision(aabb: &AABB, velocity: Vec3, other: &AABB, dt: f32) -> Option<f32> {
    let half_extents = aabb_half_extents(aabb);
    let expanded = AABB {
        min: other.min - half_extents,
        max: other.max + half_extents,
    };

    let ray_origin = aabb_center(aabb);
    let ray_dir = velocity * dt;

    if ray_dir == Vec3::ZERO {
        return None;
    }

    let mut t_min: f32 = 0.0;
    let mut t_max: f32 = 1.0;

    for i in 0..3 {
        let origin = ray_origin[i];
        let dir = ray_dir[i];
        let box_min = expanded.min[i];
        let box_max = expanded.max[i];

        if dir.abs() < 1e-6 {
            if origin < box_min || origin > box_max {
                return None;
            }
        } else {
            let t1 = (box_min - origin) / dir;
            let t2 = (box_max - origin) / dir;

            let t_near = t1.min(t2);
            let t_far = t1.max(t2);

            t_min = t_min.max(t_near);
            t_max = t_max.min(t_far);

            if t_min > t_max {
                return None;
            }
        }
    }

    if (0.0..=1.0).contains(&t_min) {
        Some(t_min)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_boxes_intersect() {
        let a = create_aabb(Vec3::ZERO, Vec3::splat(2.0));
        let b = create_aabb(Vec3::splat(1.0), Vec3::splat(3.0));
        assert!(aabb_intersects(&a, &b));
    }

    #[test]
    fn disjoint_boxes_do_not_intersect() {
        let a = create_aabb(Vec3::ZERO, Vec3::splat(1.0));
        let b = create_aabb(Vec3::splat(5.0), Vec3::splat(6.0));
        assert!(!aabb_intersects(&a, &b));
    }

    #[test]
    fn penetration_vector_picks_minimum_axis() {
        let a = create_aabb(Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0));
        let b = create_aabb(Vec3::new(1.9, 0.0, 0.0), Vec3::new(3.9, 2.0, 2.0));
        let pen = aabb_penetration_vector(&a, &b).unwrap();
        assert!(pen.x.abs() > 0.0);
        assert_eq!(pen.y, 0.0);
        assert_eq!(pen.z, 0.0);
    }

    #[test]
    fn swept_collision_finds_approach_time() {
        let a = create_aabb(Vec3::splat(-0.5), Vec3::splat(0.5));
        let b = create_aabb(Vec3::new(4.5, -0.5, -0.5), Vec3::new(5.5, 0.5, 0.5));
        let t = aabb_swept_collision(&a, Vec3::new(10.0, 0.0, 0.0), &b, 1.0);
        assert!(t.is_some());
        assert!(t.unwrap() > 0.0 && t.unwrap() < 1.0);
    }

    #[test]
    fn swept_collision_none_when_stationary() {
        let a = create_aabb(Vec3::ZERO, Vec3::splat(1.0));
        let b = create_aabb(Vec3::splat(5.0), Vec3::splat(6.0));
        assert!(aabb_swept_collision(&a, Vec3::ZERO, &b, 1.0).is_none());
    }
}
