//! Probe Neighbor Graph
//!
//! Keeps a symmetric adjacency relation between probes whose influence
//! volumes overlap, so the shading stage can blend a probe with the others
//! covering the same surface. Edges are stored as [`ProbeId`]s on both
//! endpoints; a probe is never its own neighbor.
//!
//! The graph is rebuilt for a single probe when it completes a capture cycle
//! and torn down (both directions) when a probe is deleted.

use glam::{Mat4, Vec3};

use crate::probe::{InfluenceVolume, ProbeHandle, ProbeId, ReflectionProbe};

/// Intersection predicate over two probes' influence volumes
///
/// Implementations must be symmetric. Closures are accepted as well.
pub trait InfluenceTest {
    /// Whether the influence volumes of `a` and `b` overlap
    fn intersects(&self, a: &ReflectionProbe, b: &ReflectionProbe) -> bool;
}

impl<F> InfluenceTest for F
where
    F: Fn(&ReflectionProbe, &ReflectionProbe) -> bool,
{
    fn intersects(&self, a: &ReflectionProbe, b: &ReflectionProbe) -> bool {
        self(a, b)
    }
}

/// Default predicate: exact sphere/sphere, sphere/box and box/box (SAT) tests
#[derive(Clone, Copy, Debug, Default)]
pub struct VolumeOverlap;

impl InfluenceTest for VolumeOverlap {
    fn intersects(&self, a: &ReflectionProbe, b: &ReflectionProbe) -> bool {
        match (Shape::of(a), Shape::of(b)) {
            (Shape::Sphere(ca, ra), Shape::Sphere(cb, rb)) => ca.distance(cb) < ra + rb,
            (Shape::Sphere(c, r), Shape::Box(obb)) | (Shape::Box(obb), Shape::Sphere(c, r)) => {
                obb.closest_point(c).distance(c) < r
            }
            (Shape::Box(a), Shape::Box(b)) => a.overlaps(&b),
        }
    }
}

enum Shape {
    Sphere(Vec3, f32),
    Box(Obb),
}

impl Shape {
    fn of(probe: &ReflectionProbe) -> Self {
        match probe.influence {
            InfluenceVolume::Sphere => Shape::Sphere(probe.origin, probe.radius),
            InfluenceVolume::Box(transform) => Shape::Box(Obb::from_transform(&transform)),
        }
    }
}

/// Oriented box decomposed from a unit-cube transform
#[derive(Clone, Copy, Debug)]
struct Obb {
    center: Vec3,
    axes: [Vec3; 3],
    half: [f32; 3],
}

impl Obb {
    fn from_transform(transform: &Mat4) -> Self {
        let columns = [
            transform.x_axis.truncate(),
            transform.y_axis.truncate(),
            transform.z_axis.truncate(),
        ];
        Self {
            center: transform.w_axis.truncate(),
            axes: columns.map(Vec3::normalize_or_zero),
            half: columns.map(Vec3::length),
        }
    }

    fn closest_point(&self, point: Vec3) -> Vec3 {
        let d = point - self.center;
        (0..3).fold(self.center, |acc, i| {
            let dist = d.dot(self.axes[i]).clamp(-self.half[i], self.half[i]);
            acc + self.axes[i] * dist
        })
    }

    /// Separating axis test over the 15 candidate axes
    fn overlaps(&self, other: &Obb) -> bool {
        const EPSILON: f32 = 1e-6;

        let mut r = [[0.0f32; 3]; 3];
        let mut abs_r = [[0.0f32; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                r[i][j] = self.axes[i].dot(other.axes[j]);
                abs_r[i][j] = r[i][j].abs() + EPSILON;
            }
        }

        let offset = other.center - self.center;
        let t = [
            offset.dot(self.axes[0]),
            offset.dot(self.axes[1]),
            offset.dot(self.axes[2]),
        ];
        let (a, b) = (&self.half, &other.half);

        for i in 0..3 {
            let rb = b[0] * abs_r[i][0] + b[1] * abs_r[i][1] + b[2] * abs_r[i][2];
            if t[i].abs() > a[i] + rb {
                return false;
            }
        }

        for j in 0..3 {
            let ra = a[0] * abs_r[0][j] + a[1] * abs_r[1][j] + a[2] * abs_r[2][j];
            let tj = t[0] * r[0][j] + t[1] * r[1][j] + t[2] * r[2][j];
            if tj.abs() > ra + b[j] {
                return false;
            }
        }

        for i in 0..3 {
            let (i1, i2) = ((i + 1) % 3, (i + 2) % 3);
            for j in 0..3 {
                let (j1, j2) = ((j + 1) % 3, (j + 2) % 3);
                let ra = a[i1] * abs_r[i2][j] + a[i2] * abs_r[i1][j];
                let rb = b[j1] * abs_r[i][j2] + b[j2] * abs_r[i][j1];
                let tl = t[i2] * r[i1][j] - t[i1] * r[i2][j];
                if tl.abs() > ra + rb {
                    return false;
                }
            }
        }

        true
    }
}

fn find<'a>(probes: &'a [ProbeHandle], id: ProbeId) -> Option<&'a ProbeHandle> {
    probes.iter().find(|handle| handle.id() == id)
}

/// Remove `probe` from every neighbor's list and clear its own list
pub fn detach(probe: &ProbeHandle, probes: &[ProbeHandle]) {
    let (id, old) = {
        let mut p = probe.write();
        (p.id(), std::mem::take(&mut p.neighbors))
    };

    for other_id in old {
        if let Some(other) = find(probes, other_id) {
            other.write().neighbors.retain(|n| *n != id);
        }
    }
}

/// Recompute `probe`'s edges against every other live probe
///
/// Returns the number of neighbors found.
pub fn rebuild(probe: &ProbeHandle, probes: &[ProbeHandle], test: &dyn InfluenceTest) -> usize {
    detach(probe, probes);

    let id = probe.id();
    let mut found = Vec::new();
    for other in probes {
        if other.ptr_eq(probe) {
            continue;
        }
        let hit = {
            let a = probe.read();
            let b = other.read();
            test.intersects(&a, &b)
        };
        if hit {
            let mut b = other.write();
            if !b.neighbors.contains(&id) {
                b.neighbors.push(id);
            }
            found.push(b.id());
        }
    }

    let count = found.len();
    probe.write().neighbors = found;
    count
}

/// Check `B ∈ A.neighbors ⇔ A ∈ B.neighbors` and irreflexivity over `probes`
pub fn is_symmetric(probes: &[ProbeHandle]) -> bool {
    probes.iter().all(|handle| {
        let (id, neighbors) = {
            let p = handle.read();
            (p.id(), p.neighbors.clone())
        };
        neighbors.iter().all(|other_id| {
            *other_id != id
                && find(probes, *other_id)
                    .map(|other| other.read().neighbors.contains(&id))
                    .unwrap_or(false)
        })
    })
}

/// Number of undirected edges
pub fn edge_count(probes: &[ProbeHandle]) -> usize {
    probes.iter().map(|p| p.read().neighbors.len()).sum::<usize>() / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn sphere(x: f32, radius: f32) -> ProbeHandle {
        ProbeHandle::new(ReflectionProbe::new(Vec3::new(x, 0.0, 0.0), radius))
    }

    #[test]
    fn test_sphere_overlap() {
        let a = ReflectionProbe::new(Vec3::ZERO, 10.0);
        let b = ReflectionProbe::new(Vec3::new(15.0, 0.0, 0.0), 10.0);
        let c = ReflectionProbe::new(Vec3::new(25.0, 0.0, 0.0), 10.0);
        assert!(VolumeOverlap.intersects(&a, &b));
        assert!(VolumeOverlap.intersects(&b, &a));
        assert!(!VolumeOverlap.intersects(&a, &c));
    }

    #[test]
    fn test_box_overlap() {
        let unit = |center: Vec3, rotation: Quat| {
            ReflectionProbe::new(center, 1.0).with_box(Mat4::from_scale_rotation_translation(
                Vec3::ONE,
                rotation,
                center,
            ))
        };

        let a = unit(Vec3::ZERO, Quat::IDENTITY);
        let b = unit(Vec3::new(1.5, 0.0, 0.0), Quat::IDENTITY);
        let c = unit(Vec3::new(2.5, 0.0, 0.0), Quat::IDENTITY);
        // Rotated 45 degrees, its corner reaches sqrt(2) towards `a`
        let d = unit(
            Vec3::new(3.3, 0.0, 0.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_4),
        );
        let e = unit(
            Vec3::new(2.3, 0.0, 0.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_4),
        );

        assert!(VolumeOverlap.intersects(&a, &b));
        assert!(!VolumeOverlap.intersects(&a, &c));
        assert!(!VolumeOverlap.intersects(&a, &d));
        assert!(VolumeOverlap.intersects(&a, &e));
        assert!(VolumeOverlap.intersects(&e, &a));
    }

    #[test]
    fn test_sphere_box_overlap() {
        let boxed = ReflectionProbe::new(Vec3::ZERO, 1.0)
            .with_box(Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0)));
        let near = ReflectionProbe::new(Vec3::new(2.5, 0.0, 0.0), 1.0);
        let far = ReflectionProbe::new(Vec3::new(3.5, 0.0, 0.0), 1.0);
        assert!(VolumeOverlap.intersects(&boxed, &near));
        assert!(VolumeOverlap.intersects(&near, &boxed));
        assert!(!VolumeOverlap.intersects(&far, &boxed));
    }

    #[test]
    fn test_rebuild_and_move_apart() {
        let a = sphere(0.0, 10.0);
        let b = sphere(15.0, 10.0);
        let probes = vec![a.clone(), b.clone()];

        assert_eq!(rebuild(&a, &probes, &VolumeOverlap), 1);
        assert_eq!(a.read().neighbors(), &[b.id()]);
        assert_eq!(b.read().neighbors(), &[a.id()]);

        b.set_origin(Vec3::new(25.0, 0.0, 0.0));
        assert_eq!(rebuild(&a, &probes, &VolumeOverlap), 0);
        assert!(a.read().neighbors().is_empty());
        assert!(b.read().neighbors().is_empty());
        assert!(is_symmetric(&probes));
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let probes: Vec<_> = (0..4).map(|i| sphere(i as f32 * 5.0, 4.0)).collect();
        for probe in &probes {
            rebuild(probe, &probes, &VolumeOverlap);
        }
        let edges = edge_count(&probes);
        rebuild(&probes[1], &probes, &VolumeOverlap);
        assert_eq!(edge_count(&probes), edges);
        assert!(is_symmetric(&probes));
        assert!(!probes[0].read().neighbors().contains(&probes[0].id()));
    }

    #[test]
    fn test_detach() {
        let probes: Vec<_> = (0..3).map(|i| sphere(i as f32, 5.0)).collect();
        for probe in &probes {
            rebuild(probe, &probes, &VolumeOverlap);
        }
        assert_eq!(edge_count(&probes), 3);

        detach(&probes[1], &probes);
        assert!(probes[1].read().neighbors().is_empty());
        assert_eq!(probes[0].read().neighbors(), &[probes[2].id()]);
        assert!(is_symmetric(&probes));
    }

    #[test]
    fn test_custom_predicate() {
        let probes: Vec<_> = (0..3).map(|i| sphere(i as f32 * 100.0, 1.0)).collect();
        let always = |_: &ReflectionProbe, _: &ReflectionProbe| true;
        assert_eq!(rebuild(&probes[0], &probes, &always), 2);
        assert!(is_symmetric(&probes));
    }
}
