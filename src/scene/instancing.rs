use glam::{Mat4, Quat, Vec3};
use rand::{Rng, SeedableRng, rngs::SmallRng};

use super::accel::BlasHandle;

/// Per-instance behaviour bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct InstanceFlags(u8);

impl InstanceFlags {
    pub const NONE: Self = Self(0);
    /// Triangles are hit from both sides.
    pub const TRIANGLE_CULL_DISABLE: Self = Self(1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for InstanceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One placement of a BLAS in the top-level structure.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Instance {
    pub blas: BlasHandle,
    pub transform: Mat4,
    pub mask: u8,
    pub flags: InstanceFlags,
}

impl Instance {
    pub fn new(blas: BlasHandle, transform: Mat4) -> Self {
        Self {
            blas,
            transform,
            mask: 0xFF,
            flags: InstanceFlags::TRIANGLE_CULL_DISABLE,
        }
    }

    /// Row-major 3x4 affine matrix, the layout TLAS instances store.
    pub fn transform_rows(&self) -> [f32; 12] {
        let cols = self.transform.transpose().to_cols_array();
        let mut rows = [0.0; 12];
        rows.copy_from_slice(&cols[..12]);
        rows
    }
}

/// Placements of one shared BLAS.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceGroup {
    pub blas: BlasHandle,
    pub transforms: Vec<Mat4>,
}

/// BLAS -> transforms table. Geometry is stored once per BLAS no matter how
/// many times it is placed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceTable {
    groups: Vec<InstanceGroup>,
}

impl InstanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mesh once, untransformed.
    pub fn single(blas: BlasHandle) -> Self {
        let mut table = Self::new();
        table.add(blas, Mat4::IDENTITY);
        table
    }

    /// `count` deterministic random placements of `blas` around the origin.
    pub fn scattered(blas: BlasHandle, count: u32, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut table = Self::new();
        for _ in 0..count {
            table.add(blas, random_transform(&mut rng));
        }
        table
    }

    pub fn add(&mut self, blas: BlasHandle, transform: Mat4) {
        match self.groups.last_mut() {
            Some(group) if group.blas == blas => group.transforms.push(transform),
            _ => self.groups.push(InstanceGroup {
                blas,
                transforms: vec![transform],
            }),
        }
    }

    pub fn groups(&self) -> &[InstanceGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.transforms.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens the table in insertion order. The position in the returned
    /// list is the instance index the kernel sees.
    pub fn instances(&self) -> Vec<Instance> {
        self.groups
            .iter()
            .flat_map(|group| {
                group
                    .transforms
                    .iter()
                    .map(move |&transform| Instance::new(group.blas, transform))
            })
            .collect()
    }
}

fn random_transform(rng: &mut SmallRng) -> Mat4 {
    let translation = Vec3::new(
        rng.gen_range(-4.0..4.0),
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-4.0..4.0),
    );
    let axis = Vec3::new(
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
    )
    .try_normalize()
    .unwrap_or(Vec3::Y);
    let angle = rng.gen_range(0.0..std::f32::consts::TAU);
    let scale = rng.gen_range(0.5..1.5);

    Mat4::from_scale_rotation_translation(
        Vec3::splat(scale),
        Quat::from_axis_angle(axis, angle),
        translation,
    )
}
