//! Image buffers and geometry
//!
//! Volumes are stored flat in Fortran (column-major) order to match NIfTI
//! convention: index = x + y*nx + z*nx*ny. 2D images use nz = 1.

use crate::error::{N3Error, Result};

/// Index into a 3D array stored in Fortran order (column-major)
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// Full-resolution index sampled by output index `i` of a shrink by `factor`
/// along an axis of length `n`.
#[inline]
pub fn shrunk_source_index(i: usize, factor: usize, n: usize) -> usize {
    (i * factor + (factor - 1) / 2).min(n.saturating_sub(1))
}

/// Size, spacing, origin and direction of a voxel grid
#[derive(Clone, Debug, PartialEq)]
pub struct ImageGeometry {
    pub dims: [usize; 3],
    /// Voxel sizes (mm)
    pub spacing: [f64; 3],
    /// Physical position of voxel (0, 0, 0)
    pub origin: [f64; 3],
    /// Orthonormal direction cosines, column `d` is the direction of axis `d`
    pub direction: [[f64; 3]; 3],
}

impl ImageGeometry {
    /// Axis-aligned geometry with the origin at zero
    pub fn new(dims: [usize; 3], spacing: [f64; 3]) -> Self {
        Self {
            dims,
            spacing,
            origin: [0.0; 3],
            direction: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    pub fn with_origin(mut self, origin: [f64; 3]) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_direction(mut self, direction: [[f64; 3]; 3]) -> Self {
        self.direction = direction;
        self
    }

    #[inline]
    pub fn n_total(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Physical position of a (possibly fractional) voxel index
    pub fn index_to_physical(&self, index: [f64; 3]) -> [f64; 3] {
        let mut p = self.origin;
        for (r, row) in p.iter_mut().enumerate() {
            for d in 0..3 {
                *row += self.direction[r][d] * self.spacing[d] * index[d];
            }
        }
        p
    }

    /// Continuous voxel index of a physical position
    pub fn physical_to_index(&self, point: [f64; 3]) -> [f64; 3] {
        let rel = [
            point[0] - self.origin[0],
            point[1] - self.origin[1],
            point[2] - self.origin[2],
        ];
        let mut q = [0.0; 3];
        for d in 0..3 {
            // direction is orthonormal, so its inverse is its transpose
            let proj: f64 = (0..3).map(|r| self.direction[r][d] * rel[r]).sum();
            q[d] = proj / self.spacing[d];
        }
        q
    }

    /// Geometry of the grid obtained by keeping every `factors[d]`-th voxel
    pub fn shrink(&self, factors: [usize; 3]) -> Self {
        let mut dims = [1usize; 3];
        let mut spacing = self.spacing;
        let mut offset = [0.0; 3];
        for d in 0..3 {
            dims[d] = (self.dims[d] / factors[d]).max(1);
            spacing[d] = self.spacing[d] * factors[d] as f64;
            offset[d] = shrunk_source_index(0, factors[d], self.dims[d]) as f64;
        }
        Self {
            dims,
            spacing,
            origin: self.index_to_physical(offset),
            direction: self.direction,
        }
    }

    fn check_len(&self, len: usize, what: &str) -> Result<()> {
        if len != self.n_total() {
            return Err(N3Error::Domain(format!(
                "{} has {} voxels but geometry {:?} needs {}",
                what, len, self.dims, self.n_total()
            )));
        }
        if self.dims.iter().any(|&n| n == 0) {
            return Err(N3Error::Domain(format!("empty image dimensions {:?}", self.dims)));
        }
        Ok(())
    }
}

/// Floating-point volume
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarImage {
    pub geometry: ImageGeometry,
    pub data: Vec<f64>,
}

impl ScalarImage {
    pub fn new(geometry: ImageGeometry, data: Vec<f64>) -> Result<Self> {
        geometry.check_len(data.len(), "image")?;
        Ok(Self { geometry, data })
    }

    /// Image of the given geometry filled with `value`
    pub fn filled(geometry: ImageGeometry, value: f64) -> Self {
        let n = geometry.n_total();
        Self { geometry, data: vec![value; n] }
    }

    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.geometry.dims
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        let [nx, ny, _] = self.geometry.dims;
        self.data[idx3d(i, j, k, nx, ny)]
    }

    /// Subsampled copy (see [`ImageGeometry::shrink`])
    pub fn shrink(&self, factors: [usize; 3]) -> Self {
        let data = shrink_buffer(&self.data, self.geometry.dims, factors);
        Self { geometry: self.geometry.shrink(factors), data }
    }
}

/// Label volume sharing a [`ScalarImage`]'s geometry
#[derive(Clone, Debug, PartialEq)]
pub struct MaskImage {
    pub geometry: ImageGeometry,
    pub labels: Vec<u8>,
}

impl MaskImage {
    pub fn new(geometry: ImageGeometry, labels: Vec<u8>) -> Result<Self> {
        geometry.check_len(labels.len(), "mask")?;
        Ok(Self { geometry, labels })
    }

    pub fn shrink(&self, factors: [usize; 3]) -> Self {
        let labels = shrink_buffer(&self.labels, self.geometry.dims, factors);
        Self { geometry: self.geometry.shrink(factors), labels }
    }

    /// Number of voxels carrying `label`
    pub fn count(&self, label: u8) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }
}

fn shrink_buffer<T: Copy>(data: &[T], dims: [usize; 3], factors: [usize; 3]) -> Vec<T> {
    let [nx, ny, nz] = dims;
    let out_dims = [
        (nx / factors[0]).max(1),
        (ny / factors[1]).max(1),
        (nz / factors[2]).max(1),
    ];
    let mut out = Vec::with_capacity(out_dims[0] * out_dims[1] * out_dims[2]);
    for k in 0..out_dims[2] {
        let sk = shrunk_source_index(k, factors[2], nz);
        for j in 0..out_dims[1] {
            let sj = shrunk_source_index(j, factors[1], ny);
            for i in 0..out_dims[0] {
                let si = shrunk_source_index(i, factors[0], nx);
                out.push(data[idx3d(si, sj, sk, nx, ny)]);
            }
        }
    }
    out
}

/// Mask of voxels with intensity at or above `lower`
///
/// Used when no mask is supplied: `label` inside, 0 outside.
pub fn threshold_mask(image: &ScalarImage, lower: f64, label: u8) -> MaskImage {
    let labels = image
        .data
        .iter()
        .map(|&v| if v >= lower { label } else { 0 })
        .collect();
    MaskImage { geometry: image.geometry.clone(), labels }
}

/// Sphere of `label` voxels around `center` (voxel coordinates)
pub fn sphere_mask(geometry: &ImageGeometry, center: [f64; 3], radius: f64, label: u8) -> MaskImage {
    let [nx, ny, nz] = geometry.dims;
    let mut labels = vec![0u8; geometry.n_total()];
    let r2 = radius * radius;

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let dx = i as f64 - center[0];
                let dy = j as f64 - center[1];
                let dz = k as f64 - center[2];
                if dx * dx + dy * dy + dz * dz <= r2 {
                    labels[idx3d(i, j, k, nx, ny)] = label;
                }
            }
        }
    }

    MaskImage { geometry: geometry.clone(), labels }
}
