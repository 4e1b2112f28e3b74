use crate::error::ExtractError;
use crate::geometry::bounds::BoxCorners;

/// A dense 3D image, x fastest (MRC storage order), values as f32
/// whatever the on-disk mode was.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: Vec<f32>,
    pub shape: [usize; 3],
}

impl Volume {
    pub fn zeros(shape: [usize; 3]) -> Volume {
        Volume {
            data: vec![0.0; shape[0] * shape[1] * shape[2]],
            shape,
        }
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[(z * self.shape[1] + y) * self.shape[0] + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) {
        self.data[(z * self.shape[1] + y) * self.shape[0] + x] = value;
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64
    }

    pub fn std(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let var = self
            .data
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.data.len() as f64;
        var.sqrt()
    }

    /// Extracts the sub-volume delimited by `corners`. With `expand`,
    /// out-of-bounds voxels are zero-filled; without it, a box that is
    /// not fully inside is a contract violation (outside items are
    /// filtered out before extraction).
    pub fn crop(&self, corners: &BoxCorners, expand: bool) -> Result<Volume, ExtractError> {
        if !expand && !corners.inside(self.shape) {
            return Err(ExtractError::BoxOutside {
                left: corners.left,
                right: corners.right,
                shape: self.shape,
            });
        }

        let size = corners.size();
        let out_shape = [size[0] as usize, size[1] as usize, size[2] as usize];
        let mut out = Volume::zeros(out_shape);

        for oz in 0..out_shape[2] {
            let sz = corners.left[2] + oz as i64;
            if sz < 0 || sz >= self.shape[2] as i64 {
                continue;
            }
            for oy in 0..out_shape[1] {
                let sy = corners.left[1] + oy as i64;
                if sy < 0 || sy >= self.shape[1] as i64 {
                    continue;
                }
                for ox in 0..out_shape[0] {
                    let sx = corners.left[0] + ox as i64;
                    if sx < 0 || sx >= self.shape[0] as i64 {
                        continue;
                    }
                    let v = self.at(sx as usize, sy as usize, sz as usize);
                    out.set(ox, oy, oz, v);
                }
            }
        }
        Ok(out)
    }

    /// Rescales so the crop's standard deviation becomes `std`.
    pub fn rescale_std(&mut self, std: f64) {
        let current = self.std();
        if current == 0.0 {
            return;
        }
        let factor = (std / current) as f32;
        for v in self.data.iter_mut() {
            *v *= factor;
        }
    }

    /// Shifts so the crop's mean becomes `mean`.
    pub fn shift_mean(&mut self, mean: f64) {
        let shift = (mean - self.mean()) as f32;
        for v in self.data.iter_mut() {
            *v += shift;
        }
    }

    pub fn invert_contrast(&mut self) {
        for v in self.data.iter_mut() {
            *v = -*v;
        }
    }

    /// Zeroes every voxel whose value differs from `label`; used in
    /// segment mode to isolate the item's own segment before any
    /// further processing.
    pub fn keep_label_only(&mut self, label: f32) {
        for v in self.data.iter_mut() {
            if *v != label {
                *v = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod volume_tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(shape: [usize; 3]) -> Volume {
        Volume {
            data: (0..shape[0] * shape[1] * shape[2]).map(|i| i as f32).collect(),
            shape,
        }
    }

    #[test]
    fn test_crop_interior() {
        let vol = ramp([4, 4, 4]);
        let corners = BoxCorners {
            left: [1, 1, 1],
            right: [3, 3, 3],
        };
        let crop = vol.crop(&corners, false).unwrap();
        assert_eq!(crop.shape, [2, 2, 2]);
        assert_eq!(crop.at(0, 0, 0), vol.at(1, 1, 1));
        assert_eq!(crop.at(1, 1, 1), vol.at(2, 2, 2));
    }

    #[test]
    fn test_crop_outside_without_expand_is_error() {
        let vol = ramp([4, 4, 4]);
        let corners = BoxCorners {
            left: [-1, 0, 0],
            right: [1, 2, 2],
        };
        let err = vol.crop(&corners, false).unwrap_err();
        assert!(matches!(err, ExtractError::BoxOutside { .. }));
    }

    #[test]
    fn test_crop_expand_zero_pads() {
        let vol = Volume {
            data: vec![5.0; 8],
            shape: [2, 2, 2],
        };
        let corners = BoxCorners {
            left: [-1, -1, -1],
            right: [2, 2, 2],
        };
        let crop = vol.crop(&corners, true).unwrap();
        assert_eq!(crop.shape, [3, 3, 3]);
        // padded border is zero, overlap keeps values
        assert_eq!(crop.at(0, 0, 0), 0.0);
        assert_eq!(crop.at(1, 1, 1), 5.0);
        assert_eq!(crop.at(2, 2, 2), 5.0);
    }

    #[test]
    fn test_rescale_and_shift() {
        let mut vol = Volume {
            data: vec![1.0, 2.0, 3.0, 4.0],
            shape: [4, 1, 1],
        };
        vol.rescale_std(1.0);
        assert_relative_eq!(vol.std(), 1.0, epsilon = 1e-6);
        vol.shift_mean(0.0);
        assert_relative_eq!(vol.mean(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_keep_label_only() {
        let mut vol = Volume {
            data: vec![1.0, 2.0, 3.0, 2.0],
            shape: [4, 1, 1],
        };
        vol.keep_label_only(2.0);
        assert_eq!(vol.data, vec![0.0, 2.0, 0.0, 2.0]);
    }
}
