use serde::{Deserialize, Serialize};

use crate::extract::volume::Volume;

/// On-disk value type of an emitted crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputDtype {
    I8,
    I16,
    F32,
}

/// One step of the post-processing pipeline applied to a crop after the
/// mean/std/contrast stages. Steps run in the caller-specified order.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageTransform {
    /// Nearest-neighbor resampling by a zoom factor.
    Resample { zoom: f64 },
    /// Label-set compaction, see [`normalize_bound_ids`].
    RemapLabels {
        min_id_old: i32,
        id_new: i32,
        id_conversion: Vec<(i32, i32)>,
    },
    /// Grey dilation with a ball footprint of the given radius.
    Dilate { radius: usize },
    /// Cast the crop to the given on-disk type at write time.
    Cast { dtype: OutputDtype },
}

/// Applies the transforms in order. `Cast` does not touch the voxel data;
/// it selects the dtype the writer will emit, the last one wins.
pub fn apply_transforms(
    mut volume: Volume,
    transforms: &[ImageTransform],
) -> (Volume, Option<OutputDtype>) {
    let mut dtype = None;
    for transform in transforms {
        match transform {
            ImageTransform::Resample { zoom } => {
                volume = resample(&volume, *zoom);
            }
            ImageTransform::RemapLabels {
                min_id_old,
                id_new,
                id_conversion,
            } => {
                volume = normalize_bound_ids(&volume, *min_id_old, *id_new, id_conversion);
            }
            ImageTransform::Dilate { radius } => {
                volume = grey_dilate(&volume, *radius);
            }
            ImageTransform::Cast { dtype: d } => {
                dtype = Some(*d);
            }
        }
    }
    (volume, dtype)
}

/// Builds the default transform list for region extraction: resample,
/// remap labels, dilate, cast, each included only when requested, in that
/// fixed order.
pub fn prepare_transforms(
    zoom_factor: f64,
    remap: Option<(i32, i32, Vec<(i32, i32)>)>,
    dilate: Option<usize>,
    dtype: Option<OutputDtype>,
) -> Vec<ImageTransform> {
    let mut transforms = Vec::new();
    if zoom_factor != 1.0 {
        transforms.push(ImageTransform::Resample { zoom: zoom_factor });
    }
    if let Some((min_id_old, id_new, id_conversion)) = remap {
        transforms.push(ImageTransform::RemapLabels {
            min_id_old,
            id_new,
            id_conversion,
        });
    }
    if let Some(radius) = dilate {
        if radius > 0 {
            transforms.push(ImageTransform::Dilate { radius });
        }
    }
    if let Some(dtype) = dtype {
        transforms.push(ImageTransform::Cast { dtype });
    }
    transforms
}

/// Sets segment label values to normalized ids: every value >=
/// `min_id_old` becomes `id_new`, values listed in `id_conversion` map to
/// their replacement, everything else becomes 0.
///
/// E.g. with vesicle labels starting at 10, plasma membrane 2 and
/// cytosol 3, `min_id_old=10, id_new=9, id_conversion=[(2,4),(3,1)]`
/// relabels vesicles to 9, membrane to 4 and cytosol to 1.
pub fn normalize_bound_ids(
    volume: &Volume,
    min_id_old: i32,
    id_new: i32,
    id_conversion: &[(i32, i32)],
) -> Volume {
    let data = volume
        .data
        .iter()
        .map(|&v| {
            let label = v.round() as i32;
            if label >= min_id_old {
                id_new as f32
            } else if let Some((_, new)) = id_conversion.iter().find(|(old, _)| *old == label) {
                *new as f32
            } else {
                0.0
            }
        })
        .collect();
    Volume {
        data,
        shape: volume.shape,
    }
}

/// Order-0 (nearest neighbor) resampling, the zoom used to bring binned
/// region images up to the particle sampling.
fn resample(volume: &Volume, zoom: f64) -> Volume {
    let out_shape = [
        ((volume.shape[0] as f64) * zoom).round().max(1.0) as usize,
        ((volume.shape[1] as f64) * zoom).round().max(1.0) as usize,
        ((volume.shape[2] as f64) * zoom).round().max(1.0) as usize,
    ];
    let mut out = Volume::zeros(out_shape);
    for z in 0..out_shape[2] {
        let sz = ((z as f64 / zoom) as usize).min(volume.shape[2] - 1);
        for y in 0..out_shape[1] {
            let sy = ((y as f64 / zoom) as usize).min(volume.shape[1] - 1);
            for x in 0..out_shape[0] {
                let sx = ((x as f64 / zoom) as usize).min(volume.shape[0] - 1);
                out.set(x, y, z, volume.at(sx, sy, sz));
            }
        }
    }
    out
}

/// Grey dilation with a ball footprint: each voxel takes the maximum over
/// the ball neighborhood, out-of-image neighbors ignored.
fn grey_dilate(volume: &Volume, radius: usize) -> Volume {
    let r = radius as i64;
    let mut ball = Vec::new();
    for dz in -r..=r {
        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy + dz * dz <= r * r {
                    ball.push([dx, dy, dz]);
                }
            }
        }
    }

    let mut out = Volume::zeros(volume.shape);
    let [nx, ny, nz] = volume.shape;
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let mut max = f32::NEG_INFINITY;
                for d in &ball {
                    let sx = x as i64 + d[0];
                    let sy = y as i64 + d[1];
                    let sz = z as i64 + d[2];
                    if sx < 0 || sy < 0 || sz < 0 {
                        continue;
                    }
                    let (sx, sy, sz) = (sx as usize, sy as usize, sz as usize);
                    if sx >= nx || sy >= ny || sz >= nz {
                        continue;
                    }
                    max = max.max(volume.at(sx, sy, sz));
                }
                out.set(x, y, z, max);
            }
        }
    }
    out
}

#[cfg(test)]
mod transforms_tests {
    use super::*;

    #[test]
    fn test_normalize_bound_ids_reference_case() {
        let volume = Volume {
            data: vec![1.0, 2.0, 3.0, 10.0, 11.0, 12.0],
            shape: [6, 1, 1],
        };
        let out = normalize_bound_ids(&volume, 10, 9, &[(2, 4), (3, 1)]);
        assert_eq!(out.data, vec![0.0, 4.0, 1.0, 9.0, 9.0, 9.0]);
    }

    #[test]
    fn test_resample_doubles_shape() {
        let volume = Volume {
            data: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            shape: [2, 2, 2],
        };
        let out = resample(&volume, 2.0);
        assert_eq!(out.shape, [4, 4, 4]);
        // nearest neighbor: each source voxel becomes a 2x2x2 block
        assert_eq!(out.at(0, 0, 0), volume.at(0, 0, 0));
        assert_eq!(out.at(1, 1, 1), volume.at(0, 0, 0));
        assert_eq!(out.at(3, 3, 3), volume.at(1, 1, 1));
    }

    #[test]
    fn test_dilate_spreads_maximum() {
        let mut volume = Volume::zeros([5, 5, 5]);
        volume.set(2, 2, 2, 7.0);
        let out = grey_dilate(&volume, 1);
        assert_eq!(out.at(2, 2, 2), 7.0);
        assert_eq!(out.at(1, 2, 2), 7.0);
        assert_eq!(out.at(2, 3, 2), 7.0);
        // corner of the cube is outside the ball
        assert_eq!(out.at(1, 1, 1), 0.0);
        assert_eq!(out.at(0, 2, 2), 0.0);
    }

    #[test]
    fn test_transforms_apply_in_order() {
        let volume = Volume {
            data: vec![10.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            shape: [2, 2, 2],
        };
        let transforms = vec![
            ImageTransform::Resample { zoom: 2.0 },
            ImageTransform::RemapLabels {
                min_id_old: 10,
                id_new: 9,
                id_conversion: vec![(2, 4)],
            },
            ImageTransform::Cast {
                dtype: OutputDtype::I16,
            },
        ];
        let (out, dtype) = apply_transforms(volume, &transforms);
        assert_eq!(out.shape, [4, 4, 4]);
        assert_eq!(out.at(0, 0, 0), 9.0);
        assert_eq!(out.at(2, 0, 0), 4.0);
        assert_eq!(dtype, Some(OutputDtype::I16));
    }

    #[test]
    fn test_prepare_transforms_order_and_gating() {
        let transforms = prepare_transforms(2.0, Some((10, 9, vec![])), Some(1), None);
        assert!(matches!(transforms[0], ImageTransform::Resample { .. }));
        assert!(matches!(transforms[1], ImageTransform::RemapLabels { .. }));
        assert!(matches!(transforms[2], ImageTransform::Dilate { .. }));
        assert_eq!(transforms.len(), 3);

        let identity = prepare_transforms(1.0, None, None, None);
        assert!(identity.is_empty());
    }
}
