use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::ExtractError;
use crate::io::mrc;
use crate::io::{Frame, ParticleSet};

/// Opposite corners of an axis-aligned crop box; `right` is exclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoxCorners {
    pub left: [i64; 3],
    pub right: [i64; 3],
}

impl BoxCorners {
    /// Box of the given size centered on `center`. Centers are carried as
    /// floats through all frame conversions and rounded only here, when
    /// they become pixel indices.
    pub fn around(center: Vector3<f64>, box_size: i64) -> BoxCorners {
        let half = box_size / 2;
        let mut left = [0i64; 3];
        let mut right = [0i64; 3];
        for axis in 0..3 {
            left[axis] = center[axis].round() as i64 - half;
            right[axis] = left[axis] + box_size;
        }
        BoxCorners { left, right }
    }

    /// True iff the box lies entirely within `[0, shape)` on every axis.
    pub fn inside(&self, shape: [usize; 3]) -> bool {
        (0..3).all(|axis| self.left[axis] >= 0 && self.right[axis] <= shape[axis] as i64)
    }

    pub fn size(&self) -> [i64; 3] {
        [
            self.right[0] - self.left[0],
            self.right[1] - self.left[1],
            self.right[2] - self.left[2],
        ]
    }
}

/// Computes crop boxes and inside flags for every item, in the given
/// frame, grouped per unit. The image shape comes from the unit's cached
/// columns when present, otherwise from the MRC header of that unit's
/// source image. A unit whose shape cannot be determined is reported and
/// skipped; its items keep `None` flags and are excluded downstream.
pub fn find_corners(set: &mut ParticleSet, frame: Frame, box_size: i64) -> Result<(), ExtractError> {
    for (unit_id, indices) in set.items_by_unit() {
        let unit = set.unit(&unit_id)?.clone();
        let shape = match unit_shape(&unit, frame) {
            Ok(shape) => shape,
            Err(err) => {
                eprintln!(
                    "Warning: skipping unit {} in corner search: {}",
                    unit_id, err
                );
                continue;
            }
        };

        for i in indices {
            let item = &mut set.items[i];
            let Some(center) = item.center(frame) else {
                continue;
            };
            let corners = BoxCorners::around(center, box_size);
            let inside = corners.inside(shape);
            match frame {
                Frame::Original => {
                    item.tomo_box = Some(corners);
                    item.tomo_inside = Some(inside);
                }
                Frame::Region => {
                    item.region_box = Some(corners);
                    item.region_inside = Some(inside);
                }
            }
        }
    }
    Ok(())
}

fn unit_shape(unit: &crate::io::UnitRecord, frame: Frame) -> Result<[usize; 3], ExtractError> {
    let cached = match frame {
        Frame::Original => unit.shape,
        Frame::Region => unit.region_shape,
    };
    if let Some(shape) = cached {
        return Ok(shape);
    }
    // fall back to the image header for the original frame only; region
    // shapes always come from the scene container
    let path = match frame {
        Frame::Original => unit.tomo_path.as_deref(),
        Frame::Region => None,
    };
    let path = path.ok_or_else(|| ExtractError::ShapeUnavailable(unit.unit_id.clone()))?;
    let header = mrc::read_header(path)?;
    Ok(header.shape())
}
