use nalgebra::Vector3;

use crate::error::ExtractError;
use crate::io::ParticleSet;

/// Per-unit affine relation between the original acquisition frame and a
/// derived frame: `derived = bin_factor * original - offset`. A bin factor
/// of 1 describes exact sub-region selection (pure translation).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRelation {
    pub offset: Vector3<f64>,
    pub bin_factor: f64,
}

impl FrameRelation {
    pub fn to_derived(&self, point: Vector3<f64>) -> Vector3<f64> {
        self.bin_factor * point - self.offset
    }

    pub fn to_original(&self, point: Vector3<f64>) -> Vector3<f64> {
        (point + self.offset) / self.bin_factor
    }
}

/// Converts every item's region-frame crop center back to the original
/// acquisition frame, using the owning unit's offset. The relation is
/// looked up per unit on every conversion; there is no global offset.
pub fn convert_back(set: &mut ParticleSet) -> Result<(), ExtractError> {
    let units = &set.units;
    for item in set.items.iter_mut() {
        let unit = units
            .iter()
            .find(|u| u.unit_id == item.unit_id)
            .ok_or_else(|| ExtractError::UnitNotFound(item.unit_id.clone()))?;
        if let Some(center) = item.center_reg {
            let orig = unit.region_relation()?.to_original(Vector3::from(center));
            item.center_orig = Some([orig.x, orig.y, orig.z]);
        }
    }
    Ok(())
}

/// Converts every item's original-frame crop center into the unit's
/// region-image frame (`reg = bin_factor * orig - offset`). Items of units
/// without a recorded region relation are left untouched; callers that
/// require the conversion treat the missing relation as a skipped unit.
pub fn to_region_image(set: &mut ParticleSet) -> Result<(), ExtractError> {
    let unit_ids: Vec<String> = set.units.iter().map(|u| u.unit_id.clone()).collect();

    for item in &mut set.items {
        if !unit_ids.contains(&item.unit_id) {
            return Err(ExtractError::UnitNotFound(item.unit_id.clone()));
        }
    }

    for unit in set.units.iter() {
        if unit.region_offset.is_none() {
            continue;
        }
        let relation = unit.region_relation()?;
        for item in set.items.iter_mut().filter(|p| p.unit_id == unit.unit_id) {
            if let Some(center) = item.center_orig {
                let reg = relation.to_derived(Vector3::from(center));
                item.center_reg = Some([reg.x, reg.y, reg.z]);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod frames_tests {
    use super::*;
    use crate::io::ParticleSet;
    use crate::utils::test_utils::{new_test_item, new_test_unit};
    use approx::assert_relative_eq;

    #[test]
    fn test_relation_roundtrip() {
        let relation = FrameRelation {
            offset: Vector3::new(10.0, -4.0, 2.5),
            bin_factor: 2.0,
        };
        let p = Vector3::new(100.0, 50.0, 25.0);
        let back = relation.to_original(relation.to_derived(p));
        assert_relative_eq!(back.x, p.x, epsilon = 0.5);
        assert_relative_eq!(back.y, p.y, epsilon = 0.5);
        assert_relative_eq!(back.z, p.z, epsilon = 0.5);
    }

    #[test]
    fn test_convert_back_uses_unit_offset() {
        let mut set = ParticleSet::new("test");
        set.units.push(new_test_unit("T1", [10.0, 10.0, 10.0]));
        set.units.push(new_test_unit("T2", [100.0, 0.0, -5.0]));
        let mut a = new_test_item("T1", 1, [1.0, 2.0, 3.0]);
        a.center_reg = Some([1.0, 2.0, 3.0]);
        let mut b = new_test_item("T2", 2, [1.0, 2.0, 3.0]);
        b.center_reg = Some([1.0, 2.0, 3.0]);
        set.items.push(a);
        set.items.push(b);

        convert_back(&mut set).unwrap();
        assert_eq!(set.items[0].center_orig, Some([11.0, 12.0, 13.0]));
        assert_eq!(set.items[1].center_orig, Some([101.0, 2.0, -2.0]));
    }

    #[test]
    fn test_convert_back_missing_unit_is_fatal() {
        let mut set = ParticleSet::new("test");
        set.units.push(new_test_unit("T1", [0.0, 0.0, 0.0]));
        let mut orphan = new_test_item("T9", 1, [0.0, 0.0, 0.0]);
        orphan.center_reg = Some([0.0, 0.0, 0.0]);
        set.items.push(orphan);
        let err = convert_back(&mut set).unwrap_err();
        assert!(matches!(err, ExtractError::UnitNotFound(id) if id == "T9"));
    }

    #[test]
    fn test_to_region_image_applies_bin_factor() {
        let mut set = ParticleSet::new("test");
        let mut unit = new_test_unit("T1", [10.0, 10.0, 10.0]);
        unit.coord_bin = 1.0;
        unit.region_bin = Some(2.0);
        set.units.push(unit);
        let mut item = new_test_item("T1", 1, [0.0, 0.0, 0.0]);
        item.center_orig = Some([40.0, 60.0, 80.0]);
        set.items.push(item);

        to_region_image(&mut set).unwrap();
        assert_eq!(set.items[0].center_reg, Some([10.0, 20.0, 30.0]));
    }
}
