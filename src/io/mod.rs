pub mod input;
pub mod mrc;
pub mod output;
pub mod scene;
pub mod star;

use anyhow::{bail, Context};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::ExtractError;
use crate::geometry::bounds::BoxCorners;
use crate::geometry::frames::FrameRelation;

/// Container format version, bumped on layout changes.
pub const SET_FORMAT_VERSION: u32 = 1;

/// The coordinate frames a unit can relate. `Original` is the raw
/// acquisition frame; `Region` is the derived frame the annotations were
/// produced in, related per unit by an offset vector and a bin factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Original,
    Region,
}

/// One tomographic volume and its per-volume bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitRecord {
    pub unit_id: String,

    pub tomo_path: Option<String>,
    pub ctf_path: Option<String>,
    pub region_path: Option<String>,

    /// Pixel spacing in nm, used when a source representation carries no
    /// header of its own (scene objects).
    pub pixel_size_nm: Option<f64>,

    /// Binning of the frame the item coordinates live in, relative to the
    /// raw acquisition.
    pub coord_bin: f64,
    pub region_bin: Option<f64>,
    pub region_offset: Option<[f64; 3]>,

    /// Cached image extents; when absent the MRC header is consulted.
    pub shape: Option<[usize; 3]>,
    pub region_shape: Option<[usize; 3]>,
}

impl UnitRecord {
    pub fn new(unit_id: &str) -> Self {
        UnitRecord {
            unit_id: unit_id.to_string(),
            tomo_path: None,
            ctf_path: None,
            region_path: None,
            pixel_size_nm: None,
            coord_bin: 1.0,
            region_bin: None,
            region_offset: None,
            shape: None,
            region_shape: None,
        }
    }

    /// The affine relation between this unit's region frame and the
    /// original frame. The bin factor is 1 unless a region binning has
    /// been recorded (exact sub-region selection vs. rescaling).
    pub fn region_relation(&self) -> Result<FrameRelation, ExtractError> {
        let offset = self
            .region_offset
            .ok_or_else(|| ExtractError::MissingOffset(self.unit_id.clone()))?;
        let bin_factor = match self.region_bin {
            Some(region_bin) => self.coord_bin / region_bin,
            None => 1.0,
        };
        Ok(FrameRelation {
            offset: Vector3::from(offset),
            bin_factor,
        })
    }
}

/// One candidate particle. Coordinates are kept per frame; stages of the
/// pipeline only ever fill the `Option` fields they own, never overwrite
/// upstream ones (append-only column discipline from the table original).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemRecord {
    pub unit_id: String,
    pub particle_id: i64,
    pub keep: bool,

    pub class_name: Option<String>,
    pub class_number: Option<i32>,

    /// Nominal coordinate in the region frame.
    pub coord_reg: [f64; 3],
    pub coord_orig: Option<[f64; 3]>,

    // orientation angles (degrees), nominal and prior variants
    pub rot: Option<f64>,
    pub tilt: Option<f64>,
    pub psi: Option<f64>,
    pub tilt_prior: Option<f64>,
    pub psi_prior: Option<f64>,

    // derived by correspondence matching
    pub source_index: Option<usize>,
    pub distance: Option<f64>,

    // derived normal direction (degrees)
    pub normal_theta: Option<f64>,
    pub normal_phi: Option<f64>,

    // derived crop centers, one per frame
    pub center_reg: Option<[f64; 3]>,
    pub center_orig: Option<[f64; 3]>,

    // derived crop boxes and inside flags, one per frame
    pub tomo_box: Option<BoxCorners>,
    pub tomo_inside: Option<bool>,
    pub region_box: Option<BoxCorners>,
    pub region_inside: Option<bool>,

    // resulting crop files
    pub crop_path: Option<String>,
    pub region_crop_path: Option<String>,
}

impl ItemRecord {
    pub fn new(unit_id: &str, particle_id: i64, coord_reg: [f64; 3]) -> Self {
        ItemRecord {
            unit_id: unit_id.to_string(),
            particle_id,
            keep: true,
            class_name: None,
            class_number: None,
            coord_reg,
            coord_orig: None,
            rot: None,
            tilt: None,
            psi: None,
            tilt_prior: None,
            psi_prior: None,
            source_index: None,
            distance: None,
            normal_theta: None,
            normal_phi: None,
            center_reg: None,
            center_orig: None,
            tomo_box: None,
            tomo_inside: None,
            region_box: None,
            region_inside: None,
            crop_path: None,
            region_crop_path: None,
        }
    }

    /// Crop center in the given frame, when the projection / conversion
    /// stages have produced it.
    pub fn center(&self, frame: Frame) -> Option<Vector3<f64>> {
        match frame {
            Frame::Original => self.center_orig.map(Vector3::from),
            Frame::Region => self.center_reg.map(Vector3::from),
        }
    }

    pub fn corners(&self, frame: Frame) -> Option<&BoxCorners> {
        match frame {
            Frame::Original => self.tomo_box.as_ref(),
            Frame::Region => self.region_box.as_ref(),
        }
    }

    pub fn inside(&self, frame: Frame) -> Option<bool> {
        match frame {
            Frame::Original => self.tomo_inside,
            Frame::Region => self.region_inside,
        }
    }
}

/// A particle set: the unit table plus the item table, persisted together
/// as one versioned JSON container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleSet {
    pub name: String,
    pub version: u32,
    pub units: Vec<UnitRecord>,
    pub items: Vec<ItemRecord>,
}

impl ParticleSet {
    pub fn new(name: &str) -> Self {
        ParticleSet {
            name: name.to_string(),
            version: SET_FORMAT_VERSION,
            units: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let file = File::open(&path)
            .with_context(|| format!("failed to open particle set {:?}", path.as_ref()))?;
        let set: ParticleSet = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse particle set {:?}", path.as_ref()))?;
        if set.version > SET_FORMAT_VERSION {
            bail!(
                "particle set {:?} has format version {}, newest supported is {}",
                path.as_ref(),
                set.version,
                SET_FORMAT_VERSION
            );
        }
        Ok(set)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("could not create output directory {:?}", parent))?;
            }
        }
        let file = File::create(&path)
            .with_context(|| format!("failed to create particle set file {:?}", path.as_ref()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("failed to serialize particle set {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Map from unit id to its position in the unit table.
    pub fn unit_index(&self) -> HashMap<&str, usize> {
        self.units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.unit_id.as_str(), i))
            .collect()
    }

    /// Unit lookup by id; absence is a hard error, an item must never be
    /// processed against the wrong unit's bookkeeping.
    pub fn unit(&self, unit_id: &str) -> Result<&UnitRecord, ExtractError> {
        self.units
            .iter()
            .find(|u| u.unit_id == unit_id)
            .ok_or_else(|| ExtractError::UnitNotFound(unit_id.to_string()))
    }

    /// Drops items whose keep flag is false.
    pub fn retain_kept(&mut self) {
        self.items.retain(|p| p.keep);
    }

    /// Reduced copy containing only items of the given class numbers.
    /// Units are carried over unchanged.
    pub fn select_classes(&self, class_numbers: &[i32]) -> ParticleSet {
        let items = self
            .items
            .iter()
            .filter(|p| p.class_number.map_or(false, |c| class_numbers.contains(&c)))
            .cloned()
            .collect();
        ParticleSet {
            name: self.name.clone(),
            version: self.version,
            units: self.units.clone(),
            items,
        }
    }

    /// Reduced copy restricted to the given unit ids.
    pub fn select_units(&self, unit_ids: &[String]) -> ParticleSet {
        ParticleSet {
            name: self.name.clone(),
            version: self.version,
            units: self
                .units
                .iter()
                .filter(|u| unit_ids.contains(&u.unit_id))
                .cloned()
                .collect(),
            items: self
                .items
                .iter()
                .filter(|p| unit_ids.contains(&p.unit_id))
                .cloned()
                .collect(),
        }
    }

    /// Item indices grouped per unit, in table order.
    pub fn items_by_unit(&self) -> Vec<(String, Vec<usize>)> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, item) in self.items.iter().enumerate() {
            if !groups.contains_key(&item.unit_id) {
                order.push(item.unit_id.clone());
            }
            groups.entry(item.unit_id.clone()).or_default().push(i);
        }
        order
            .into_iter()
            .map(|id| {
                let idx = groups.remove(&id).unwrap_or_default();
                (id, idx)
            })
            .collect()
    }

    /// Clears every region-frame derived field, used when a region pass is
    /// re-run against a previously augmented container.
    pub fn remove_region_cols(&mut self) {
        for unit in &mut self.units {
            unit.region_path = None;
            unit.region_offset = None;
            unit.region_shape = None;
            unit.region_bin = None;
        }
        for item in &mut self.items {
            item.center_reg = None;
            item.region_box = None;
            item.region_inside = None;
            item.region_crop_path = None;
        }
    }
}

#[cfg(test)]
mod container_tests {
    use super::*;
    use crate::utils::test_utils::{new_test_item, new_test_unit};

    #[test]
    fn test_unit_lookup_missing_is_error() {
        let set = ParticleSet::new("test");
        let err = set.unit("T9").unwrap_err();
        assert!(matches!(err, ExtractError::UnitNotFound(id) if id == "T9"));
    }

    #[test]
    fn test_retain_kept() {
        let mut set = ParticleSet::new("test");
        set.units.push(new_test_unit("T1", [0.0, 0.0, 0.0]));
        let mut dropped = new_test_item("T1", 1, [1.0, 2.0, 3.0]);
        dropped.keep = false;
        set.items.push(dropped);
        set.items.push(new_test_item("T1", 2, [4.0, 5.0, 6.0]));
        set.retain_kept();
        assert_eq!(set.items.len(), 1);
        assert_eq!(set.items[0].particle_id, 2);
    }

    #[test]
    fn test_select_classes_is_reduced_copy() {
        let mut set = ParticleSet::new("test");
        set.units.push(new_test_unit("T1", [0.0, 0.0, 0.0]));
        for (id, class) in [(1, 1), (2, 2), (3, 1)] {
            let mut item = new_test_item("T1", id, [0.0, 0.0, 0.0]);
            item.class_number = Some(class);
            set.items.push(item);
        }
        let reduced = set.select_classes(&[1]);
        assert_eq!(reduced.items.len(), 2);
        assert_eq!(set.items.len(), 3);
        assert_eq!(reduced.units.len(), 1);
    }

    #[test]
    fn test_roundtrip_json() {
        let dir = std::env::temp_dir().join("tomocrop_container_test");
        let path = dir.join("set.json");
        let mut set = ParticleSet::new("roundtrip");
        set.units.push(new_test_unit("T1", [10.0, 10.0, 10.0]));
        set.items.push(new_test_item("T1", 7, [1.5, 2.5, 3.5]));
        set.write(&path).unwrap();
        let back = ParticleSet::read(&path).unwrap();
        assert_eq!(back.name, "roundtrip");
        assert_eq!(back.units, set.units);
        assert_eq!(back.items, set.items);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_items_by_unit_groups_in_order() {
        let mut set = ParticleSet::new("test");
        for (unit, id) in [("T2", 1), ("T1", 2), ("T2", 3)] {
            set.items.push(new_test_item(unit, id, [0.0, 0.0, 0.0]));
        }
        let grouped = set.items_by_unit();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0], ("T2".to_string(), vec![0, 2]));
        assert_eq!(grouped[1], ("T1".to_string(), vec![1]));
    }
}
