//! Shared fixtures for the test modules: minimal unit/item records and
//! synthetic volumes written to disk.

use std::path::Path;

use crate::extract::transforms::OutputDtype;
use crate::extract::volume::Volume;
use crate::io::{mrc, ItemRecord, UnitRecord};

/// A unit with coordinate bin 1 and the given region offset.
pub fn new_test_unit(unit_id: &str, offset: [f64; 3]) -> UnitRecord {
    let mut unit = UnitRecord::new(unit_id);
    unit.coord_bin = 1.0;
    unit.region_offset = Some(offset);
    unit
}

/// An item with only the mandatory columns filled.
pub fn new_test_item(unit_id: &str, particle_id: i64, coord_reg: [f64; 3]) -> ItemRecord {
    ItemRecord::new(unit_id, particle_id, coord_reg)
}

/// Builds a volume from a per-voxel function and writes it as f32 MRC
/// with 1 Angstrom spacing.
pub fn write_test_volume<P, F>(path: P, shape: [usize; 3], f: F)
where
    P: AsRef<Path>,
    F: Fn(usize, usize, usize) -> f32,
{
    let mut volume = Volume::zeros(shape);
    for z in 0..shape[2] {
        for y in 0..shape[1] {
            for x in 0..shape[0] {
                volume.set(x, y, z, f(x, y, z));
            }
        }
    }
    mrc::write(path, &volume, 1.0, OutputDtype::F32).unwrap();
}
