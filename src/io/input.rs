//! Tabular import of unit and item tables from CSV/TSV exports, plus the
//! unit-id extraction used to join STAR sidecar tables onto units.

use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use regex::Regex;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::io::{ItemRecord, ParticleSet, UnitRecord};

/// Utility: detect whether the file uses comma or tab as delimiter.
fn detect_delimiter<P: AsRef<Path>>(path: P) -> Result<u8> {
    let file = File::open(&path).with_context(|| {
        format!(
            "failed to open file for delimiter sniffing: {:?}",
            path.as_ref()
        )
    })?;
    let mut reader = BufReader::new(file);
    let mut first_line = String::new();
    reader
        .read_line(&mut first_line)
        .with_context(|| "failed to read first line for delimiter detection")?;

    let tabs = first_line.matches('\t').count();
    let commas = first_line.matches(',').count();
    if tabs > commas {
        Ok(b'\t')
    } else {
        Ok(b',')
    }
}

#[derive(Debug, Deserialize)]
struct UnitRow {
    unit_id: String,
    tomo_path: Option<String>,
    #[serde(default)]
    ctf_path: Option<String>,
    #[serde(default)]
    region_path: Option<String>,
    #[serde(default)]
    pixel_size_nm: Option<f64>,
    #[serde(default = "default_bin")]
    coord_bin: f64,
    #[serde(default)]
    offset_x: Option<f64>,
    #[serde(default)]
    offset_y: Option<f64>,
    #[serde(default)]
    offset_z: Option<f64>,
    #[serde(default)]
    shape_x: Option<usize>,
    #[serde(default)]
    shape_y: Option<usize>,
    #[serde(default)]
    shape_z: Option<usize>,
}

fn default_bin() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct ItemRow {
    unit_id: String,
    particle_id: i64,
    #[serde(default = "default_keep")]
    keep: bool,
    x: f64,
    y: f64,
    z: f64,
    #[serde(default)]
    class_name: Option<String>,
    #[serde(default)]
    class_number: Option<i32>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    rot: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    tilt: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    psi: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    tilt_prior: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    psi_prior: Option<f64>,
}

fn default_keep() -> bool {
    true
}

/// Reads a particle set from a unit table and an item table. Frame
/// coordinate columns must form complete sets: offsets are either fully
/// present or fully absent per unit, and x/y/z are mandatory per item.
pub fn read_tables<P: AsRef<Path>>(
    name: &str,
    units_path: P,
    items_path: P,
) -> Result<ParticleSet> {
    let mut set = ParticleSet::new(name);

    let delim = detect_delimiter(&units_path)?;
    let file = File::open(&units_path)
        .with_context(|| format!("failed to open unit table {:?}", units_path.as_ref()))?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delim)
        .from_reader(file);
    for row in rdr.deserialize() {
        let row: UnitRow = row.with_context(|| "failed to parse unit table row")?;
        let offset = match (row.offset_x, row.offset_y, row.offset_z) {
            (Some(x), Some(y), Some(z)) => Some([x, y, z]),
            (None, None, None) => None,
            _ => {
                return Err(anyhow!(
                    "unit {}: offset columns must be all present or all absent",
                    row.unit_id
                ))
            }
        };
        let shape = match (row.shape_x, row.shape_y, row.shape_z) {
            (Some(x), Some(y), Some(z)) => Some([x, y, z]),
            (None, None, None) => None,
            _ => {
                return Err(anyhow!(
                    "unit {}: shape columns must be all present or all absent",
                    row.unit_id
                ))
            }
        };
        set.units.push(UnitRecord {
            unit_id: row.unit_id,
            tomo_path: row.tomo_path,
            ctf_path: row.ctf_path,
            region_path: row.region_path,
            pixel_size_nm: row.pixel_size_nm,
            coord_bin: row.coord_bin,
            region_bin: None,
            region_offset: offset,
            shape,
            region_shape: None,
        });
    }

    let delim = detect_delimiter(&items_path)?;
    let file = File::open(&items_path)
        .with_context(|| format!("failed to open item table {:?}", items_path.as_ref()))?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delim)
        .from_reader(file);
    for row in rdr.deserialize() {
        let row: ItemRow = row.with_context(|| "failed to parse item table row")?;
        let mut item = ItemRecord::new(&row.unit_id, row.particle_id, [row.x, row.y, row.z]);
        item.keep = row.keep;
        item.class_name = row.class_name;
        item.class_number = row.class_number;
        item.rot = row.rot;
        item.tilt = row.tilt;
        item.psi = row.psi;
        item.tilt_prior = row.tilt_prior;
        item.psi_prior = row.psi_prior;
        set.items.push(item);
    }

    Ok(set)
}

/// Extracts the unit id from a micrograph/segmentation path. With a
/// pattern, the first capture group of the first match wins; without one,
/// the file stem is used.
pub fn unit_id_from_path(path: &str, pattern: Option<&Regex>) -> Option<String> {
    if let Some(re) = pattern {
        let caps = re.captures(path)?;
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
}
