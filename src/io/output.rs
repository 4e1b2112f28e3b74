//! Builds the STAR metadata emission from an augmented particle set: the
//! ordered output-label -> source-column mapping, one row per item, once
//! for the full set and once per class-code subset.

use anyhow::Result;

use crate::io::star::{write_table, StarFormat, StarValue};
use crate::io::ParticleSet;

fn labels() -> Vec<(String, StarFormat)> {
    vec![
        ("rlnMicrographName".to_string(), StarFormat::Str),
        ("rlnCtfImage".to_string(), StarFormat::Str),
        ("rlnImageName".to_string(), StarFormat::Str),
        ("rlnCoordinateX".to_string(), StarFormat::Int),
        ("rlnCoordinateY".to_string(), StarFormat::Int),
        ("rlnCoordinateZ".to_string(), StarFormat::Int),
        ("rlnAngleTilt".to_string(), StarFormat::Fixed(8, 3)),
        ("rlnAngleTiltPrior".to_string(), StarFormat::Fixed(8, 3)),
        ("rlnAnglePsi".to_string(), StarFormat::Fixed(8, 3)),
        ("rlnAnglePsiPrior".to_string(), StarFormat::Fixed(8, 3)),
        ("rlnAngleRot".to_string(), StarFormat::Fixed(8, 3)),
    ]
}

fn opt_str(value: &Option<String>) -> StarValue {
    StarValue::Str(value.clone().unwrap_or_default())
}

fn opt_float(value: Option<f64>) -> StarValue {
    StarValue::Float(value.unwrap_or(0.0))
}

/// Emits one row per item that carries a crop path; the nominal tilt/psi
/// output columns repeat the priors, which are the refined normals the
/// downstream tools should start from.
pub fn make_star(set: &ParticleSet, star_path: &std::path::Path, comment: &str) -> Result<usize> {
    let mut rows = Vec::new();
    for item in &set.items {
        if item.crop_path.is_none() && item.region_crop_path.is_none() {
            continue;
        }
        let unit = set.unit(&item.unit_id)?;
        let center = item.center_orig.unwrap_or(item.coord_reg);
        let crop = item.crop_path.as_ref().or(item.region_crop_path.as_ref());
        rows.push(vec![
            opt_str(&unit.tomo_path),
            opt_str(&unit.ctf_path),
            StarValue::Str(crop.cloned().unwrap_or_default()),
            StarValue::Float(center[0]),
            StarValue::Float(center[1]),
            StarValue::Float(center[2]),
            opt_float(item.tilt_prior),
            opt_float(item.tilt_prior),
            opt_float(item.psi_prior),
            opt_float(item.psi_prior),
            opt_float(item.rot),
        ]);
    }

    write_table(star_path, &labels(), &rows, "particles", comment)?;
    Ok(rows.len())
}

/// Re-emits the same table filtered to each class-code subset; a pure
/// filter plus file/comment rename, not a new geometric step.
pub fn split_star(
    set: &ParticleSet,
    class_code: &[(i32, String)],
    star_path: &std::path::Path,
    comment: &str,
) -> Result<()> {
    for (number, subclass) in class_code {
        let subset = set.select_classes(&[*number]);
        let file_name = star_path
            .file_name()
            .map(|n| n.to_string_lossy().replace("_all.star", &format!("_{}.star", subclass)))
            .unwrap_or_else(|| format!("{}.star", subclass));
        let subset_path = star_path.with_file_name(file_name);
        let mut capitalized = subclass.clone();
        if let Some(first) = capitalized.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        let subset_comment = comment.replace("All", &capitalized);
        make_star(&subset, &subset_path, &subset_comment)?;
    }
    Ok(())
}
