//! Task orchestration: the particle extraction pass and the region
//! extraction pass over a particle set, each a fixed sequence of the
//! geometry and io stages.

pub mod paths;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::path::Path;

use crate::config::{ExtractConfig, SourceMode};
use crate::extract::transforms::prepare_transforms;
use crate::extract::writer::{write_particles, WriteOptions};
use crate::geometry::bounds::find_corners;
use crate::geometry::frames::{convert_back, to_region_image};
use crate::geometry::matching::find_min_distances;
use crate::geometry::normals::{project_along_normals, reverse_item_angles, set_normal_angles};
use crate::io::input::unit_id_from_path;
use crate::io::output::{make_star, split_star};
use crate::io::scene::Scene;
use crate::io::star::read_table;
use crate::io::{Frame, ParticleSet};
use crate::pipeline::paths::{OutputPaths, PathRewriter};

/// Fills unit tomogram and CTF paths from a micrograph STAR sidecar,
/// joining rows onto units by the id extracted from the micrograph path.
/// Rows whose id matches no unit are ignored.
pub fn add_unit_paths(
    set: &mut ParticleSet,
    star_path: &Path,
    pattern: Option<&Regex>,
    rewriter: &PathRewriter,
) -> Result<()> {
    let rows = read_table(star_path, "micrographs")?;
    for row in rows {
        let Some(micrograph) = row.get("rlnMicrographName") else {
            continue;
        };
        let Some(unit_id) = unit_id_from_path(micrograph, pattern) else {
            continue;
        };
        let Some(unit) = set.units.iter_mut().find(|u| u.unit_id == unit_id) else {
            continue;
        };
        unit.tomo_path = Some(rewriter.convert(micrograph));
        if let Some(ctf) = row.get("rlnCtfImage") {
            unit.ctf_path = Some(rewriter.convert(ctf));
        }
    }
    Ok(())
}

/// Copies orientation and class columns onto each query item from its
/// nearest same-unit source item, recording the match index and distance.
pub fn adopt_source_columns(set: &mut ParticleSet, source: &ParticleSet) -> Result<()> {
    let matches = find_min_distances(&set.items, &source.items)?;
    for (item, m) in set.items.iter_mut().zip(&matches) {
        let matched = &source.items[m.source_index];
        item.source_index = Some(m.source_index);
        item.distance = Some(m.distance);
        item.rot = matched.rot;
        item.tilt = matched.tilt;
        item.psi = matched.psi;
        item.tilt_prior = matched.tilt_prior;
        item.psi_prior = matched.psi_prior;
        item.class_name = matched.class_name.clone();
        item.class_number = matched.class_number;
    }
    Ok(())
}

fn class_code_pairs(config: &ExtractConfig) -> Vec<(i32, String)> {
    config
        .class_code
        .iter()
        .map(|c| (c.number, c.name.clone()))
        .collect()
}

/// One particle extraction pass: orientation preparation, projection to
/// the crop centers, conversion to the acquisition frame, bounds checks,
/// crop writing and the metadata emission.
pub struct ParticleTask {
    pub name: String,
    pub mode: SourceMode,
    pub config: ExtractConfig,
}

impl ParticleTask {
    pub fn new(name: &str, mode: SourceMode, config: ExtractConfig) -> ParticleTask {
        ParticleTask {
            name: name.to_string(),
            mode,
            config,
        }
    }

    fn rewriter(&self) -> PathRewriter {
        PathRewriter::new(
            self.config.path_common.as_deref(),
            self.config.path_new_root.as_deref(),
        )
    }

    fn randomize_rot(&self, set: &mut ParticleSet) {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        for item in &mut set.items {
            item.rot = Some(rng.random::<f64>() * 360.0);
        }
    }

    /// Fills normal angles on every item: adopt columns from the source
    /// set when one is given, optionally reverse, pick the tilt/psi pair,
    /// optionally randomize rot.
    pub fn set_normals(&self, set: &mut ParticleSet, source: Option<&ParticleSet>) -> Result<()> {
        if let Some(source) = source {
            adopt_source_columns(set, source)?;
        }
        if self.config.reverse {
            for item in &mut set.items {
                reverse_item_angles(item);
            }
        }
        for item in &mut set.items {
            set_normal_angles(item, self.config.orientation)?;
        }
        if self.config.randomize_rot {
            self.randomize_rot(set);
        }
        Ok(())
    }

    pub fn run(&self, set: &mut ParticleSet, source: Option<&ParticleSet>) -> Result<OutputPaths> {
        set.retain_kept();
        if !self.config.unit_ids.is_empty() {
            *set = set.select_units(&self.config.unit_ids);
        }

        self.set_normals(set, source)?;
        project_along_normals(&mut set.items, self.config.particle_to_center)?;
        convert_back(set)?;
        find_corners(set, Frame::Original, self.config.box_size)?;

        let output = OutputPaths::new(
            &self.name,
            &self.config.root_template,
            &self.config.regions_name,
            self.config.box_size,
        );
        let options = WriteOptions {
            frame: Frame::Original,
            select_frame: Frame::Original,
            mode: self.mode,
            expand: self.config.expand_particle,
            mean: self.config.mean,
            std: self.config.std,
            invert_contrast: self.config.invert_contrast,
            transforms: prepare_transforms(1.0, None, None, self.config.out_dtype),
            name_prefix: self.config.name_prefix.clone(),
            name_suffix: self.config.name_suffix.clone(),
            write: self.config.write_crops,
        };
        let rewriter = self.rewriter();
        write_particles(set, &output.particles_dir(), &options, &rewriter)?;

        set.write(output.set_path_tmp())?;
        let comment = format!("All particles of {}", self.name);
        let written = make_star(set, &output.star_path(), &comment)?;
        println!("{}: {} particles written", self.name, written);
        split_star(set, &class_code_pairs(&self.config), &output.star_path(), &comment)?;
        set.write(output.set_path())?;
        std::fs::remove_file(output.set_path_tmp()).ok();
        Ok(output)
    }
}

/// Records the region geometry discovered from each unit's scene
/// container: placement offset, array shape and the configured binning.
/// Units without a readable container are reported and left without a
/// region relation, which excludes their items downstream.
pub fn discover_regions(set: &mut ParticleSet, region_bin: f64) {
    for unit in &mut set.units {
        let Some(path) = unit.region_path.as_deref() else {
            eprintln!(
                "Warning: unit {} has no region container, skipped",
                unit.unit_id
            );
            continue;
        };
        match Scene::read(path) {
            Ok(scene) => {
                unit.region_offset = Some(scene.boundary.offset);
                unit.region_shape = Some(scene.boundary.shape);
                unit.region_bin = Some(region_bin);
            }
            Err(err) => {
                eprintln!(
                    "Warning: could not read region container of unit {}: {:#}",
                    unit.unit_id, err
                );
            }
        }
    }
}

/// The region extraction pass over an already augmented particle set:
/// crops of the segmentation around the same centers, in the region
/// image frame.
pub struct RegionTask {
    pub name: String,
    pub mode: SourceMode,
    pub config: ExtractConfig,
    /// Explicit transform list; replaces the one derived from the config
    /// knobs, which then go unused.
    pub transforms: Option<Vec<crate::extract::transforms::ImageTransform>>,
}

impl RegionTask {
    pub fn new(name: &str, mode: SourceMode, config: ExtractConfig) -> RegionTask {
        RegionTask {
            name: name.to_string(),
            mode,
            config,
            transforms: None,
        }
    }

    /// Edge length of the region crop, reduced by the binning of the
    /// region images so that the resampled output matches `box_size`.
    /// Floor division, a fractional factor never enlarges the crop.
    fn region_box_size(&self) -> i64 {
        (self.config.box_size as f64 / self.config.region_bin_factor).floor() as i64
    }

    pub fn run(&self, set: &mut ParticleSet, region_paths: &[(String, String)]) -> Result<()> {
        set.remove_region_cols();
        for (unit_id, path) in region_paths {
            let unit = set
                .units
                .iter_mut()
                .find(|u| &u.unit_id == unit_id)
                .with_context(|| format!("region container given for unknown unit {}", unit_id))?;
            unit.region_path = Some(path.clone());
        }

        discover_regions(set, self.config.region_bin);
        to_region_image(set)?;
        find_corners(set, Frame::Region, self.region_box_size())?;

        let transforms = match &self.transforms {
            Some(transforms) => {
                if self.config.remap.is_some()
                    || self.config.dilate.is_some()
                    || self.config.out_dtype.is_some()
                    || self.config.region_bin_factor != 1.0
                {
                    eprintln!(
                        "Warning: {}: explicit transform list given, the \
                         remap/dilate/dtype/bin-factor knobs are ignored",
                        self.name
                    );
                }
                transforms.clone()
            }
            None => {
                let remap = self
                    .config
                    .remap
                    .as_ref()
                    .map(|r| (r.min_id_old, r.id_new, r.id_conversion.clone()));
                prepare_transforms(
                    self.config.region_bin_factor,
                    remap,
                    self.config.dilate,
                    self.config.out_dtype,
                )
            }
        };

        let output = OutputPaths::new(
            &self.name,
            &self.config.root_template,
            &self.config.regions_name,
            self.config.box_size,
        );
        let options = WriteOptions {
            frame: Frame::Region,
            // selection stays on the acquisition-frame verdict so the
            // region crops pair one to one with the particle crops
            select_frame: Frame::Original,
            mode: self.mode,
            expand: self.config.expand_region,
            mean: None,
            std: None,
            invert_contrast: false,
            transforms,
            name_prefix: self.config.region_name_prefix.clone(),
            name_suffix: self.config.name_suffix.clone(),
            write: self.config.write_crops,
        };
        let rewriter = PathRewriter::new(
            self.config.path_common.as_deref(),
            self.config.path_new_root.as_deref(),
        );
        write_particles(set, &output.regions_dir(), &options, &rewriter)?;

        set.write(output.set_path())?;
        let comment = format!("All particles of {}", self.name);
        make_star(set, &output.star_path(), &comment)?;
        split_star(set, &class_code_pairs(&self.config), &output.star_path(), &comment)?;
        Ok(())
    }
}
