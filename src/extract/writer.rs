use anyhow::{Context, Result};
use std::path::Path;

use crate::config::SourceMode;
use crate::extract::transforms::{apply_transforms, ImageTransform, OutputDtype};
use crate::extract::volume::Volume;
use crate::io::{mrc, scene::Scene, Frame, ParticleSet, UnitRecord};
use crate::pipeline::paths::PathRewriter;

/// Knobs of one crop-writing pass.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Which frame's box delimits the crop.
    pub frame: Frame,
    /// Which frame's inside flag gates the items; items not flagged
    /// inside were filtered by the validation stage and are always
    /// skipped here.
    pub select_frame: Frame,
    pub mode: SourceMode,
    /// Zero-pads crop boxes that overflow the source array. Padding
    /// never re-admits items the selection gate dropped.
    pub expand: bool,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub invert_contrast: bool,
    pub transforms: Vec<ImageTransform>,
    pub name_prefix: String,
    pub name_suffix: String,
    /// Dry-run switch; paths are still recorded.
    pub write: bool,
}

impl WriteOptions {
    pub fn particles(expand: bool) -> WriteOptions {
        WriteOptions {
            frame: Frame::Original,
            select_frame: Frame::Original,
            mode: SourceMode::Image,
            expand,
            mean: None,
            std: None,
            invert_contrast: false,
            transforms: Vec::new(),
            name_prefix: "particle_".to_string(),
            name_suffix: String::new(),
            write: true,
        }
    }
}

fn load_source(unit: &UnitRecord, mode: SourceMode) -> Result<(Volume, f64)> {
    match mode {
        SourceMode::Image => {
            let path = unit
                .tomo_path
                .as_deref()
                .with_context(|| format!("unit {} has no tomo path", unit.unit_id))?;
            let (volume, header) = mrc::read(path)?;
            Ok((volume, header.pixel_size()))
        }
        SourceMode::SceneBoundary | SourceMode::SceneSegment => {
            let path = unit
                .region_path
                .as_deref()
                .with_context(|| format!("unit {} has no region path", unit.unit_id))?;
            let scene = Scene::read(path)?;
            let object = match mode {
                SourceMode::SceneBoundary => &scene.boundary,
                _ => &scene.labels,
            };
            Ok((object.volume(), unit.pixel_size_nm.unwrap_or(0.0)))
        }
    }
}

/// Extracts and writes the crop of every selected item, one unit at a
/// time; the source volume stays open only while its unit is processed.
/// A unit whose source cannot be read is reported and skipped, the run
/// continues with the remaining units.
pub fn write_particles(
    set: &mut ParticleSet,
    out_dir: &Path,
    options: &WriteOptions,
    rewriter: &PathRewriter,
) -> Result<()> {
    for (unit_id, indices) in set.items_by_unit() {
        let unit = set.unit(&unit_id)?.clone();
        let (source, pixel_size) = match load_source(&unit, options.mode) {
            Ok(loaded) => loaded,
            Err(err) => {
                eprintln!(
                    "Warning: skipping unit {} in crop extraction: {:#}",
                    unit_id, err
                );
                continue;
            }
        };

        let unit_dir = out_dir.join(&unit_id);
        for i in indices {
            let item = &mut set.items[i];
            if item.inside(options.select_frame) != Some(true) {
                continue;
            }
            let Some(corners) = item.corners(options.frame) else {
                continue;
            };

            let mut crop = source.crop(corners, options.expand)?;
            if let Some(std) = options.std {
                crop.rescale_std(std);
            }
            if let Some(mean) = options.mean {
                crop.shift_mean(mean);
            }
            if options.invert_contrast {
                crop.invert_contrast();
            }
            if options.mode == SourceMode::SceneSegment {
                crop.keep_label_only(item.particle_id as f32);
            }
            let (crop, dtype) = apply_transforms(crop, &options.transforms);

            let file_name = format!(
                "{}{}{}.mrc",
                options.name_prefix, item.particle_id, options.name_suffix
            );
            let crop_path = unit_dir.join(file_name);
            if options.write {
                if !unit_dir.exists() {
                    std::fs::create_dir_all(&unit_dir).with_context(|| {
                        format!("could not create crop directory {:?}", unit_dir)
                    })?;
                }
                mrc::write(
                    &crop_path,
                    &crop,
                    pixel_size,
                    dtype.unwrap_or(OutputDtype::F32),
                )?;
            }

            let recorded = rewriter.convert(&crop_path.to_string_lossy());
            match options.frame {
                Frame::Original => item.crop_path = Some(recorded),
                Frame::Region => item.region_crop_path = Some(recorded),
            }
        }
    }
    Ok(())
}
