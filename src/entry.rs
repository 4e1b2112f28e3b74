use anyhow::{anyhow, Context, Result};
use crossbeam::thread;
use regex::Regex;
use std::path::PathBuf;

use crate::config::{ExtractConfig, SourceMode};
use crate::io::input::read_tables;
use crate::io::ParticleSet;
use crate::pipeline::paths::PathRewriter;
use crate::pipeline::{add_unit_paths, ParticleTask, RegionTask};

/// Everything one extraction case needs: the annotation tables, the
/// optional source tables orientation columns are adopted from, the
/// optional micrograph sidecar, and the run configuration.
#[derive(Debug, Clone)]
pub struct CaseSpec {
    pub name: String,
    pub mode: SourceMode,
    pub units_path: PathBuf,
    pub items_path: PathBuf,
    pub source_tables: Option<(PathBuf, PathBuf)>,
    pub micrograph_star: Option<PathBuf>,
    pub config: ExtractConfig,
}

impl CaseSpec {
    pub fn new(name: &str, units_path: &str, items_path: &str, config: ExtractConfig) -> CaseSpec {
        CaseSpec {
            name: name.to_string(),
            mode: SourceMode::Image,
            units_path: PathBuf::from(units_path),
            items_path: PathBuf::from(items_path),
            source_tables: None,
            micrograph_star: None,
            config,
        }
    }

    fn tomo_id_regex(&self) -> Result<Option<Regex>> {
        match &self.config.tomo_id_pattern {
            Some(pattern) => {
                let re = Regex::new(pattern)
                    .with_context(|| format!("invalid tomo id pattern {:?}", pattern))?;
                Ok(Some(re))
            }
            None => Ok(None),
        }
    }
}

/// Runs one particle extraction case end to end and returns the augmented
/// particle set, which has also been persisted under the case's output
/// root.
pub fn run_extraction_case(spec: &CaseSpec) -> Result<ParticleSet> {
    let mut set = read_tables(&spec.name, &spec.units_path, &spec.items_path)
        .with_context(|| format!("loading tables of case {} failed", spec.name))?;

    let source = match &spec.source_tables {
        Some((units, items)) => Some(
            read_tables(&spec.name, units, items)
                .with_context(|| format!("loading source tables of case {} failed", spec.name))?,
        ),
        None => None,
    };

    if let Some(star) = &spec.micrograph_star {
        let pattern = spec.tomo_id_regex()?;
        let rewriter = PathRewriter::new(
            spec.config.path_common.as_deref(),
            spec.config.path_new_root.as_deref(),
        );
        add_unit_paths(&mut set, star, pattern.as_ref(), &rewriter)
            .with_context(|| format!("joining micrograph sidecar of case {} failed", spec.name))?;
    }

    let task = ParticleTask::new(&spec.name, spec.mode, spec.config.clone());
    task.run(&mut set, source.as_ref())
        .with_context(|| format!("particle extraction of case {} failed", spec.name))?;
    Ok(set)
}

/// Runs the region pass over an already extracted case. The pass starts
/// by clearing every region column, so `region_paths` must attach a scene
/// container to each unit that should take part.
pub fn run_region_extraction(
    spec: &CaseSpec,
    set: &mut ParticleSet,
    mode: SourceMode,
    region_paths: &[(String, String)],
) -> Result<()> {
    let task = RegionTask::new(&spec.name, mode, spec.config.clone());
    task.run(set, region_paths)
        .with_context(|| format!("region extraction of case {} failed", spec.name))
}

/// Runs two extraction cases in parallel, one scoped thread each, and
/// returns both augmented sets.
pub fn run_paired_cases(first: &CaseSpec, second: &CaseSpec) -> Result<(ParticleSet, ParticleSet)> {
    let result = thread::scope(|s| -> Result<(ParticleSet, ParticleSet)> {
        let first_handle = s.spawn(|_| -> Result<ParticleSet> {
            run_extraction_case(first)
                .with_context(|| format!("case {} failed", first.name))
        });
        let second_handle = s.spawn(|_| -> Result<ParticleSet> {
            run_extraction_case(second)
                .with_context(|| format!("case {} failed", second.name))
        });

        let first_set = first_handle
            .join()
            .map_err(|_| anyhow!("case {} thread panicked", first.name))??;
        let second_set = second_handle
            .join()
            .map_err(|_| anyhow!("case {} thread panicked", second.name))??;
        Ok((first_set, second_set))
    })
    .map_err(|panic_payload| anyhow!("extraction threads panicked: {:?}", panic_payload))?;

    result
}

#[cfg(test)]
mod entry_tests {
    use super::*;
    use crate::io::mrc;
    use crate::io::scene::{Scene, SceneObject};
    use crate::utils::test_utils::write_test_volume;
    use approx::assert_relative_eq;

    fn case_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tomocrop_entry_test").join(name);
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Two units with different offsets, three kept items of which one
    /// falls outside its tomogram.
    fn write_case_inputs(dir: &PathBuf) -> (PathBuf, PathBuf) {
        for unit in ["T1", "T2"] {
            write_test_volume(dir.join(format!("{}.mrc", unit)), [16, 16, 16], |x, y, z| {
                (x + 2 * y + 3 * z) as f32
            });
        }
        let units = dir.join("units.csv");
        let items = dir.join("items.csv");
        std::fs::write(
            &units,
            format!(
                "unit_id,tomo_path,coord_bin,offset_x,offset_y,offset_z\n\
                 T1,{},1.0,2,2,2\n\
                 T2,{},1.0,4,0,0\n",
                dir.join("T1.mrc").display(),
                dir.join("T2.mrc").display()
            ),
        )
        .unwrap();
        std::fs::write(
            &items,
            "unit_id,particle_id,keep,x,y,z,tilt_prior,psi_prior\n\
             T1,1,true,6.0,6.0,6.0,90.0,180.0\n\
             T1,2,true,-3.0,-3.0,-3.0,90.0,180.0\n\
             T1,3,false,6.0,6.0,6.0,90.0,180.0\n\
             T2,4,true,4.0,8.0,8.0,0.0,0.0\n",
        )
        .unwrap();
        (units, items)
    }

    fn config_with_root(dir: &PathBuf) -> ExtractConfig {
        let mut config: ExtractConfig = toml::from_str("box_size = 4").unwrap();
        config.root_template = dir
            .join("particles_size-{size}")
            .to_string_lossy()
            .to_string();
        config
    }

    #[test]
    fn test_case_end_to_end() {
        let dir = case_dir("single");
        let (units, items) = write_case_inputs(&dir);
        let spec = CaseSpec::new(
            "near",
            &units.to_string_lossy(),
            &items.to_string_lossy(),
            config_with_root(&dir),
        );

        let set = run_extraction_case(&spec).unwrap();
        // the keep=false item is dropped, the outside item gets no crop
        assert_eq!(set.items.len(), 3);
        let written: Vec<_> = set.items.iter().filter(|p| p.crop_path.is_some()).collect();
        assert_eq!(written.len(), 2);

        let root = dir.join("particles_size-4").join("near");
        let crop_path = root.join("T1").join("particle_1.mrc");
        assert!(crop_path.exists());
        let (crop, _) = mrc::read(&crop_path).unwrap();
        assert_eq!(crop.shape, [4, 4, 4]);
        // center_orig of item 1 is coord + offset = (8,8,8), box [6,10)
        assert_eq!(crop.at(0, 0, 0), (6 + 2 * 6 + 3 * 6) as f32);

        assert!(root.join("tables").join("near.json").exists());
        assert!(!root.join("tables").join("near_tmp.json").exists());
        let rows =
            crate::io::star::read_table(root.join("tables").join("near_all.star"), "particles")
                .unwrap();
        assert_eq!(rows.len(), 2);

        let persisted = ParticleSet::read(root.join("tables").join("near.json")).unwrap();
        assert_eq!(persisted.items.len(), 3);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_case_with_source_tables_adopts_angles() {
        let dir = case_dir("matched");
        write_test_volume(dir.join("T1.mrc"), [16, 16, 16], |_, _, _| 1.0);

        let units = dir.join("units.csv");
        std::fs::write(
            &units,
            format!(
                "unit_id,tomo_path,coord_bin,offset_x,offset_y,offset_z\n\
                 T1,{},1.0,2,2,2\n",
                dir.join("T1.mrc").display()
            ),
        )
        .unwrap();
        // the query items carry no orientation of their own
        let items = dir.join("items.csv");
        std::fs::write(
            &items,
            "unit_id,particle_id,x,y,z\n\
             T1,1,8.0,8.0,8.0\n",
        )
        .unwrap();
        // nearest source annotation half a pixel away
        let source_items = dir.join("source_items.csv");
        std::fs::write(
            &source_items,
            "unit_id,particle_id,x,y,z,tilt_prior,psi_prior,class_name,class_number\n\
             T1,10,0.0,0.0,0.0,10.0,10.0,conn,2\n\
             T1,11,8.5,8.0,8.0,90.0,180.0,teth,1\n",
        )
        .unwrap();

        let mut config = config_with_root(&dir);
        config.particle_to_center = Some(2.0);
        let mut spec = CaseSpec::new(
            "near",
            &units.to_string_lossy(),
            &items.to_string_lossy(),
            config,
        );
        spec.source_tables = Some((units.clone(), source_items));

        let set = run_extraction_case(&spec).unwrap();
        let item = &set.items[0];
        assert_eq!(item.source_index, Some(1));
        assert_eq!(item.distance, Some(0.5));
        assert_eq!(item.tilt_prior, Some(90.0));
        assert_eq!(item.class_name.as_deref(), Some("teth"));

        // adopted tilt 90 / psi 180 project along +x by the configured
        // distance before the frame conversion adds the unit offset
        let center = item.center_orig.unwrap();
        assert_relative_eq!(center[0], 12.0, epsilon = 1e-9);
        assert_relative_eq!(center[1], 10.0, epsilon = 1e-9);
        assert_relative_eq!(center[2], 10.0, epsilon = 1e-9);
        assert!(item.crop_path.is_some());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let dir_a = case_dir("seed_a");
        let dir_b = case_dir("seed_b");
        let mut sets = Vec::new();
        for dir in [&dir_a, &dir_b] {
            let (units, items) = write_case_inputs(dir);
            let mut config = config_with_root(dir);
            config.randomize_rot = true;
            config.seed = Some(1234);
            let spec = CaseSpec::new(
                "near",
                &units.to_string_lossy(),
                &items.to_string_lossy(),
                config,
            );
            sets.push(run_extraction_case(&spec).unwrap());
        }
        for (a, b) in sets[0].items.iter().zip(&sets[1].items) {
            assert_eq!(a.rot, b.rot);
            assert_eq!(a.center_orig, b.center_orig);
        }
        std::fs::remove_dir_all(&dir_a).ok();
        std::fs::remove_dir_all(&dir_b).ok();
    }

    #[test]
    fn test_region_pass_after_particle_pass() {
        let dir = case_dir("regions");
        let (units, items) = write_case_inputs(&dir);
        let spec = CaseSpec::new(
            "near",
            &units.to_string_lossy(),
            &items.to_string_lossy(),
            config_with_root(&dir),
        );
        let mut set = run_extraction_case(&spec).unwrap();

        // scene containers placed at each unit's offset
        let mut region_paths = Vec::new();
        for (unit, offset) in [("T1", [2.0, 2.0, 2.0]), ("T2", [4.0, 0.0, 0.0])] {
            let path = dir.join(format!("{}_scene.json", unit));
            let object = SceneObject {
                shape: [12, 12, 12],
                offset,
                data: vec![1.0; 12 * 12 * 12],
            };
            let scene = Scene {
                boundary: object.clone(),
                labels: object,
            };
            serde_json::to_writer(std::fs::File::create(&path).unwrap(), &scene).unwrap();
            region_paths.push((unit.to_string(), path.to_string_lossy().to_string()));
        }

        run_region_extraction(&spec, &mut set, SourceMode::SceneBoundary, &region_paths).unwrap();

        let regions = dir.join("particles_size-4").join("regions");
        let region_crop = regions.join("T1").join("seg_1.mrc");
        assert!(region_crop.exists());
        let (crop, _) = mrc::read(&region_crop).unwrap();
        assert_eq!(crop.shape, [4, 4, 4]);
        assert_eq!(crop.at(0, 0, 0), 1.0);
        assert!(set.items[0].region_crop_path.is_some());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_paired_cases_run_in_parallel() {
        let dir_a = case_dir("pair_a");
        let dir_b = case_dir("pair_b");
        let (units_a, items_a) = write_case_inputs(&dir_a);
        let (units_b, items_b) = write_case_inputs(&dir_b);

        let near = CaseSpec::new(
            "near",
            &units_a.to_string_lossy(),
            &items_a.to_string_lossy(),
            config_with_root(&dir_a),
        );
        let far = CaseSpec::new(
            "far",
            &units_b.to_string_lossy(),
            &items_b.to_string_lossy(),
            config_with_root(&dir_b),
        );

        let (set_near, set_far) = run_paired_cases(&near, &far).unwrap();
        assert_eq!(set_near.items.len(), 3);
        assert_eq!(set_far.items.len(), 3);
        assert!(dir_a
            .join("particles_size-4")
            .join("near")
            .join("tables")
            .join("near.json")
            .exists());
        assert!(dir_b
            .join("particles_size-4")
            .join("far")
            .join("tables")
            .join("far.json")
            .exists());
        std::fs::remove_dir_all(&dir_a).ok();
        std::fs::remove_dir_all(&dir_b).ok();
    }
}
