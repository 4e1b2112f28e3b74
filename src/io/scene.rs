//! Segmentation scene container: a stored object exposing named
//! sub-objects ("boundary" and "labels"), each carrying its own data
//! array plus its placement offset within the original frame. Region
//! pipelines discover the per-unit region offset and shape from here.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::extract::volume::Volume;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneObject {
    pub shape: [usize; 3],
    /// Placement of this object's array inside the original frame.
    pub offset: [f64; 3],
    pub data: Vec<f32>,
}

impl SceneObject {
    pub fn volume(&self) -> Volume {
        Volume {
            data: self.data.clone(),
            shape: self.shape,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub boundary: SceneObject,
    pub labels: SceneObject,
}

impl Scene {
    pub fn read<P: AsRef<Path>>(path: P) -> anyhow::Result<Scene> {
        let file = File::open(&path)
            .with_context(|| format!("failed to open scene container {:?}", path.as_ref()))?;
        let scene = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse scene container {:?}", path.as_ref()))?;
        Ok(scene)
    }
}
