use std::path::{Component, Path, PathBuf};

/// Standard output locations under the size-templated root:
/// `<root>/<name>/` for particle crops, `<root>/<regions>/` for region
/// crops, tables and STAR files under `<name>/tables/`.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub root: PathBuf,
    pub name: String,
    pub regions: String,
}

impl OutputPaths {
    pub fn new(name: &str, root_template: &str, regions: &str, box_size: i64) -> OutputPaths {
        let root = root_template.replace("{size}", &box_size.to_string());
        OutputPaths {
            root: PathBuf::from(root),
            name: name.to_string(),
            regions: regions.to_string(),
        }
    }

    pub fn particles_dir(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    pub fn regions_dir(&self) -> PathBuf {
        self.root.join(&self.regions)
    }

    pub fn set_path(&self) -> PathBuf {
        self.particles_dir()
            .join("tables")
            .join(format!("{}.json", self.name))
    }

    pub fn set_path_tmp(&self) -> PathBuf {
        self.particles_dir()
            .join("tables")
            .join(format!("{}_tmp.json", self.name))
    }

    pub fn star_path(&self) -> PathBuf {
        self.particles_dir()
            .join("tables")
            .join(format!("{}_all.star", self.name))
    }
}

/// Pure string transform between storage roots: the path tail starting at
/// the `common` component is re-anchored under `new_root`. Paths without
/// the common component pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct PathRewriter {
    pub common: Option<String>,
    pub new_root: Option<PathBuf>,
}

impl PathRewriter {
    pub fn new(common: Option<&str>, new_root: Option<&str>) -> PathRewriter {
        PathRewriter {
            common: common.map(|s| s.to_string()),
            new_root: new_root.map(PathBuf::from),
        }
    }

    pub fn convert(&self, path: &str) -> String {
        let (Some(common), Some(new_root)) = (&self.common, &self.new_root) else {
            return path.to_string();
        };
        let original = Path::new(path);
        let components: Vec<Component> = original.components().collect();
        let position = components
            .iter()
            .position(|c| matches!(c, Component::Normal(name) if name.to_string_lossy() == common.as_str()));
        let Some(position) = position else {
            return path.to_string();
        };
        let mut rewritten = new_root.clone();
        for component in &components[position..] {
            rewritten.push(component);
        }
        rewritten.to_string_lossy().to_string()
    }

    /// Applies the rewrite to an optional path column in place.
    pub fn convert_opt(&self, path: &mut Option<String>) {
        if let Some(p) = path {
            *p = self.convert(p);
        }
    }
}
