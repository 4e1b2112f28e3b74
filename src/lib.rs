mod config;
mod entry;
mod error;

mod extract;
mod geometry;
mod io;
mod pipeline;
mod utils;

pub use config::{ClassCode, ExtractConfig, OrientationSource, RemapConfig, SourceMode};
pub use entry::{run_extraction_case, run_paired_cases, run_region_extraction, CaseSpec};
pub use error::ExtractError;
pub use extract::transforms::{normalize_bound_ids, ImageTransform, OutputDtype};
pub use extract::volume::Volume;
pub use geometry::bounds::BoxCorners;
pub use geometry::frames::FrameRelation;
pub use geometry::matching::{find_min_distances, MatchResult};
pub use io::input::read_tables;
pub use io::{Frame, ItemRecord, ParticleSet, UnitRecord};
pub use pipeline::paths::{OutputPaths, PathRewriter};
pub use pipeline::{ParticleTask, RegionTask};
