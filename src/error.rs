use thiserror::Error;

/// Errors raised by the geometric core and the extraction stages.
///
/// Configuration and lookup failures are fatal for the running task;
/// per-unit I/O trouble is handled (with a warning) where it occurs and
/// never reaches this type.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unknown source mode `{0}`, expected `image`, `scene_boundary` or `scene_segment`")]
    UnknownSourceMode(String),

    #[error("unknown orientation `{0}`, expected `prior` or `nominal`")]
    UnknownOrientation(String),

    #[error("unit `{0}` not found in the unit table")]
    UnitNotFound(String),

    #[error("no source annotations for unit `{0}`, correspondence is undefined")]
    MissingGroup(String),

    #[error("item {particle_id} in unit `{unit_id}` lacks {which} tilt/psi angles")]
    MissingAngles {
        unit_id: String,
        particle_id: i64,
        which: &'static str,
    },

    #[error("unit `{0}` carries no region offset, frame conversion is undefined")]
    MissingOffset(String),

    #[error("image shape unavailable for unit `{0}`")]
    ShapeUnavailable(String),

    #[error("box [{left:?}, {right:?}) lies outside image of shape {shape:?} and expansion is disabled")]
    BoxOutside {
        left: [i64; 3],
        right: [i64; 3],
        shape: [usize; 3],
    },

    #[error("invalid MRC file {path}: {reason}")]
    Mrc { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
