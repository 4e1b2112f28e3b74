pub mod bounds;
pub mod frames;
pub mod matching;
pub mod normals;
