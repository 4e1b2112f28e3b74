pub mod transforms;
pub mod volume;
pub mod writer;
