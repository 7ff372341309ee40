//! Concrete pipeline steps

pub mod extract_load;
pub mod transform;

pub use extract_load::ExtractLoadStep;
pub use transform::TransformStep;
