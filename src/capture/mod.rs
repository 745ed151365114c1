pub mod decoder;
pub mod frame;
pub mod synthetic;

pub use frame::{FrameMetadata, Plane, RawFrame};
pub use synthetic::SyntheticCamera;
