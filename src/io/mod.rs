//! I/O layer: the `SlideSource` capability with its in-tree adapters,
//! and the streaming format writers.
pub mod memory;
pub mod source;
pub mod tiff;
pub mod writers;

pub use memory::{MemoryScene, MemorySource, SceneData};
pub use source::{RawScene, SlideSource, SourceError};
pub use tiff::TiffSource;
