//! Screen capture pipeline: frame buffers, dirty-region detection,
//! region encoding, batching and the capture loop itself.

pub mod delta;
pub mod encoder;
pub mod engine;
pub mod queue;
pub mod types;

pub use delta::DirtyDetector;
pub use encoder::{FrameBatch, FrameRegion, RegionEncoder, ZstdRegionEncoder};
pub use engine::{CaptureConfig, CaptureEngine};
pub use queue::BatchQueue;
pub use types::{PixelBuffer, Rect};
