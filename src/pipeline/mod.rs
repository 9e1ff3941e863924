//! Frame processing
//!
//! Per-source chains of hot-reconfigurable stages, the per-frame metadata
//! record they annotate, and the detector capability they share.

pub mod detector;
pub mod frame;
pub mod processing;
pub mod stage;
pub mod stages;

pub use detector::{null_detector, Detector, DetectorError, NullDetector, SharedDetector, StaticDetector};
pub use frame::{BoundingBox, Detection, FrameData};
pub use processing::{PipelineError, ProcessingPipeline, StageInfo};
pub use stage::{PipelineStage, StageContext, StageError, StageResult};
pub use stages::{build_stage, StageKind};
