//! Run workflow for a single mix
//!
//! 1. Detect track boundaries from silence
//! 2. Identify each segment through the provider chain
//! 3. Reconcile candidates and enrich the chosen match
//! 4. Write tagged output files
//!
//! [`runner`] strings the stages together; `preview`/`apply` split the run
//! around a JSON cache.

pub mod boundary_detector;
pub mod identification_pipeline;
pub mod preview_cache;
pub mod reconciliation;
pub mod runner;
pub mod track_assembler;

pub use boundary_detector::{Boundary, BoundaryConfig, BoundaryDetection, BoundaryDetector, BoundaryError};
pub use identification_pipeline::{IdentificationPipeline, PipelineConfig};
pub use preview_cache::{CacheError, PreviewCache};
pub use runner::{apply, preview, run, run_with, RunReport};
pub use track_assembler::{sanitize_filename, AssemblerOptions, TrackAssembler};
