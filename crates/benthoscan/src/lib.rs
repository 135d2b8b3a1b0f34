//! benthoscan — disk/ellipse organism detection in benthic survey imagery.
//!
//! Scans habitat photographs for disk- and ellipse-shaped benthic organisms
//! (scallops and similar epifauna) and emits a ranked, classified detection
//! list. The pipeline stages are:
//!
//! 1. **Color** – adaptive 3-D histogram models turn each frame into
//!    per-class response maps and an argmax label image.
//! 2. **Generators** – four independent proposal generators (DoG blob,
//!    adaptive threshold, radial-symmetry template, edge circle-fit) scan
//!    the response maps for candidate ellipses.
//! 3. **Consolidate** – a k-d point index merges near-duplicate proposals
//!    across generators into one candidate arena.
//! 4. **Cascade** – a two-tier classifier cascade (target classes + contextual
//!    suppression classes) labels each candidate or rejects it.
//! 5. **Refine** – radial-ray edge refinement polishes survivor geometry.
//! 6. **Suppress** – greedy circular-overlap suppression keeps the most
//!    confident detection of each overlapping group.
//! 7. **Feedback** – accepted detections drift the color model and the
//!    per-class density statistics that steer the next frame.

pub mod candidate;
pub mod cascade;
pub mod color;
pub mod config;
pub mod consolidate;
pub mod density;
pub mod ellipse;
pub mod generators;
pub mod mask;
pub mod output;
pub mod pipeline;
pub mod refine;
pub mod session;
pub mod spatial;
pub mod suppress;

pub use candidate::{Candidate, Detection, Method, MethodMask, RankedLabel, SpeciesFlags};
pub use cascade::{ClassifierError, ClassifierSystem, Scorer};
pub use color::{ColorHistogram, ColorModel, HistogramError, ResponseMaps};
pub use config::{DetectConfig, ImageScale, RadiusBand};
pub use ellipse::Ellipse;
pub use output::{CsvDetectionWriter, OutputError};
pub use pipeline::{ImageDetections, ImagePipeline};
pub use session::{Session, SessionError};
