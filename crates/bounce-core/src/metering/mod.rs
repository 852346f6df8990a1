//! Peak and loudness measurement.
//!
//! - Streaming: `PeakReader`, `LoudnessReader` for first-pass capture analysis
//! - Batch analysis: `analyze_loudness`, `analyze_true_peak` for finished buffers

mod loudness;
mod math;
mod peak;

pub use loudness::{analyze_loudness, analyze_true_peak, AnalysisResult, LoudnessReader};
pub use math::{amplitude_to_db, db_to_amplitude};
pub use peak::PeakReader;
