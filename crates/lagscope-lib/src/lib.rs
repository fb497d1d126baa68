//! Lag between pupil dilation events and neural activity peaks.
//!
//! A unit is one paired recording. Dilation onsets are flagged from the
//! derivative of the dilation channel, each onset gets a window that is
//! shrunk until the activity and dilation peaks agree, and approved lags are
//! summarised per batch.

pub mod align;
pub mod detectors;
pub mod error;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod signal;

pub use align::{align, align_window, padded_snippet, peak_lag, Alignment, WindowConfig};
pub use detectors::*;
pub use error::{LagError, LagResult};
pub use metrics::*;
pub use pipeline::{detect_onsets, process_unit, PipelineConfig, SkippedOnset, UnitOutcome};
pub use record::{EventKey, EventRecord, EventRow, SnippetRow, UnitId, WindowBounds};
pub use signal::*;
