//! Anti-silence monitors: barge-in detection and gap watching.

pub mod listening;
pub mod silence;

pub use listening::{
    ActiveListeningMonitor, InterruptionEvent, InterruptionKind, ListeningStats,
};
pub use silence::{SilenceEvent, SilenceGapMonitor, SilenceKind, SilenceStats};
