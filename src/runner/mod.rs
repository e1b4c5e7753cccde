//! Run execution: sequential batches, pooled variations and enhancement passes.
pub mod batch;
pub mod enhance;
pub mod events;
pub mod pacing;
pub mod variation;

pub use batch::{BatchOutcome, BatchRunner};
pub use events::{EventSink, RunEvent, RunSnapshot};
pub use pacing::Pacing;
pub use variation::{VariationOutcome, VariationRunner};
