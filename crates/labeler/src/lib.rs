//! Liquidation transition labeling.
//!
//! Pairs every two checkpoints, labels each vault active at the first one
//! as liquidated or not between them, and writes the records in bounded
//! batches.

pub mod batch;
pub mod labeler;
pub mod pairs;
pub mod summary;
pub mod window;

pub use batch::{Batch, BatchSink, BatchWriter, JsonBatchSink, MemorySink};
pub use labeler::{TransitionLabeler, Transitions};
pub use pairs::CheckpointPairs;
pub use summary::LabelingSummary;
pub use window::LiquidationWindowIndex;
