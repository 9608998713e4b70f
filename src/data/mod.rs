//! Sample data model, smoothing, hand-off queue and on-disk storage.
pub mod filter;
pub mod log_store;
pub mod queue;
pub mod sample;
