//! Acquisition pipeline: synchronized sampling, subrun averaging and
//! measurement-set aggregation.

pub mod aggregator;
pub mod averager;
pub mod sampler;

pub use aggregator::MeasurementAggregator;
pub use averager::SubrunAverager;
pub use sampler::{PowerPoller, SynchronizedSampler};
