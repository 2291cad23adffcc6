pub mod tracker;

pub use tracker::SignalOutcomeTracker;
