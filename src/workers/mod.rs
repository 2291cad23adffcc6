pub mod baseline;
pub mod correlation;
pub mod pattern;
pub mod performance;
pub mod regime;

pub use baseline::BaselineCalculator;
pub use correlation::CorrelationAnalyzer;
pub use pattern::PatternDetector;
pub use performance::PerformanceRefresher;
pub use regime::RegimeDetector;
