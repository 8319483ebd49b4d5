pub mod collector;
pub mod metrics;

pub use collector::{MetricsCollector, RegistrySizes};
pub use metrics::HelperMetrics;
