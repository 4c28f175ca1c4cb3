mod analytics;
mod health;
mod metrics;
mod roast;

pub use analytics::{AnalyticsReport, analytics_handler};
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use roast::roast_handler;
