//! Telemetry: structured logging setup.
//!
//! Counters are recorded through the `metrics` facade at their call sites
//! (`bastion_rate_limit_*`, `bastion_security_events_total`,
//! `bastion_pipeline_rejections_total`). Installing an exporter is left to the
//! embedding binary.

pub mod logging;

pub use logging::{build_filter, init_logging, LogFormat, LoggingConfig};
