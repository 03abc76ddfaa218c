#![allow(clippy::result_large_err)]
//! # Bastion Core
//!
//! Request hardening for JSON web services.
//!
//! ## Architecture
//!
//! - **Security**: attack-signature detection, idempotent sanitisation, CSRF
//!   tokens, fixed-window rate limiting and a security event log
//! - **Validation**: schema-driven structured validation with exhaustive,
//!   field-level errors
//! - **Pipeline**: the fixed rate limit, validate, detect and sanitise, CSRF
//!   sequence every inbound request runs
//! - **HTTP**: a tower layer putting the pipeline in front of axum routes
//! - **Crypto**: hashing, HMAC, constant-time comparison and AES-256-GCM
//! - **Telemetry**: structured logging setup

pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod security;
pub mod telemetry;
pub mod validation;

pub use error::{BastionError, ErrorCode, ErrorResponse, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, ConfigError};
    pub use crate::error::{BastionError, ErrorCode, ErrorDetail, ErrorResponse, Result};
    pub use crate::http::{SanitizedPayload, SecurityLayer};
    pub use crate::pipeline::{
        CsrfMode, PipelineConfig, PipelineResult, RawRequest, Rejection, RequestPipeline, RoutePolicy,
    };
    pub use crate::security::{
        CsrfConfig, CsrfManager, PatternDetector, RateLimitConfig, RateLimiter, Sanitizer,
        SecurityEventLogger, ThreatCategory,
    };
    pub use crate::validation::{schemas, FieldSpec, Schema, ValidationErrors};
}
