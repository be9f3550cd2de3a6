//! Pipeline configuration for phasegrid.
//!
//! A run is described by a [`PipelineConfig`], which maps one-to-one onto a
//! TOML file with `[cardiac]`, `[badpoints]`, `[projection]`,
//! `[regression]`, `[external]`, `[processing]` and `[output]` sections.
//! Command-line flags override individual fields before
//! [`PipelineConfig::validate`] checks ranges and parses method names into a
//! [`ResolvedConfig`] holding ready-to-use analysis settings.
//!
//! # Features
//!
//! - **TOML files**: load, save, and print the defaults
//! - **Validation**: unknown methods and out-of-range values are reported by key
//! - **Resolution**: analysis component settings built from one place
//!
//! # Example
//!
//! ```rust
//! use phasegrid_config::PipelineConfig;
//!
//! let config = PipelineConfig::from_toml(
//!     r#"
//!     [projection]
//!     bin_count = 24
//!     kernel = "gauss"
//!     kernel_width = 2.5
//!     "#,
//! )
//! .unwrap();
//!
//! let resolved = config.validate().unwrap();
//! assert_eq!(resolved.projection.bin_count, 24);
//! ```

mod error;
mod pipeline;

/// Range checks and conversion into analysis settings.
pub mod validation;

pub use error::ConfigError;
pub use pipeline::{
    BadPointConfig, CardiacConfig, ExternalConfig, OutputConfig, PipelineConfig, ProcessingConfig,
    ProjectionSection, RegressionSection,
};
pub use validation::{MotionOptions, ResolvedConfig, VarianceMaskSettings};
