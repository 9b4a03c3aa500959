//! Configuration for the edgecert certificate reconciler.
//!
//! - [`DomainRegistry`] loads the HAProxy backend map that defines which
//!   domains are routed, and therefore which certificates must exist.
//! - [`ReconcileSettings`] holds the static per-run parameters.
//! - [`expand_arg_files`] implements `@file` argument expansion for the CLI.

pub mod args;
pub mod error;
pub mod routing;
pub mod settings;

pub use args::{expand_arg_files, split_arg_line};
pub use error::ConfigError;
pub use routing::{normalize_domain, ActiveDomainSet, Domain, DomainRegistry};
pub use settings::ReconcileSettings;
