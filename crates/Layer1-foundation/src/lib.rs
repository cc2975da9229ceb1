//! # taskline-foundation
//!
//! Foundation layer for taskline:
//! - Error: runtime errors and the command error taxonomy
//! - Config: layered TOML configuration

pub mod config;
pub mod error;

// ============================================================================
// Error
// ============================================================================
pub use error::{CommandError, Error, Result, UsageError, USAGE_EXIT_CODE};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    ConfigLoader, InterpreterSettings, PagerSettings, ServerSettings, TasklineConfig,
    CONFIG_DIR_NAME, CONFIG_FILE, LOCAL_CONFIG_FILE,
};
