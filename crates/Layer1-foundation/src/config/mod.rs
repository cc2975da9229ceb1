//! Configuration
//!
//! - `settings`: the `TasklineConfig` sections and their defaults
//! - `loader`: layered user/project/local file loading

mod loader;
mod settings;

pub use loader::{ConfigLoader, CONFIG_DIR_NAME};
pub use settings::{
    InterpreterSettings, PagerSettings, ServerSettings, TasklineConfig, CONFIG_FILE,
    LOCAL_CONFIG_FILE,
};
