//! Demo command containers
//!
//! - `shelve`: key/value store with setup/teardown persistence
//! - `importer`: long-running threaded and isolated imports
//! - `pi`: the same computation in every execution class

mod importer;
mod pi;
mod shelve;

pub use importer::Importer;
pub use pi::PiCalculator;
pub use shelve::Shelve;

/// Names accepted on the command line
pub const CONTAINERS: [&str; 3] = ["shelve", "importer", "pi"];

/// Evaluate `$body` with `$c` bound to the container type named `$name`
macro_rules! with_container {
    ($name:expr, $c:ident => $body:expr) => {
        match $name {
            "shelve" => {
                type $c = $crate::containers::Shelve;
                $body
            }
            "importer" => {
                type $c = $crate::containers::Importer;
                $body
            }
            "pi" => {
                type $c = $crate::containers::PiCalculator;
                $body
            }
            other => Err(anyhow::anyhow!(
                "unknown container {:?}, expected one of {:?}",
                other,
                $crate::containers::CONTAINERS
            )),
        }
    };
}

pub(crate) use with_container;
