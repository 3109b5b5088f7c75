pub mod api;
pub mod config;
pub mod consts;
pub mod errors;
pub mod graphs;
pub mod identifier;
pub mod merger;
pub mod options;
pub mod resolver;
pub mod resource;
pub mod schema;
pub mod util;
pub mod variant;
pub mod watcher;

pub use api::Engine;
pub use config::Config;
pub use errors::{Error, Result};
pub use options::{DescribeFlags, IdentificationMode, RemovalFlags, StoreFlags};
pub use resource::{PropValue, ResourceId, SimpleResource, SimpleResourceGraph};
pub use variant::{Scalar, ScalarKind, Variant};
pub use watcher::{ChangeEvent, Subscription, WatchId};

pub use oxigraph::io::RdfFormat;

/// Initializes logging for the library.
///
/// This function checks for the `SEMSTORE_LOG` environment variable. If it is
/// set, `RUST_LOG` is set to its value, so `SEMSTORE_LOG` takes precedence
/// over `RUST_LOG`. Safe to call when a logger is already installed.
pub fn init_logging() {
    if let Ok(log_level) = std::env::var("SEMSTORE_LOG") {
        std::env::set_var("RUST_LOG", log_level);
    }
    let _ = env_logger::try_init();
}
