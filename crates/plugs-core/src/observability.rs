use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Catalog tallies for status views.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCounts {
    /// Approved house plugs.
    pub house: usize,
    /// Approved sponsored plugs.
    pub sponsored: usize,
    /// Sponsored plugs waiting for approval.
    pub unapproved: usize,
    /// Views left across approved sponsored plugs.
    pub views_outstanding: i64,
}

/// Install the global fmt subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Calling it again is harmless; only the first subscriber is kept.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
