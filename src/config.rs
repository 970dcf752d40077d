//! Process-wide settings.
//!
//! ```
//! use pooled_promise::{config, Rejection};
//! use std::sync::Arc;
//!
//! config::configure(|config| {
//!     config.pool_capacity = Some(64);
//!     config.unhandled_rejection_sink = Some(Arc::new(|rejection: Rejection| {
//!         eprintln!("unhandled: {rejection}");
//!     }));
//! });
//! ```

use crate::Rejection;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Receives rejections that reached the end of a chain without a handler.
pub type UnhandledSink = Arc<dyn Fn(Rejection) + Send + Sync>;

#[derive(Clone)]
pub struct Config {
    /// Recycle nodes through per-type free lists.
    pub pooling: bool,
    /// Free list bound per node type; `None` means unbounded. Read when a
    /// type's free list is first created.
    pub pool_capacity: Option<usize>,
    /// Where unhandled rejections go. Defaults to a `tracing` error event.
    pub unhandled_rejection_sink: Option<UnhandledSink>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pooling: true,
            pool_capacity: Some(256),
            unhandled_rejection_sink: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("pooling", &self.pooling)
            .field("pool_capacity", &self.pool_capacity)
            .field(
                "unhandled_rejection_sink",
                &self.unhandled_rejection_sink.as_ref().map(|_| ".."),
            )
            .finish()
    }
}

static CONFIG: LazyLock<RwLock<Config>> = LazyLock::new(|| RwLock::new(Config::default()));

pub fn configure<F: FnOnce(&mut Config)>(f: F) {
    f(&mut CONFIG.write());
}

pub fn current() -> Config {
    CONFIG.read().clone()
}

pub(crate) fn pooling() -> bool {
    CONFIG.read().pooling
}

pub(crate) fn pool_capacity() -> Option<usize> {
    CONFIG.read().pool_capacity
}

pub(crate) fn report_unhandled(rejection: Rejection) {
    // never call out while holding the lock, the sink may reconfigure
    let sink = CONFIG.read().unhandled_rejection_sink.clone();
    match sink {
        Some(sink) => sink(rejection),
        None => tracing::error!(%rejection, "unhandled promise rejection"),
    }
}
