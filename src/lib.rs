// swarm-autoscaler: Horizontal autoscaler for Docker Swarm services
//
// Observes autoscale-labeled services, samples per-container CPU/memory
// utilization across the cluster, and adjusts replica counts within
// configured bounds. One instance decides (leader gate + singleton lock);
// every instance answers local stats queries for its peers.

pub mod actions;
pub mod cache;
pub mod discovery;
pub mod error;
pub mod events;
pub mod labels;
pub mod lock;
pub mod retry;
pub mod scaler;
pub mod server;
pub mod settings;
pub mod stats;
pub mod swarm;
pub mod watcher;

pub use error::{AutoscalerError, Result};
pub use settings::Settings;
