//! SoulBrowser observation layer.
//!
//! Wires the page driver ([`cdp_adapter`]), the network settle detector ([`network_settle`]) and
//! the structural perceiver ([`perceiver_structural`]) into one [`Observer`] per page, plus the
//! configuration and logging bootstrap shared by embedders.

pub mod config;
pub mod errors;
pub mod observation;
pub mod telemetry;

pub use cdp_adapter;
pub use network_settle;
pub use perceiver_structural;

pub use crate::config::{LogConfig, ObserveConfig};
pub use errors::ObserveError;
pub use observation::{ElementSelector, Observation, Observer};
pub use telemetry::init_logging;
