//! Indicator manager: startup self-tests, per-module cadence loops, the
//! snapshot flush timer and the aggregated status view.

pub mod manager;
pub mod status;

pub use manager::IndicatorManager;
pub use status::{ModuleReport, StatusMap, StatusReport};
