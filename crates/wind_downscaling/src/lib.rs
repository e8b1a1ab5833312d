pub mod data;
pub mod evaluation;
pub mod gan;
pub mod logging;
pub mod metrics;
pub mod network;
pub mod plotting;
pub mod tiling;
