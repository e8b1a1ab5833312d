pub mod batcher;
pub mod dataset;
pub mod predictors;
pub mod provider;
pub mod raster;
