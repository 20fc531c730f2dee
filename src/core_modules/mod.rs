pub mod blob_detector;
pub mod classifier;
pub mod decision;
pub mod detector;
pub mod localizer;
pub mod luma_grid;
pub mod photograph;
pub mod region;
