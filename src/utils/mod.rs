pub mod image_helper;
pub mod logger;
