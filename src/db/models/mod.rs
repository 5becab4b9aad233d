pub mod image;

pub use image::{ImageRecord, ImageStatus};
