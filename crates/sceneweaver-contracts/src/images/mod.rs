mod collection;
mod record;

pub use collection::ImageCollection;
pub use record::{ImageId, ImageRecord, Resolution};
