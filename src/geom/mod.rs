mod bbox;
mod distance;
mod repair;
mod validate;

pub(crate) use bbox::{envelope, IndexedBox};
pub use distance::{centroid_distance, polygon_distance};
pub use repair::{buffer_repair, expand, zero_buffer};
pub use validate::{check, check_polygonal, validate};
