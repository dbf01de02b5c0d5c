pub mod raster;
pub mod raytrace;

pub use raster::{RasterDraw, RasterPass};
pub use raytrace::{DispatchRecord, RaytracePass};
