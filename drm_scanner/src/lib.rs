//! discovery of display pipes and planes on a drm device

pub mod in_formats;
pub mod pipe_scanner;
pub mod plane_scanner;

pub use in_formats::{InFormats, AFBC_MODIFIER};
pub use pipe_scanner::{collect_pipes, pipe_size, PipeInfo, PipeScanResult, PipeScanner, MAX_PIPES};
pub use plane_scanner::{find_property, in_formats, range_max, set_property_max, PlaneInfo, PlaneScanner};
