//! cursor planes for drm devices whose cursor plane is not good enough
//!
//! loaded in front of libdrm, the legacy cursor calls are served by a general
//! purpose plane updated from one worker thread per pipe.

pub mod config;
pub mod context;
pub mod converter;
pub mod device;
pub mod error;
pub mod logging;
pub mod pipe;
pub mod protocol;
pub mod selector;
pub mod worker;

#[allow(non_snake_case)]
pub mod hooks;

pub use config::Config;
pub use context::{ContextCell, DeviceContext};
pub use device::{Card, KmsDevice, PlaneCapability};
pub use error::{CursorError, DiscoveryError, UpdateError};
pub use pipe::{DisplayPipe, PipeState};
pub use protocol::CursorState;
