use std::io;

use drm::control::crtc;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid device descriptor {0}")]
    BadDescriptor(i32),
    #[error("failed to duplicate device descriptor: {0}")]
    Duplicate(#[source] io::Error),
    #[error("failed to enumerate pipes: {0}")]
    Resources(#[source] io::Error),
    #[error("device has no usable pipe")]
    NoPipes,
    #[error("failed to enumerate planes: {0}")]
    Planes(#[source] io::Error),
    #[error("device discovery failed earlier")]
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("no usable pipe for crtc {0}")]
    NoPipe(u32),
    #[error("no plane could be bound to crtc {0:?}")]
    NoPlane(crtc::Handle),
    #[error("crtc {0:?} is in error state")]
    PipeFailed(crtc::Handle),
    #[error("crtc {0:?} has no active mode")]
    NoMode(crtc::Handle),
    #[error("failed to query crtc {0:?}: {1}")]
    Query(crtc::Handle, #[source] io::Error),
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] io::Error),
    #[error("cursor hot-spot is not supported")]
    HotspotUnsupported,
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("failed to create conversion context: {0:#}")]
    Context(#[source] anyhow::Error),
    #[error("failed to convert buffer {handle}: {source:#}")]
    Convert {
        handle: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to commit plane: {0}")]
    Commit(#[source] io::Error),
    #[error("failed to disable plane: {0}")]
    Disable(#[source] io::Error),
}
