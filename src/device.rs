use std::{
    io,
    os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd},
};

use drm::{
    control::{crtc, framebuffer, plane, Device as ControlDevice, PlaneType},
    ClientCapability, Device,
};
use drm_scanner::{
    find_property, in_formats, range_max, set_property_max, InFormats, PipeScanResult, PipeScanner,
    PlaneScanner,
};
use tracing::debug;

use crate::error::DiscoveryError;

/// what a plane can do, queried on demand and never cached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneCapability {
    pub plane: plane::Handle,
    /// bit `n` set when the plane can drive the pipe at resource index `n`
    pub possible_pipes: u32,
    pub kind: Option<PlaneType>,
    pub max_zpos: Option<u64>,
    /// the plane lists the AFBC modifier
    pub compressed: bool,
}

impl PlaneCapability {
    pub fn supports_pipe(&self, index: usize) -> bool {
        index < 32 && self.possible_pipes & (1 << index) != 0
    }
}

/// kernel mode-setting operations the cursor engine needs
pub trait KmsDevice: Send + Sync + 'static {
    /// enable atomic and universal plane client capabilities
    fn enable_plane_caps(&self) -> io::Result<()>;

    fn pipes(&self) -> io::Result<PipeScanResult>;

    /// visible size of the pipe, `None` when no mode is set
    fn pipe_size(&self, crtc: crtc::Handle) -> io::Result<Option<(u32, u32)>>;

    fn planes(&self) -> io::Result<Vec<plane::Handle>>;

    fn plane_capability(&self, plane: plane::Handle) -> io::Result<PlaneCapability>;

    /// raise the z-order property to its maximum, returns the written value
    fn raise_zpos(&self, plane: plane::Handle) -> io::Result<Option<u64>>;

    /// show `fb` at (x, y) with size (w, h) on `crtc`
    #[allow(clippy::too_many_arguments)]
    fn set_plane(
        &self,
        plane: plane::Handle,
        crtc: crtc::Handle,
        fb: framebuffer::Handle,
        x: i32,
        y: i32,
        w: u32,
        h: u32,
    ) -> io::Result<()>;

    fn disable_plane(&self, plane: plane::Handle, crtc: crtc::Handle) -> io::Result<()>;

    fn destroy_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()>;
}

/// a drm card, owning its own duplicate of the caller's descriptor
#[derive(Debug)]
pub struct Card(OwnedFd);

impl Card {
    pub fn from_raw(fd: RawFd) -> Result<Card, DiscoveryError> {
        if fd < 0 {
            return Err(DiscoveryError::BadDescriptor(fd));
        }
        // SAFETY: the descriptor is open for the duration of the hooked call
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let owned = borrowed.try_clone_to_owned().map_err(DiscoveryError::Duplicate)?;
        Ok(Card(owned))
    }
}

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for Card {}
impl ControlDevice for Card {}

const ZPOS_NAMES: [&str; 2] = ["zpos", "ZPOS"];

/// an unreadable `IN_FORMATS` only means the plane has no compressed layout
fn lists_afbc(plane: plane::Handle, formats: io::Result<Option<InFormats>>) -> bool {
    match formats {
        Ok(formats) => formats.is_some_and(|formats| formats.has_afbc()),
        Err(err) => {
            debug!(?plane, "ignoring IN_FORMATS: {err}");
            false
        }
    }
}

impl KmsDevice for Card {
    fn enable_plane_caps(&self) -> io::Result<()> {
        self.set_client_capability(ClientCapability::Atomic, true)?;
        self.set_client_capability(ClientCapability::UniversalPlanes, true)
    }

    fn pipes(&self) -> io::Result<PipeScanResult> {
        PipeScanner::new().scan(self)
    }

    fn pipe_size(&self, crtc: crtc::Handle) -> io::Result<Option<(u32, u32)>> {
        drm_scanner::pipe_size(self, crtc)
    }

    fn planes(&self) -> io::Result<Vec<plane::Handle>> {
        PlaneScanner::new().scan(self)
    }

    fn plane_capability(&self, plane: plane::Handle) -> io::Result<PlaneCapability> {
        let resources = self.resource_handles()?;
        let info = PlaneScanner::new().info(self, &resources, plane)?;

        let mut max_zpos = None;
        for name in ZPOS_NAMES {
            if let Some((prop, _)) = find_property(self, plane, name)? {
                max_zpos = range_max(&prop);
                break;
            }
        }

        Ok(PlaneCapability {
            plane,
            possible_pipes: info.possible_pipes,
            kind: info.kind,
            max_zpos,
            compressed: lists_afbc(plane, in_formats(self, plane)),
        })
    }

    fn raise_zpos(&self, plane: plane::Handle) -> io::Result<Option<u64>> {
        for name in ZPOS_NAMES {
            if let Some(max) = set_property_max(self, plane, name)? {
                return Ok(Some(max));
            }
        }
        Ok(None)
    }

    fn set_plane(
        &self,
        plane: plane::Handle,
        crtc: crtc::Handle,
        fb: framebuffer::Handle,
        x: i32,
        y: i32,
        w: u32,
        h: u32,
    ) -> io::Result<()> {
        ControlDevice::set_plane(self, plane, crtc, Some(fb), 0, (x, y, w, h), (0, 0, w << 16, h << 16))
    }

    fn disable_plane(&self, plane: plane::Handle, crtc: crtc::Handle) -> io::Result<()> {
        ControlDevice::set_plane(self, plane, crtc, None, 0, (0, 0, 0, 0), (0, 0, 0, 0))
    }

    fn destroy_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()> {
        ControlDevice::destroy_framebuffer(self, fb)
    }
}
