//! turning caller buffers into framebuffers a plane can scan out

use std::{
    io,
    os::fd::{AsFd, AsRawFd},
    sync::Arc,
};

use anyhow::{bail, Context as _, Result};
use drm::{
    buffer::{Buffer, DrmFourcc, DrmModifier, Handle as BufferHandle, PlanarBuffer},
    control::{crtc, dumbbuffer::DumbBuffer, framebuffer, Device as ControlDevice, FbCmd2Flags},
};
use drm_scanner::AFBC_MODIFIER;
use tracing::{debug, warn};

use crate::device::Card;

/// what a conversion context produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionSetup {
    /// framebuffers kept alive in rotation
    pub pool_size: u32,
    pub format: DrmFourcc,
    /// `Some` for a compressed layout
    pub modifier: Option<u64>,
}

impl ConversionSetup {
    /// AFBC only pairs with ABGR ordering, the linear layout uses ARGB
    pub fn new(pool_size: u32, compressed: bool) -> ConversionSetup {
        let (format, modifier) = match compressed {
            true => (DrmFourcc::Abgr8888, Some(AFBC_MODIFIER)),
            false => (DrmFourcc::Argb8888, None),
        };
        ConversionSetup { pool_size, format, modifier }
    }
}

pub trait BufferConverter: Send + Sync + 'static {
    type Context: ConversionContext;

    fn create_context(&self, crtc: crtc::Handle, setup: &ConversionSetup) -> Result<Self::Context>;
}

/// per pipe conversion state, owned by the pipe worker
pub trait ConversionContext: Send + 'static {
    /// framebuffer of `size` showing the `source` buffer shifted by `offset`
    fn convert(&mut self, source: u32, size: (u32, u32), offset: (i32, i32)) -> Result<framebuffer::Handle>;
}

const BPP: u32 = 32;

/// copies linear 32-bpp buffers into a ring of dumb buffers
#[derive(Debug)]
pub struct DumbConverter {
    card: Arc<Card>,
}

impl DumbConverter {
    pub fn new(card: Arc<Card>) -> DumbConverter {
        DumbConverter { card }
    }
}

impl BufferConverter for DumbConverter {
    type Context = DumbContext;

    fn create_context(&self, crtc: crtc::Handle, setup: &ConversionSetup) -> Result<DumbContext> {
        if setup.modifier.is_some() {
            warn!(?crtc, "compressed layout cannot be written by cpu, falling back to linear");
        }
        debug!(?crtc, format = ?setup.format, pool = setup.pool_size, "conversion context created");

        Ok(DumbContext {
            card: self.card.clone(),
            format: setup.format,
            pool_size: setup.pool_size.max(1) as usize,
            size: (0, 0),
            ring: vec![],
            next: 0,
        })
    }
}

pub struct DumbContext {
    card: Arc<Card>,
    format: DrmFourcc,
    pool_size: usize,
    size: (u32, u32),
    ring: Vec<DumbBuffer>,
    next: usize,
}

impl DumbContext {
    fn prepare(&mut self, size: (u32, u32)) -> Result<()> {
        if self.size == size && !self.ring.is_empty() {
            return Ok(());
        }
        self.release();

        for _ in 0..self.pool_size {
            let buffer = self
                .card
                .create_dumb_buffer(size, self.format, BPP)
                .with_context(|| format!("failed to create {}x{} dumb buffer", size.0, size.1))?;
            self.ring.push(buffer);
        }
        self.size = size;
        self.next = 0;
        Ok(())
    }

    fn release(&mut self) {
        for buffer in self.ring.drain(..) {
            if let Err(err) = self.card.destroy_dumb_buffer(buffer) {
                warn!("failed to destroy dumb buffer: {err}");
            }
        }
    }
}

impl ConversionContext for DumbContext {
    fn convert(&mut self, source: u32, size: (u32, u32), offset: (i32, i32)) -> Result<framebuffer::Handle> {
        if size.0 == 0 || size.1 == 0 {
            bail!("empty cursor size {}x{}", size.0, size.1);
        }
        self.prepare(size)?;

        let src = SourceMap::map(&self.card, source, size)?;
        let swizzle = self.format == DrmFourcc::Abgr8888;

        let index = self.next;
        self.next = (self.next + 1) % self.ring.len();

        let buffer = &mut self.ring[index];
        let pitch = buffer.pitch() as usize;
        {
            let mut dst = self.card.map_dumb_buffer(buffer).context("failed to map dumb buffer")?;
            blit(src.pixels(), size, &mut dst, pitch, offset, swizzle);
        }

        let planar = Planar { buffer: &*buffer, format: self.format };
        let fb = self
            .card
            .add_planar_framebuffer(&planar, FbCmd2Flags::empty())
            .context("failed to add framebuffer")?;
        Ok(fb)
    }
}

impl Drop for DumbContext {
    fn drop(&mut self) {
        self.release();
    }
}

/// read-only mapping of a caller buffer
struct SourceMap {
    ptr: *mut libc::c_void,
    len: usize,
}

impl SourceMap {
    fn map(card: &Card, handle: u32, size: (u32, u32)) -> Result<SourceMap> {
        let len = size.0 as usize * size.1 as usize * 4;
        let map = drm_ffi::mode::dumbbuffer::map(card.as_fd(), handle, 0, 0)
            .with_context(|| format!("failed to map buffer {handle}"))?;

        // SAFETY: the kernel handed out this offset for the buffer on this descriptor
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                card.as_fd().as_raw_fd(),
                map.offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error()).with_context(|| format!("failed to mmap buffer {handle}"));
        }
        Ok(SourceMap { ptr, len })
    }

    fn pixels(&self) -> &[u8] {
        // SAFETY: the mapping is `len` bytes long and lives as long as `self`
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

impl Drop for SourceMap {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from a successful mmap of `len` bytes
        unsafe { libc::munmap(self.ptr, self.len) };
    }
}

/// single plane view of a dumb buffer for ADDFB2
struct Planar<'a> {
    buffer: &'a DumbBuffer,
    format: DrmFourcc,
}

impl PlanarBuffer for Planar<'_> {
    fn size(&self) -> (u32, u32) {
        Buffer::size(self.buffer)
    }

    fn format(&self) -> DrmFourcc {
        self.format
    }

    fn modifier(&self) -> Option<DrmModifier> {
        None
    }

    fn pitches(&self) -> [u32; 4] {
        [self.buffer.pitch(), 0, 0, 0]
    }

    fn handles(&self) -> [Option<BufferHandle>; 4] {
        [Some(self.buffer.handle()), None, None, None]
    }

    fn offsets(&self) -> [u32; 4] {
        [0; 4]
    }
}

/// copy `src` (tightly packed ARGB) into `dst` so that dst(x, y) = src(x - off_x, y - off_y)
///
/// pixels with no source are cleared to transparent
pub fn blit(src: &[u8], size: (u32, u32), dst: &mut [u8], pitch: usize, offset: (i32, i32), swizzle: bool) {
    let (w, h) = (size.0 as i64, size.1 as i64);
    let src_pitch = w as usize * 4;

    for y in 0..h {
        let row = &mut dst[y as usize * pitch..][..src_pitch];
        let sy = y - offset.1 as i64;
        for x in 0..w {
            let px = &mut row[x as usize * 4..][..4];
            let sx = x - offset.0 as i64;
            if sx < 0 || sy < 0 || sx >= w || sy >= h {
                px.fill(0);
                continue;
            }
            let at = sy as usize * src_pitch + sx as usize * 4;
            let [b, g, r, a] = [src[at], src[at + 1], src[at + 2], src[at + 3]];
            px.copy_from_slice(&if swizzle { [r, g, b, a] } else { [b, g, r, a] });
        }
    }
}
