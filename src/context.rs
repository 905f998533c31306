use std::{
    sync::{Arc, Mutex, OnceLock, PoisonError},
    thread,
};

use drm::control::{crtc, from_u32, plane, PlaneType};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    converter::{BufferConverter, ConversionSetup},
    device::KmsDevice,
    error::{CursorError, DiscoveryError},
    pipe::{Active, DisplayPipe, Mailbox},
    selector::{check, BindStatus, Binding, Pass, Rejection},
    worker::PipeWorker,
};

/// every cursor pipe of one drm device
pub struct DeviceContext<D: KmsDevice, C: BufferConverter> {
    device: Arc<D>,
    converter: Arc<C>,
    pipes: Vec<DisplayPipe>,
    planes: Vec<plane::Handle>,
    allow_overlay: bool,
    prefer_compressed: bool,
    num_surfaces: u32,
    /// serializes plane binding across pipes
    bind_lock: Mutex<()>,
}

impl<D: KmsDevice, C: BufferConverter> DeviceContext<D, C> {
    pub fn new(device: Arc<D>, converter: C, config: &Config) -> Result<Self, DiscoveryError> {
        if let Err(err) = device.enable_plane_caps() {
            warn!("failed to enable plane client caps: {err}");
        }

        let scan = device.pipes().map_err(DiscoveryError::Resources)?;
        if scan.is_empty() {
            return Err(DiscoveryError::NoPipes);
        }

        let blocklist: Vec<u32> = config.crtc_blocklist.iter().copied().take(scan.resource_count).collect();

        let pipes: Vec<DisplayPipe> = scan
            .iter()
            .map(|info| {
                let preferred = config.preferred_plane(info.index).and_then(from_u32::<plane::Handle>);
                let blocked = blocklist.contains(&info.crtc.into());
                debug!(crtc = ?info.crtc, index = info.index, size = ?info.size, "found pipe");
                if blocked {
                    info!(crtc = ?info.crtc, "pipe is blocked");
                }
                DisplayPipe::new(info.crtc, info.index, preferred, blocked)
            })
            .collect();

        let planes = device.planes().map_err(DiscoveryError::Planes)?;

        let context = Self {
            device,
            converter: Arc::new(converter),
            pipes,
            planes,
            allow_overlay: config.allow_overlay,
            prefer_compressed: config.prefer_afbc,
            num_surfaces: config.num_surfaces,
            bind_lock: Mutex::new(()),
        };

        if config.debug {
            context.dump_planes();
        }
        info!(
            "drm-cursor {} ready with {} pipes and {} planes",
            env!("CARGO_PKG_VERSION"),
            context.pipes.len(),
            context.planes.len(),
        );

        Ok(context)
    }

    fn dump_planes(&self) {
        for plane in &self.planes {
            match self.device.plane_capability(*plane) {
                Ok(cap) => {
                    let kind = match cap.kind {
                        Some(PlaneType::Primary) => "primary",
                        Some(PlaneType::Overlay) => "overlay",
                        Some(PlaneType::Cursor) => "cursor",
                        None => "unknown",
                    };
                    let afbc = if cap.compressed { " (AFBC)" } else { "" };
                    let zpos = cap.max_zpos.map(|max| format!(" zpos<={max}")).unwrap_or_default();
                    debug!("plane {}: {kind} pipes {:#x}{zpos}{afbc}", u32::from(*plane), cap.possible_pipes);
                }
                Err(err) => debug!("plane {}: {err}", u32::from(*plane)),
            }
        }
    }

    pub fn pipes(&self) -> &[DisplayPipe] {
        &self.pipes
    }

    pub fn planes(&self) -> &[plane::Handle] {
        &self.planes
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn converter(&self) -> &Arc<C> {
        &self.converter
    }

    /// pipe driving `crtc`, or the first usable one for `None`
    pub fn find_pipe(&self, crtc: Option<crtc::Handle>) -> Option<&DisplayPipe> {
        match crtc {
            Some(crtc) => self.pipes.iter().find(|pipe| pipe.crtc == crtc).filter(|pipe| !pipe.blocked),
            None => self
                .pipes
                .iter()
                .filter(|pipe| !pipe.blocked)
                .find(|pipe| matches!(self.device.pipe_size(pipe.crtc), Ok(Some(_)))),
        }
    }

    /// bind a plane to `pipe` once, later calls report the first outcome
    pub fn bind_plane(&self, pipe: &DisplayPipe) -> BindStatus {
        let _guard = self.bind_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = pipe.binding.get() {
            return match existing {
                Some(binding) => BindStatus::AlreadyBound(*binding),
                None => BindStatus::Unavailable,
            };
        }

        let binding = self.select_plane(pipe);
        let _ = pipe.binding.set(binding);

        match binding {
            Some(binding) => {
                match self.device.raise_zpos(binding.plane) {
                    Ok(Some(zpos)) => debug!(plane = ?binding.plane, zpos, "raised plane"),
                    Ok(None) => {}
                    Err(err) => warn!(plane = ?binding.plane, "failed to raise zpos: {err}"),
                }
                info!(crtc = ?pipe.crtc, plane = ?binding.plane, compressed = binding.compressed, "plane bound");
                BindStatus::Bound(binding)
            }
            None => {
                warn!(crtc = ?pipe.crtc, "no plane available");
                BindStatus::Unavailable
            }
        }
    }

    fn select_plane(&self, pipe: &DisplayPipe) -> Option<Binding> {
        let passes = Pass::plan(pipe.preferred_plane, self.prefer_compressed, self.allow_overlay);

        passes.into_iter().find_map(|pass| {
            let flags = pass.flags();
            pass.candidates(&self.planes).into_iter().find_map(|plane| {
                let verdict = match self.device.plane_capability(plane) {
                    Ok(cap) if pass.accepts(&cap) => check(&cap, pipe.index, self.is_taken(plane, pipe), flags),
                    Ok(_) => return None,
                    Err(err) => {
                        debug!(?plane, "failed to query plane: {err}");
                        Err(Rejection::Query)
                    }
                };
                match verdict {
                    Ok(binding) => Some(binding),
                    Err(reason) => {
                        debug!(crtc = ?pipe.crtc, ?plane, ?pass, "plane rejected: {reason}");
                        None
                    }
                }
            })
        })
    }

    fn is_taken(&self, plane: plane::Handle, by: &DisplayPipe) -> bool {
        self.pipes
            .iter()
            .filter(|pipe| pipe.crtc != by.crtc)
            .any(|pipe| pipe.plane() == Some(plane))
    }

    /// bind the pipe and start its worker on first use
    fn prepare(&self, pipe: &DisplayPipe) -> Result<Arc<Mailbox>, CursorError> {
        let active = pipe.active.get_or_init(|| {
            let binding = match self.bind_plane(pipe) {
                BindStatus::Bound(binding) | BindStatus::AlreadyBound(binding) => binding,
                BindStatus::Unavailable => return None,
            };
            match self.spawn(pipe, binding) {
                Ok(active) => Some(active),
                Err(err) => {
                    warn!(crtc = ?pipe.crtc, "{err}");
                    None
                }
            }
        });

        match active {
            Some(active) => Ok(active.mailbox.clone()),
            None => Err(CursorError::NoPlane(pipe.crtc)),
        }
    }

    fn spawn(&self, pipe: &DisplayPipe, binding: Binding) -> Result<Active, CursorError> {
        let mailbox = Arc::new(Mailbox::new());
        let setup = ConversionSetup::new(self.num_surfaces, binding.compressed);
        let worker = PipeWorker::new(
            self.device.clone(),
            self.converter.clone(),
            mailbox.clone(),
            pipe.crtc,
            binding.plane,
            setup,
        );

        let handle = thread::Builder::new()
            .name(format!("drm-cursor-{}", u32::from(pipe.crtc)))
            .spawn(move || worker.run())
            .map_err(CursorError::Spawn)?;

        Ok(Active { mailbox, _worker: handle })
    }

    fn usable_pipe(&self, crtc: Option<crtc::Handle>) -> Result<&DisplayPipe, CursorError> {
        self.find_pipe(crtc)
            .ok_or_else(|| CursorError::NoPipe(crtc.map(u32::from).unwrap_or(0)))
    }

    /// show the image of `handle`, 0 hides the cursor; returns once the pipe settled
    pub fn set_cursor(&self, crtc: Option<crtc::Handle>, handle: u32, width: u32, height: u32) -> Result<(), CursorError> {
        let pipe = self.usable_pipe(crtc)?;
        let mailbox = self.prepare(pipe)?;

        debug!(crtc = ?pipe.crtc, handle, width, height, "set cursor");
        mailbox.set(handle, width, height).map_err(|_| CursorError::PipeFailed(pipe.crtc))
    }

    /// move the cursor, returns before the hardware is updated
    pub fn move_cursor(&self, crtc: Option<crtc::Handle>, x: i32, y: i32) -> Result<(), CursorError> {
        let pipe = self.usable_pipe(crtc)?;
        let mailbox = self.prepare(pipe)?;

        let size = self
            .device
            .pipe_size(pipe.crtc)
            .map_err(|err| CursorError::Query(pipe.crtc, err))?
            .ok_or(CursorError::NoMode(pipe.crtc))?;

        mailbox.move_to(x, y, size).map_err(|_| CursorError::PipeFailed(pipe.crtc))
    }

    /// hot-spots are not supported, nothing changes
    pub fn set_cursor2(
        &self,
        crtc: Option<crtc::Handle>,
        handle: u32,
        width: u32,
        height: u32,
        hot_x: i32,
        hot_y: i32,
    ) -> Result<(), CursorError> {
        debug!(?crtc, handle, width, height, hot_x, hot_y, "rejecting cursor with hot-spot");
        Err(CursorError::HotspotUnsupported)
    }
}

/// a device context created on first use, a failed creation is never retried
pub struct ContextCell<D: KmsDevice, C: BufferConverter> {
    inner: OnceLock<Option<Arc<DeviceContext<D, C>>>>,
}

impl<D: KmsDevice, C: BufferConverter> Default for ContextCell<D, C> {
    fn default() -> Self {
        Self { inner: OnceLock::new() }
    }
}

impl<D: KmsDevice, C: BufferConverter> ContextCell<D, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_init(
        &self,
        init: impl FnOnce() -> Result<DeviceContext<D, C>, DiscoveryError>,
    ) -> Result<Arc<DeviceContext<D, C>>, DiscoveryError> {
        let mut failure = None;
        let context = self.inner.get_or_init(|| match init() {
            Ok(context) => Some(Arc::new(context)),
            Err(err) => {
                warn!("device discovery failed: {err}");
                failure = Some(err);
                None
            }
        });

        match context {
            Some(context) => Ok(context.clone()),
            None => Err(failure.unwrap_or(DiscoveryError::Failed)),
        }
    }

    pub fn get(&self) -> Option<Arc<DeviceContext<D, C>>> {
        self.inner.get().cloned().flatten()
    }
}
