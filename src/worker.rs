//! the thread applying cursor requests of one pipe

use std::sync::Arc;

use drm::control::{crtc, framebuffer, plane};
use tracing::{debug, error, warn};

use crate::{
    converter::{BufferConverter, ConversionContext, ConversionSetup},
    device::KmsDevice,
    error::UpdateError,
    pipe::Mailbox,
    protocol::CursorState,
};

pub struct PipeWorker<D: KmsDevice, C: BufferConverter> {
    device: Arc<D>,
    converter: Arc<C>,
    mailbox: Arc<Mailbox>,
    crtc: crtc::Handle,
    plane: plane::Handle,
    setup: ConversionSetup,
    /// created on the first framebuffer, dropped on error
    context: Option<C::Context>,
    /// what is on the hardware
    current: CursorState,
}

impl<D: KmsDevice, C: BufferConverter> PipeWorker<D, C> {
    pub fn new(
        device: Arc<D>,
        converter: Arc<C>,
        mailbox: Arc<Mailbox>,
        crtc: crtc::Handle,
        plane: plane::Handle,
        setup: ConversionSetup,
    ) -> Self {
        Self {
            device,
            converter,
            mailbox,
            crtc,
            plane,
            setup,
            context: None,
            current: CursorState::default(),
        }
    }

    /// serve requests until the pipe fails
    pub fn run(mut self) {
        loop {
            let next = self.mailbox.take();

            match self.apply(next) {
                Ok(()) => self.mailbox.complete(self.current),
                Err(err) => {
                    error!(crtc = ?self.crtc, plane = ?self.plane, "cursor pipe failed: {err}");
                    self.shutdown();
                    self.mailbox.fail(self.current);
                    return;
                }
            }
        }
    }

    fn apply(&mut self, next: CursorState) -> Result<(), UpdateError> {
        let reload = next.reload;
        let next = CursorState { fb: None, reload: false, ..next };

        if reload {
            if next.handle == 0 {
                debug!(crtc = ?self.crtc, "hiding cursor");
                return self.disable();
            }
            debug!(crtc = ?self.crtc, handle = next.handle, width = next.width, height = next.height, "loading cursor");
            let fb = self.create_fb(&next)?;
            return self.commit(CursorState { fb: Some(fb), ..next });
        }

        if self.current.fb.is_none() {
            // nothing shown yet, the position is used by the next image
            self.current = next;
            return Ok(());
        }

        if !next.same_offset(&self.current) {
            debug!(crtc = ?self.crtc, off_x = next.off_x, off_y = next.off_y, "edge moving");
            let fb = self.create_fb(&next)?;
            return self.commit(CursorState { fb: Some(fb), ..next });
        }

        self.commit(CursorState { fb: self.current.fb, ..next })
    }

    fn create_fb(&mut self, state: &CursorState) -> Result<framebuffer::Handle, UpdateError> {
        let context = match self.context.take() {
            Some(context) => context,
            None => self
                .converter
                .create_context(self.crtc, &self.setup)
                .map_err(UpdateError::Context)?,
        };
        let context = self.context.insert(context);

        context
            .convert(state.handle, (state.width, state.height), (state.off_x, state.off_y))
            .map_err(|source| UpdateError::Convert { handle: state.handle, source })
    }

    /// show `new`, then release the framebuffer it replaces
    ///
    /// `new` becomes the current state even when the commit fails so that
    /// its framebuffer is released with the pipe.
    fn commit(&mut self, new: CursorState) -> Result<(), UpdateError> {
        if new.same_commit(&self.current) {
            self.current = new;
            return Ok(());
        }

        let result = match new.fb {
            Some(fb) => self.device.set_plane(self.plane, self.crtc, fb, new.x, new.y, new.width, new.height),
            None => Ok(()),
        };

        let old = std::mem::replace(&mut self.current, new).fb;
        if old != new.fb {
            if let Some(old) = old {
                self.release(old);
            }
        }

        result.map_err(UpdateError::Commit)
    }

    fn disable(&mut self) -> Result<(), UpdateError> {
        let Some(fb) = self.current.fb else {
            self.current = CursorState::default();
            return Ok(());
        };

        let result = self.device.disable_plane(self.plane, self.crtc);
        self.release(fb);
        self.current = CursorState::default();
        result.map_err(UpdateError::Disable)
    }

    fn release(&self, fb: framebuffer::Handle) {
        if let Err(err) = self.device.destroy_framebuffer(fb) {
            warn!(?fb, "failed to destroy framebuffer: {err}");
        }
    }

    /// give every resource of the pipe back
    fn shutdown(&mut self) {
        self.context = None;

        if let Err(err) = self.device.disable_plane(self.plane, self.crtc) {
            warn!(plane = ?self.plane, "failed to disable plane: {err}");
        }
        if let Some(fb) = self.current.fb.take() {
            self.release(fb);
        }
        self.current = CursorState::default();
    }
}
