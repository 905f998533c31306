use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError},
    thread::JoinHandle,
};

use drm::control::{crtc, plane};

use crate::{
    protocol::{clamp, CursorState},
    selector::Binding,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipeState {
    #[default]
    Idle,
    /// a request waits in the mailbox
    Pending,
    /// the worker is applying a request
    Busy,
    /// terminal
    Error,
}

#[derive(Debug, Default)]
struct Slot {
    state: PipeState,
    next: CursorState,
    /// what the worker last left on the hardware
    committed: CursorState,
}

/// single entry request slot shared by callers and the pipe worker
///
/// a newer request overwrites an older one the worker did not take yet
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Slot>,
    cond: Condvar,
}

/// the pipe is in its terminal error state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeFailed;

impl Mailbox {
    pub fn new() -> Mailbox {
        Mailbox::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// post a new image and wait for the worker to settle
    pub fn set(&self, handle: u32, width: u32, height: u32) -> Result<(), PipeFailed> {
        let mut slot = self.lock();
        if slot.state == PipeState::Error {
            return Err(PipeFailed);
        }

        slot.next.load(handle, width, height);
        slot.state = PipeState::Pending;
        self.cond.notify_all();

        let slot = self
            .cond
            .wait_while(slot, |slot| !matches!(slot.state, PipeState::Idle | PipeState::Error))
            .unwrap_or_else(PoisonError::into_inner);

        match slot.state {
            PipeState::Error => Err(PipeFailed),
            _ => Ok(()),
        }
    }

    /// post a new position on a pipe of `pipe_size`, returns without waiting
    pub fn move_to(&self, x: i32, y: i32, pipe_size: (u32, u32)) -> Result<(), PipeFailed> {
        let mut slot = self.lock();
        if slot.state == PipeState::Error {
            return Err(PipeFailed);
        }

        let cursor = (slot.committed.width, slot.committed.height);
        let (pos, offset) = clamp((x, y), cursor, pipe_size);
        slot.next.place(pos, offset);
        slot.state = PipeState::Pending;
        self.cond.notify_all();
        Ok(())
    }

    /// block until a request is posted and take it
    pub(crate) fn take(&self) -> CursorState {
        let mut slot = self
            .cond
            .wait_while(self.lock(), |slot| slot.state != PipeState::Pending)
            .unwrap_or_else(PoisonError::into_inner);

        let next = slot.next;
        slot.next.reload = false;
        slot.state = PipeState::Busy;
        next
    }

    /// publish the applied state, the pipe goes idle unless a newer request arrived meanwhile
    pub(crate) fn complete(&self, committed: CursorState) {
        let mut slot = self.lock();
        slot.committed = committed;
        if slot.state != PipeState::Pending {
            slot.state = PipeState::Idle;
        }
        self.cond.notify_all();
    }

    pub(crate) fn fail(&self, committed: CursorState) {
        let mut slot = self.lock();
        slot.committed = committed;
        slot.state = PipeState::Error;
        self.cond.notify_all();
    }

    pub fn state(&self) -> PipeState {
        self.lock().state
    }

    pub fn committed(&self) -> CursorState {
        self.lock().committed
    }

    /// block until the worker has nothing left to do
    pub fn settle(&self) -> PipeState {
        self.cond
            .wait_while(self.lock(), |slot| !matches!(slot.state, PipeState::Idle | PipeState::Error))
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }
}

#[derive(Debug)]
pub(crate) struct Active {
    pub(crate) mailbox: Arc<Mailbox>,
    pub(crate) _worker: JoinHandle<()>,
}

/// one crtc that may carry a cursor
#[derive(Debug)]
pub struct DisplayPipe {
    pub crtc: crtc::Handle,
    /// position in the device resource list
    pub index: usize,
    pub preferred_plane: Option<plane::Handle>,
    pub blocked: bool,
    /// `None` once binding failed
    pub(crate) binding: OnceLock<Option<Binding>>,
    /// `None` once the pipe could not be started
    pub(crate) active: OnceLock<Option<Active>>,
}

impl DisplayPipe {
    pub fn new(crtc: crtc::Handle, index: usize, preferred_plane: Option<plane::Handle>, blocked: bool) -> DisplayPipe {
        DisplayPipe {
            crtc,
            index,
            preferred_plane,
            blocked,
            binding: OnceLock::new(),
            active: OnceLock::new(),
        }
    }

    pub fn binding(&self) -> Option<Binding> {
        self.binding.get().copied().flatten()
    }

    pub fn plane(&self) -> Option<plane::Handle> {
        self.binding().map(|binding| binding.plane)
    }

    pub fn mailbox(&self) -> Option<&Arc<Mailbox>> {
        self.active.get()?.as_ref().map(|active| &active.mailbox)
    }

    /// `None` until the first cursor operation started the pipe
    pub fn state(&self) -> Option<PipeState> {
        self.mailbox().map(|mailbox| mailbox.state())
    }

    pub fn committed(&self) -> Option<CursorState> {
        self.mailbox().map(|mailbox| mailbox.committed())
    }
}
