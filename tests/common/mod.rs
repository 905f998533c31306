#![allow(dead_code)]

use std::{
    collections::HashSet,
    io,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
};

use drm::control::{crtc, framebuffer, from_u32, plane, PlaneType};
use drm_cursor::{
    config::Config,
    context::DeviceContext,
    converter::{BufferConverter, ConversionContext, ConversionSetup},
    device::{KmsDevice, PlaneCapability},
    pipe::PipeState,
};
use drm_scanner::{collect_pipes, PipeScanResult};

pub fn crtc(id: u32) -> crtc::Handle {
    from_u32(id).unwrap()
}

pub fn plane(id: u32) -> plane::Handle {
    from_u32(id).unwrap()
}

pub fn fb(id: u32) -> framebuffer::Handle {
    from_u32(id).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    SetPlane { plane: u32, crtc: u32, fb: u32, x: i32, y: i32, w: u32, h: u32 },
    DisablePlane { plane: u32, crtc: u32 },
    DestroyFb(u32),
    RaiseZpos(u32),
}

/// blocks callers while closed
#[derive(Debug, Default)]
pub struct Gate {
    closed: Mutex<bool>,
    cond: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }

    pub fn open(&self) {
        *self.closed.lock().unwrap() = false;
        self.cond.notify_all();
    }

    pub fn pass(&self) {
        let closed = self.closed.lock().unwrap();
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _closed = self.cond.wait_while(closed, |closed| *closed).unwrap();
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }

    /// spin until someone is held at the gate
    pub fn wait_for_waiter(&self) {
        while self.waiting.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }
    }
}

pub struct MockPipe {
    pub crtc: u32,
    pub size: Option<(u32, u32)>,
}

pub struct MockPlane {
    pub id: u32,
    pub kind: PlaneType,
    pub pipes: u32,
    pub afbc: bool,
    pub zpos: Option<u64>,
}

impl MockPlane {
    pub fn new(id: u32, kind: PlaneType, pipes: u32) -> MockPlane {
        MockPlane { id, kind, pipes, afbc: false, zpos: Some(7) }
    }

    pub fn afbc(mut self) -> MockPlane {
        self.afbc = true;
        self
    }
}

/// in-memory kms device recording every hardware call
#[derive(Default)]
pub struct MockDevice {
    pub pipes: Vec<MockPipe>,
    /// crtcs the kernel lists after `pipes` but refuses to describe
    pub broken_pipes: usize,
    pub planes: Vec<MockPlane>,
    pub fail_resources: bool,
    pub fail_commit: AtomicBool,
    pub gate: Gate,
    pub calls: Mutex<Vec<Call>>,
    pub live: Mutex<HashSet<u32>>,
    pub double_frees: AtomicUsize,
    pub queries: AtomicUsize,
}

impl MockDevice {
    pub fn new(pipes: Vec<MockPipe>, planes: Vec<MockPlane>) -> MockDevice {
        MockDevice { pipes, planes, ..MockDevice::default() }
    }

    /// one 1920x1080 pipe with a primary, an overlay and a cursor plane
    pub fn simple() -> MockDevice {
        MockDevice::new(
            vec![MockPipe { crtc: 41, size: Some((1920, 1080)) }],
            vec![
                MockPlane::new(31, PlaneType::Primary, 0b1),
                MockPlane::new(40, PlaneType::Overlay, 0b1),
                MockPlane::new(50, PlaneType::Cursor, 0b1),
            ],
        )
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_planes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|call| matches!(call, Call::SetPlane { .. })).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn live_fbs(&self) -> HashSet<u32> {
        self.live.lock().unwrap().clone()
    }

    pub fn register_fb(&self, id: u32) {
        self.live.lock().unwrap().insert(id);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn mock_plane(&self, handle: plane::Handle) -> io::Result<&MockPlane> {
        let id = u32::from(handle);
        self.planes
            .iter()
            .find(|plane| plane.id == id)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }
}

impl KmsDevice for MockDevice {
    fn enable_plane_caps(&self) -> io::Result<()> {
        Ok(())
    }

    fn pipes(&self) -> io::Result<PipeScanResult> {
        if self.fail_resources {
            return Err(io::Error::from_raw_os_error(libc::EACCES));
        }
        let broken = (0..self.broken_pipes as u32).map(|n| crtc(900 + n));
        let crtcs: Vec<crtc::Handle> = self.pipes.iter().map(|pipe| crtc(pipe.crtc)).chain(broken).collect();
        Ok(collect_pipes(&crtcs, |handle| {
            let id = u32::from(handle);
            self.pipes.iter().find(|pipe| pipe.crtc == id).map(|pipe| pipe.size)
        }))
    }

    fn pipe_size(&self, handle: crtc::Handle) -> io::Result<Option<(u32, u32)>> {
        let id = u32::from(handle);
        self.pipes
            .iter()
            .find(|pipe| pipe.crtc == id)
            .map(|pipe| pipe.size)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn planes(&self) -> io::Result<Vec<plane::Handle>> {
        Ok(self.planes.iter().map(|p| plane(p.id)).collect())
    }

    fn plane_capability(&self, handle: plane::Handle) -> io::Result<PlaneCapability> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mock = self.mock_plane(handle)?;
        Ok(PlaneCapability {
            plane: handle,
            possible_pipes: mock.pipes,
            kind: Some(mock.kind),
            max_zpos: mock.zpos,
            compressed: mock.afbc,
        })
    }

    fn raise_zpos(&self, handle: plane::Handle) -> io::Result<Option<u64>> {
        self.record(Call::RaiseZpos(u32::from(handle)));
        Ok(self.mock_plane(handle)?.zpos)
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
        self.gate.pass();
        self.record(Call::SetPlane { plane: plane.into(), crtc: crtc.into(), fb: fb.into(), x, y, w, h });
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        Ok(())
    }

    fn disable_plane(&self, plane: plane::Handle, crtc: crtc::Handle) -> io::Result<()> {
        self.record(Call::DisablePlane { plane: plane.into(), crtc: crtc.into() });
        Ok(())
    }

    fn destroy_framebuffer(&self, fb: framebuffer::Handle) -> io::Result<()> {
        let id = u32::from(fb);
        self.record(Call::DestroyFb(id));
        if !self.live.lock().unwrap().remove(&id) {
            self.double_frees.fetch_add(1, Ordering::SeqCst);
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    pub handle: u32,
    pub size: (u32, u32),
    pub offset: (i32, i32),
}

#[derive(Default)]
pub struct ConverterState {
    /// framebuffer id derived from the source handle instead of a fresh one
    pub stable: bool,
    pub fail: AtomicBool,
    pub next_fb: AtomicU32,
    pub conversions: Mutex<Vec<Conversion>>,
    pub setups: Mutex<Vec<ConversionSetup>>,
    pub live_contexts: AtomicUsize,
}

/// hands out framebuffers registered on the mock device
pub struct MockConverter {
    device: Arc<MockDevice>,
    pub state: Arc<ConverterState>,
}

impl MockConverter {
    pub fn new(device: Arc<MockDevice>) -> MockConverter {
        MockConverter { device, state: Arc::default() }
    }

    pub fn stable(device: Arc<MockDevice>) -> MockConverter {
        let state = ConverterState { stable: true, ..ConverterState::default() };
        MockConverter { device, state: Arc::new(state) }
    }

    pub fn conversions(&self) -> Vec<Conversion> {
        self.state.conversions.lock().unwrap().clone()
    }

    pub fn setups(&self) -> Vec<ConversionSetup> {
        self.state.setups.lock().unwrap().clone()
    }

    pub fn live_contexts(&self) -> usize {
        self.state.live_contexts.load(Ordering::SeqCst)
    }
}

pub struct MockContext {
    device: Arc<MockDevice>,
    state: Arc<ConverterState>,
}

impl BufferConverter for MockConverter {
    type Context = MockContext;

    fn create_context(&self, _crtc: crtc::Handle, setup: &ConversionSetup) -> anyhow::Result<MockContext> {
        self.state.setups.lock().unwrap().push(*setup);
        self.state.live_contexts.fetch_add(1, Ordering::SeqCst);
        Ok(MockContext { device: self.device.clone(), state: self.state.clone() })
    }
}

impl ConversionContext for MockContext {
    fn convert(&mut self, source: u32, size: (u32, u32), offset: (i32, i32)) -> anyhow::Result<framebuffer::Handle> {
        self.state.conversions.lock().unwrap().push(Conversion { handle: source, size, offset });
        if self.state.fail.load(Ordering::SeqCst) {
            anyhow::bail!("conversion of {source} failed");
        }
        let id = match self.state.stable {
            true => source + 1000,
            false => 100 + self.state.next_fb.fetch_add(1, Ordering::SeqCst),
        };
        self.device.register_fb(id);
        Ok(fb(id))
    }
}

impl Drop for MockContext {
    fn drop(&mut self) {
        self.state.live_contexts.fetch_sub(1, Ordering::SeqCst);
    }
}

pub type MockContextOf = DeviceContext<MockDevice, MockConverter>;

pub fn context(device: MockDevice, config: &Config) -> (Arc<MockDevice>, MockContextOf) {
    let device = Arc::new(device);
    let converter = MockConverter::new(device.clone());
    let context = DeviceContext::new(device.clone(), converter, config).unwrap();
    (device, context)
}

pub fn stable_context(device: MockDevice, config: &Config) -> (Arc<MockDevice>, MockContextOf) {
    let device = Arc::new(device);
    let converter = MockConverter::stable(device.clone());
    let context = DeviceContext::new(device.clone(), converter, config).unwrap();
    (device, context)
}

/// wait for the worker of the pipe driving `id` to finish its queue
pub fn settle(context: &MockContextOf, id: u32) -> PipeState {
    context.find_pipe(Some(crtc(id))).unwrap().mailbox().unwrap().settle()
}
