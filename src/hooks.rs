//! replacements for the libdrm cursor entry points

use std::{
    collections::HashMap,
    os::fd::RawFd,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use drm::control::{crtc, from_u32};
use libc::c_int;
use tracing::{debug, warn};

use crate::{
    config::Config,
    context::{ContextCell, DeviceContext},
    converter::DumbConverter,
    device::Card,
    error::CursorError,
    logging,
};

type CardContext = DeviceContext<Card, DumbConverter>;

static CONFIG: OnceLock<Config> = OnceLock::new();
static CONTEXTS: OnceLock<Mutex<HashMap<RawFd, Arc<ContextCell<Card, DumbConverter>>>>> = OnceLock::new();

fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        let config = Config::setup();
        logging::setup(&config);
        config
    })
}

fn context(fd: RawFd) -> Result<Arc<CardContext>, CursorError> {
    let config = config();

    let cell = CONTEXTS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(fd)
        .or_default()
        .clone();

    let context = cell.get_or_init(|| {
        let card = Arc::new(Card::from_raw(fd)?);
        let converter = DumbConverter::new(card.clone());
        DeviceContext::new(card, converter, config)
    })?;
    Ok(context)
}

fn crtc(id: u32) -> Option<crtc::Handle> {
    from_u32(id)
}

fn status(call: &str, result: Result<(), CursorError>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(err) => {
            warn!("{call} failed: {err}");
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn drmModeSetCursor(fd: c_int, crtc_id: u32, bo_handle: u32, width: u32, height: u32) -> c_int {
    if fd < 0 {
        return -1;
    }
    let result = context(fd).and_then(|context| context.set_cursor(crtc(crtc_id), bo_handle, width, height));
    status("drmModeSetCursor", result)
}

#[no_mangle]
pub extern "C" fn drmModeMoveCursor(fd: c_int, crtc_id: u32, x: c_int, y: c_int) -> c_int {
    if fd < 0 {
        return -1;
    }
    match context(fd).and_then(|context| context.move_cursor(crtc(crtc_id), x, y)) {
        Ok(()) => 0,
        Err(err) => {
            debug!("drmModeMoveCursor failed: {err}");
            -1
        }
    }
}

/// always refused so that callers fall back to `drmModeSetCursor`
#[no_mangle]
pub extern "C" fn drmModeSetCursor2(
    fd: c_int,
    crtc_id: u32,
    bo_handle: u32,
    width: u32,
    height: u32,
    hot_x: i32,
    hot_y: i32,
) -> c_int {
    if fd < 0 {
        return -1;
    }
    let result = context(fd)
        .and_then(|context| context.set_cursor2(crtc(crtc_id), bo_handle, width, height, hot_x, hot_y));
    status("drmModeSetCursor2", result)
}
