//! picking the plane that carries a pipe's cursor

use std::fmt;

use bitflags::bitflags;
use drm::control::{plane, PlaneType};

use crate::device::PlaneCapability;

bitflags! {
    /// constraints of one binding attempt
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BindFlags: u8 {
        const ALLOW_OVERLAY = 1;
        const REQUIRE_COMPRESSED = 1 << 1;
    }
}

/// plane bound to a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub plane: plane::Handle,
    /// the pipe renders its cursor with the compressed layout
    pub compressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStatus {
    Bound(Binding),
    AlreadyBound(Binding),
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// bound to another pipe
    Taken,
    WrongPipe,
    Primary,
    Overlay,
    NoCompression,
    UnknownType,
    Query,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Rejection::Taken => "already used by another pipe",
            Rejection::WrongPipe => "cannot drive this pipe",
            Rejection::Primary => "primary plane",
            Rejection::Overlay => "overlay not allowed",
            Rejection::NoCompression => "no compressed layout",
            Rejection::UnknownType => "unknown plane type",
            Rejection::Query => "capability query failed",
        })
    }
}

/// whether `cap` may carry the cursor of the pipe at `pipe_index`
pub fn check(
    cap: &PlaneCapability,
    pipe_index: usize,
    taken: bool,
    flags: BindFlags,
) -> Result<Binding, Rejection> {
    if taken {
        return Err(Rejection::Taken);
    }
    if !cap.supports_pipe(pipe_index) {
        return Err(Rejection::WrongPipe);
    }
    match cap.kind {
        Some(PlaneType::Primary) => return Err(Rejection::Primary),
        Some(PlaneType::Overlay) if !flags.contains(BindFlags::ALLOW_OVERLAY) => {
            return Err(Rejection::Overlay)
        }
        Some(_) => {}
        None => return Err(Rejection::UnknownType),
    }
    if flags.contains(BindFlags::REQUIRE_COMPRESSED) && !cap.compressed {
        return Err(Rejection::NoCompression);
    }
    Ok(Binding { plane: cap.plane, compressed: cap.compressed })
}

/// one pass of the selection algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Preferred(plane::Handle),
    CursorType,
    Compressed,
    Any,
}

impl Pass {
    /// overlays are only reachable through the preferred hint and the backward scan
    pub fn flags(self) -> BindFlags {
        match self {
            Pass::Preferred(_) | Pass::Any => BindFlags::ALLOW_OVERLAY,
            Pass::CursorType => BindFlags::empty(),
            Pass::Compressed => BindFlags::REQUIRE_COMPRESSED,
        }
    }

    /// candidates of this pass, in scan order
    pub fn candidates(self, planes: &[plane::Handle]) -> Vec<plane::Handle> {
        match self {
            Pass::Preferred(plane) => planes.iter().copied().filter(|p| *p == plane).collect(),
            Pass::CursorType | Pass::Compressed => planes.to_vec(),
            Pass::Any => planes.iter().rev().copied().collect(),
        }
    }

    /// passes to try for a pipe, in priority order
    pub fn plan(preferred: Option<plane::Handle>, prefer_compressed: bool, allow_overlay: bool) -> Vec<Pass> {
        let mut passes = vec![];
        passes.extend(preferred.map(Pass::Preferred));
        passes.push(Pass::CursorType);
        if prefer_compressed {
            passes.push(Pass::Compressed);
        }
        if allow_overlay {
            passes.push(Pass::Any);
        }
        passes
    }

    /// only cursor type planes qualify in the dedicated pass
    pub fn accepts(self, cap: &PlaneCapability) -> bool {
        match self {
            Pass::CursorType => cap.kind == Some(PlaneType::Cursor),
            _ => true,
        }
    }
}
