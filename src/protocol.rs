//! cursor requests exchanged between hook callers and pipe workers

use drm::control::framebuffer;

/// one cursor image at one position
///
/// `fb` is only ever filled by the worker that owns the pipe, a request
/// written by a caller always carries `None`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
    pub fb: Option<framebuffer::Handle>,
    /// caller buffer handle, 0 hides the cursor
    pub handle: u32,
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
    /// shift of the image inside its buffer when the cursor crosses an edge
    pub off_x: i32,
    pub off_y: i32,
    /// the image changed, not only the position
    pub reload: bool,
}

impl CursorState {
    /// new image, the position of the request is kept
    pub fn load(&mut self, handle: u32, width: u32, height: u32) {
        self.fb = None;
        self.handle = handle;
        self.width = width;
        self.height = height;
        self.reload = true;
    }

    /// new position, an image change still pending is kept
    pub fn place(&mut self, (x, y): (i32, i32), (off_x, off_y): (i32, i32)) {
        self.fb = None;
        self.x = x;
        self.y = y;
        self.off_x = off_x;
        self.off_y = off_y;
    }

    pub fn same_offset(&self, other: &CursorState) -> bool {
        self.off_x == other.off_x && self.off_y == other.off_y
    }

    /// commits of both states would put the same framebuffer at the same place
    pub fn same_commit(&self, other: &CursorState) -> bool {
        self.fb == other.fb && self.x == other.x && self.y == other.y
    }
}

/// position and edge offset of a cursor of `cursor` size at `pos` on a pipe of `pipe` size
///
/// whatever does not fit between 0 and `pipe - cursor` becomes the offset
pub fn clamp(pos: (i32, i32), cursor: (u32, u32), pipe: (u32, u32)) -> ((i32, i32), (i32, i32)) {
    let (x, off_x) = clamp_axis(pos.0, cursor.0, pipe.0);
    let (y, off_y) = clamp_axis(pos.1, cursor.1, pipe.1);
    ((x, y), (off_x, off_y))
}

fn clamp_axis(pos: i32, cursor: u32, pipe: u32) -> (i32, i32) {
    let limit = pipe.saturating_sub(cursor).min(i32::MAX as u32) as i32;
    if pos < 0 {
        (0, pos)
    } else if pos > limit {
        (limit, pos - limit)
    } else {
        (pos, 0)
    }
}
