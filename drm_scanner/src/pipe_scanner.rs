use std::io;

use drm::control::{crtc, Device as ControlDevice};

/// Upper bound of pipes tracked for one device
pub const MAX_PIPES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeInfo {
    pub crtc: crtc::Handle,
    /// position in the device resource list, this is the bit used by plane pipe masks
    pub index: usize,
    /// active mode size, `None` when the pipe is not driving anything
    pub size: Option<(u32, u32)>,
}

#[derive(Debug, Default, Clone)]
pub struct PipeScanResult {
    pub pipes: Vec<PipeInfo>,
    /// number of crtcs the device reports, including the ones that failed to query
    pub resource_count: usize,
}

impl PipeScanResult {
    pub fn iter(&self) -> impl Iterator<Item = &PipeInfo> {
        self.pipes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PipeScanner;

impl PipeScanner {
    pub fn new() -> Self {
        Self
    }

    /// enumerate pipes in resource order, skipping the ones the kernel refuses to describe
    pub fn scan(&self, drm: &impl ControlDevice) -> io::Result<PipeScanResult> {
        let res_handle = drm.resource_handles()?;

        Ok(collect_pipes(res_handle.crtcs(), |crtc| {
            drm.get_crtc(crtc).ok().map(|info| mode_size(&info))
        }))
    }
}

/// keep at most [`MAX_PIPES`] of `crtcs` that `query` can describe, indices stay those of the resource list
pub fn collect_pipes(
    crtcs: &[crtc::Handle],
    mut query: impl FnMut(crtc::Handle) -> Option<Option<(u32, u32)>>,
) -> PipeScanResult {
    let pipes = crtcs
        .iter()
        .enumerate()
        .filter_map(|(index, crtc)| {
            let size = query(*crtc)?;
            Some(PipeInfo { crtc: *crtc, index, size })
        })
        .take(MAX_PIPES)
        .collect();

    PipeScanResult { pipes, resource_count: crtcs.len() }
}

/// current visible size of a pipe
pub fn pipe_size(drm: &impl ControlDevice, crtc: crtc::Handle) -> io::Result<Option<(u32, u32)>> {
    Ok(mode_size(&drm.get_crtc(crtc)?))
}

fn mode_size(info: &crtc::Info) -> Option<(u32, u32)> {
    let (w, h) = info.mode()?.size();
    (w != 0 && h != 0).then_some((w as u32, h as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use drm::control::from_u32;

    fn crtcs(count: u32) -> Vec<crtc::Handle> {
        (0..count).map(|n| from_u32(30 + n).unwrap()).collect()
    }

    #[test]
    fn at_most_eight_pipes_in_resource_order() {
        let crtcs = crtcs(10);
        let broken = [from_u32::<crtc::Handle>(31).unwrap()];

        let scan = collect_pipes(&crtcs, |crtc| (!broken.contains(&crtc)).then_some(Some((1920, 1080))));

        assert_eq!(scan.resource_count, 10);
        assert_eq!(scan.pipes.len(), MAX_PIPES);
        let indices: Vec<usize> = scan.iter().map(|pipe| pipe.index).collect();
        assert_eq!(indices, vec![0, 2, 3, 4, 5, 6, 7, 8]);
        assert!(scan.iter().all(|pipe| pipe.crtc == crtcs[pipe.index]));
    }

    #[test]
    fn failed_queries_are_skipped() {
        let crtcs = crtcs(3);

        let scan = collect_pipes(&crtcs, |crtc| match u32::from(crtc) {
            30 => None,
            31 => Some(None),
            _ => Some(Some((1280, 720))),
        });

        assert_eq!(scan.resource_count, 3);
        let pipes: Vec<(usize, Option<(u32, u32)>)> = scan.iter().map(|pipe| (pipe.index, pipe.size)).collect();
        assert_eq!(pipes, vec![(1, None), (2, Some((1280, 720)))]);
    }
}
