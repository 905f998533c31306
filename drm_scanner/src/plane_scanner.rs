use std::io;

use drm::control::{
    crtc, plane, property, Device as ControlDevice, PlaneType, ResourceHandle, ResourceHandles,
};

use crate::in_formats::InFormats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneInfo {
    pub handle: plane::Handle,
    /// `None` when the plane has no readable `type` property
    pub kind: Option<PlaneType>,
    /// bit `n` set when the plane can drive the `n`th crtc of the resource list
    pub possible_pipes: u32,
}

#[derive(Debug, Default)]
pub struct PlaneScanner;

impl PlaneScanner {
    pub fn new() -> Self {
        Self
    }

    /// every plane the device exposes, universal planes included once the client cap is set
    pub fn scan(&self, drm: &impl ControlDevice) -> io::Result<Vec<plane::Handle>> {
        drm.plane_handles()
    }

    pub fn info(
        &self,
        drm: &impl ControlDevice,
        resources: &ResourceHandles,
        handle: plane::Handle,
    ) -> io::Result<PlaneInfo> {
        let plane = drm.get_plane(handle)?;
        let possible = resources.filter_crtcs(plane.possible_crtcs());

        Ok(PlaneInfo {
            handle,
            kind: plane_type(drm, handle)?,
            possible_pipes: pipe_mask(resources.crtcs(), &possible),
        })
    }
}

fn pipe_mask(all: &[crtc::Handle], possible: &[crtc::Handle]) -> u32 {
    all.iter()
        .take(32)
        .enumerate()
        .filter(|(_, crtc)| possible.contains(crtc))
        .fold(0, |mask, (index, _)| mask | (1 << index))
}

/// look a property of an object up by name
pub fn find_property<T: ResourceHandle>(
    drm: &impl ControlDevice,
    handle: T,
    name: &str,
) -> io::Result<Option<(property::Info, property::RawValue)>> {
    let props = drm.get_properties(handle)?;

    Ok(props
        .into_iter()
        .filter_map(|(prop, value)| {
            let info = drm.get_property(prop).ok()?;
            Some((info, value))
        })
        .find(|(info, _)| info.name().to_str() == Ok(name)))
}

pub fn plane_type(drm: &impl ControlDevice, handle: plane::Handle) -> io::Result<Option<PlaneType>> {
    let Some((_, value)) = find_property(drm, handle, "type")? else {
        return Ok(None);
    };

    Ok(match value {
        v if v == PlaneType::Primary as u64 => Some(PlaneType::Primary),
        v if v == PlaneType::Overlay as u64 => Some(PlaneType::Overlay),
        v if v == PlaneType::Cursor as u64 => Some(PlaneType::Cursor),
        _ => None,
    })
}

/// parsed `IN_FORMATS`, `None` when the plane does not expose it
pub fn in_formats(drm: &impl ControlDevice, handle: plane::Handle) -> io::Result<Option<InFormats>> {
    let Some((info, value)) = find_property(drm, handle, "IN_FORMATS")? else {
        return Ok(None);
    };
    let Some(blob) = info.value_type().convert_value(value).as_blob() else {
        return Ok(None);
    };

    let data = drm.get_property_blob(blob)?;
    Ok(Some(InFormats::parse(&data)?))
}

/// upper bound of a range property, `None` for non-range properties
pub fn range_max(info: &property::Info) -> Option<u64> {
    match info.value_type() {
        property::ValueType::UnsignedRange(_, max) => Some(max),
        property::ValueType::SignedRange(_, max) => Some(max as u64),
        _ => None,
    }
}

/// raise a range property to its maximum, returns the written value when the property exists
pub fn set_property_max<T: ResourceHandle>(
    drm: &impl ControlDevice,
    handle: T,
    name: &str,
) -> io::Result<Option<u64>> {
    let Some((info, _)) = find_property(drm, handle, name)? else {
        return Ok(None);
    };
    let Some(max) = range_max(&info) else {
        return Ok(None);
    };

    drm.set_property(handle, info.handle(), max)?;
    Ok(Some(max))
}
