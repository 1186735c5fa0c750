//! Compute device selection and sample upload.
//!
//! Device memory primitives belong to the numerical backend; the stage only needs to
//! enumerate devices, pick one, learn its execution granularity (warp size) and move
//! staged samples onto it.

use crate::error::{CollaboratorError, CollaboratorResult, ReconError, Result};
use log::{debug, warn};
use ndarray::{Array2, ShapeBuilder};
use num_complex::Complex32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub name: String,
    /// native parallel execution granularity. Oversampled matrix dimensions are padded to a
    /// multiple of this.
    pub warp_size: usize,
}

pub trait ComputeDevice: Send {
    fn device_count(&self) -> CollaboratorResult<usize>;
    fn select(&mut self, index: usize) -> CollaboratorResult<()>;
    fn properties(&self, index: usize) -> CollaboratorResult<DeviceProperties>;
    /// Copies `host` samples to device memory as a (samples, channels) array, channel major
    fn upload(&self, host: &[Complex32], dim: (usize, usize)) -> CollaboratorResult<Array2<Complex32>>;
}

/// Selects the requested device, wrapping an out of range index modulo the device count.
/// Returns the selected index and its properties.
pub fn select_device(device: &mut dyn ComputeDevice, requested: usize) -> Result<(usize, DeviceProperties)> {
    let count = device.device_count().map_err(|e| ReconError::DeviceSelection {
        index: requested,
        reason: format!("unable to query number of devices: {e}"),
    })?;
    if count == 0 {
        return Err(ReconError::NoComputeDevice);
    }
    let index = if requested >= count {
        let adjusted = requested % count;
        warn!("adjusting device number from {requested} to {adjusted}");
        adjusted
    } else {
        requested
    };
    device
        .select(index)
        .map_err(|e| ReconError::DeviceSelection { index, reason: e.to_string() })?;
    let props = device
        .properties(index)
        .map_err(|e| ReconError::DeviceSelection { index, reason: e.to_string() })?;
    debug!("selected device {index} ({}), warp size {}", props.name, props.warp_size);
    Ok((index, props))
}

/// Oversampled matrix size with each dimension rounded up to a multiple of `warp_size`
pub fn oversampled_matrix(matrix_size: [usize; 2], oversampling: f64, warp_size: usize) -> [usize; 2] {
    let warp = warp_size.max(1) as f64;
    matrix_size.map(|n| (((n as f64 * oversampling) / warp).ceil() * warp) as usize)
}

/// Host resident "device". Uploads copy into an owned array.
#[derive(Debug, Clone)]
pub struct HostDevice {
    count: usize,
    warp_size: usize,
    selected: Option<usize>,
}

impl HostDevice {
    pub fn new(count: usize, warp_size: usize) -> Self {
        Self { count, warp_size, selected: None }
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new(1, 32)
    }
}

impl ComputeDevice for HostDevice {
    fn device_count(&self) -> CollaboratorResult<usize> {
        Ok(self.count)
    }

    fn select(&mut self, index: usize) -> CollaboratorResult<()> {
        if index >= self.count {
            return Err(CollaboratorError::new(format!("device {index} does not exist")));
        }
        self.selected = Some(index);
        Ok(())
    }

    fn properties(&self, index: usize) -> CollaboratorResult<DeviceProperties> {
        if index >= self.count {
            return Err(CollaboratorError::new(format!("device {index} does not exist")));
        }
        Ok(DeviceProperties { name: format!("host{index}"), warp_size: self.warp_size })
    }

    fn upload(&self, host: &[Complex32], dim: (usize, usize)) -> CollaboratorResult<Array2<Complex32>> {
        if self.selected.is_none() {
            return Err(CollaboratorError::new("no device selected"));
        }
        let n = dim.0 * dim.1;
        if host.len() < n {
            return Err(CollaboratorError::new(format!(
                "host buffer holds {} samples, {n} requested",
                host.len()
            )));
        }
        Array2::from_shape_vec(dim.f(), host[..n].to_vec()).map_err(|e| CollaboratorError::new(e.to_string()))
    }
}
