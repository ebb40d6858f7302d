//! CUDA device identification

use crate::error::{Error, Result};
use crate::runtime::Device;

/// One NVIDIA GPU, by ordinal
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CudaDevice {
    /// Index of the GPU device (0, 1, 2, ...)
    pub(crate) index: usize,
}

impl CudaDevice {
    /// Create a new CUDA device
    pub fn new(index: usize) -> Self {
        Self { index }
    }

    /// Get the compute capability of this CUDA device
    ///
    /// Returns (major, minor) version numbers (e.g., (8, 6) for sm_86)
    pub fn compute_capability(&self) -> Result<(u32, u32)> {
        use cudarc::driver::sys::CUdevice_attribute::{
            CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR, CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR,
        };

        let major = self.attribute(CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)?;
        let minor = self.attribute(CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)?;
        Ok((major as u32, minor as u32))
    }

    /// Largest grid extent on the y and z axes.
    pub fn max_grid_extent(&self) -> Result<u32> {
        use cudarc::driver::sys::CUdevice_attribute::{
            CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Y, CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Z,
        };

        let y = self.attribute(CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Y)?;
        let z = self.attribute(CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Z)?;
        Ok(y.min(z).max(1) as u32)
    }

    fn attribute(&self, attribute: cudarc::driver::sys::CUdevice_attribute) -> Result<i32> {
        let device = cudarc::driver::result::device::get(self.index as i32).map_err(|e| {
            Error::backend("cuDeviceGet", format!("device {}: {:?}", self.index, e))
        })?;
        // SAFETY: `device` is a valid handle returned by cuDeviceGet.
        unsafe { cudarc::driver::result::device::get_attribute(device, attribute) }
            .map_err(|e| Error::backend("cuDeviceGetAttribute", format!("{attribute:?}: {e:?}")))
    }
}

impl Device for CudaDevice {
    fn id(&self) -> usize {
        self.index
    }

    fn name(&self) -> String {
        format!("cuda:{}", self.index)
    }
}

impl Default for CudaDevice {
    fn default() -> Self {
        Self::new(0)
    }
}
