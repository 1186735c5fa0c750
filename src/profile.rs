//! Profile and image messages exchanged with the surrounding pipeline

use crate::error::{ReconError, Result};
use ndarray::{Array2, ShapeBuilder};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// Position and orientation of the imaging plane
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub position: [f32; 3],
    pub quaternion: [f32; 4],
}

/// Readout header as delivered by the scanner
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AcquisitionHeader {
    pub scan_counter: u32,
    pub acquisition_time_stamp: u32,
    pub slice: u16,
    pub active_channels: u16,
    pub number_of_samples: u16,
    pub position: [f32; 3],
    pub quaternion: [f32; 4],
    pub patient_table_position: [f32; 3],
}

impl AcquisitionHeader {
    pub fn geometry(&self) -> Geometry {
        Geometry { position: self.position, quaternion: self.quaternion }
    }

    pub fn channels(&self) -> usize {
        self.active_channels as usize
    }

    pub fn samples(&self) -> usize {
        self.number_of_samples as usize
    }
}

/// One readout: header and complex samples travel together. The payload has shape
/// [channels, samples] in standard layout, so each channel is a contiguous row.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionProfile {
    pub header: AcquisitionHeader,
    data: Array2<Complex32>,
}

impl AcquisitionProfile {
    /// Builds a profile, checking the payload against the channel and sample counts in the header
    pub fn new(header: AcquisitionHeader, data: Array2<Complex32>) -> Result<Self> {
        let expected = (header.channels(), header.samples());
        if data.dim() != expected {
            return Err(ReconError::PayloadShape {
                scan_counter: header.scan_counter,
                reason: format!("payload is {:?}, header declares {:?}", data.dim(), expected),
            });
        }
        let data = if data.is_standard_layout() { data } else { data.as_standard_layout().into_owned() };
        Ok(Self { header, data })
    }

    /// profile with a channel-major flat payload
    pub fn from_vec(header: AcquisitionHeader, samples: Vec<Complex32>) -> Result<Self> {
        let shape = (header.channels(), header.samples());
        let data = Array2::from_shape_vec(shape, samples).map_err(|e| ReconError::PayloadShape {
            scan_counter: header.scan_counter,
            reason: e.to_string(),
        })?;
        Self::new(header, data)
    }

    pub fn data(&self) -> &Array2<Complex32> {
        &self.data
    }

    pub fn channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn samples(&self) -> usize {
        self.data.ncols()
    }

    /// Samples of one receive channel, or None if the channel does not exist
    pub fn channel(&self, channel: usize) -> Option<&[Complex32]> {
        if channel >= self.channels() {
            return None;
        }
        let n = self.samples();
        self.data.as_slice().map(|s| &s[channel * n..(channel + 1) * n])
    }

    pub fn into_parts(self) -> (AcquisitionHeader, Array2<Complex32>) {
        (self.header, self.data)
    }
}

/// Header of a reconstructed image
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageHeader {
    pub matrix_size: [u16; 3],
    pub channels: u16,
    pub slice: u16,
    pub acquisition_time_stamp: u32,
    pub position: [f32; 3],
    pub quaternion: [f32; 4],
    pub patient_table_position: [f32; 3],
    pub image_index: u32,
    pub image_series_index: u16,
}

impl ImageHeader {
    /// single channel image header carrying the geometry and timing of `anchor`
    pub fn from_anchor(anchor: &AcquisitionHeader, matrix_size: [u16; 2]) -> Self {
        Self {
            matrix_size: [matrix_size[0], matrix_size[1], 1],
            channels: 1,
            slice: anchor.slice,
            acquisition_time_stamp: anchor.acquisition_time_stamp,
            position: anchor.position,
            quaternion: anchor.quaternion,
            patient_table_position: anchor.patient_table_position,
            image_index: 0,
            image_series_index: 0,
        }
    }
}

/// Reconstructed image, pixels indexed (x, y)
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResult {
    pub header: ImageHeader,
    pub data: Array2<Complex32>,
}

impl ImageResult {
    pub fn zeros(header: ImageHeader) -> Self {
        let [nx, ny, _] = header.matrix_size;
        let data = Array2::zeros((nx as usize, ny as usize).f());
        Self { header, data }
    }
}

/// Everything a stage can send downstream
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// a profile for another slice, forwarded untouched
    Profile(AcquisitionProfile),
    Image(ImageResult),
}

impl StageOutput {
    pub fn as_image(&self) -> Option<&ImageResult> {
        match self {
            Self::Image(image) => Some(image),
            Self::Profile(_) => None,
        }
    }

    pub fn as_profile(&self) -> Option<&AcquisitionProfile> {
        match self {
            Self::Profile(profile) => Some(profile),
            Self::Image(_) => None,
        }
    }
}
