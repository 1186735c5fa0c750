use crate::error::{ReconError, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// When density compensation weights are recomputed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DcwPolicy {
    /// recompute for every frame (the behaviour of the deployed stage)
    #[default]
    EveryFrame,
    /// compute once and reuse until the geometry or the frame layout changes
    PerGeometry,
}

/// Per-stage reconstruction parameters. These are the static values a stage is created
/// with; only `profiles_per_frame` may change while the stage runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageParameters {
    /// slice this stage reconstructs
    pub slice: u16,
    /// requested compute device. Wrapped modulo the device count.
    pub device: usize,
    pub profiles_per_frame: usize,
    /// profiles kept from one frame to seed the next
    pub shared_profiles: usize,
    pub number_of_iterations: usize,
    /// conjugate gradient termination tolerance
    pub cg_limit: f64,
    pub oversampling: f64,
    pub kernel_width: f64,
    /// regularization weight
    pub kappa: f64,
    /// forward profiles of other slices downstream instead of dropping them
    pub pass_on_undesired_data: bool,
    pub image_series: u16,
    pub dcw_policy: DcwPolicy,
}

impl Default for StageParameters {
    fn default() -> Self {
        Self {
            slice: 0,
            device: 0,
            profiles_per_frame: 32,
            shared_profiles: 0,
            number_of_iterations: 5,
            cg_limit: 1e-6,
            oversampling: 1.25,
            kernel_width: 5.5,
            kappa: 0.1,
            pass_on_undesired_data: true,
            image_series: 0,
            dcw_policy: DcwPolicy::EveryFrame,
        }
    }
}

impl StageParameters {
    /// Enforces `shared_profiles <= profiles_per_frame - 1`, warning when a value is adjusted.
    /// Returns true if the parameters were changed.
    pub fn clamp_shared_profiles(&mut self) -> bool {
        let max_shared = self.profiles_per_frame.saturating_sub(1);
        if self.shared_profiles > max_shared {
            warn!(
                "shared_profiles ({}) exceeds profiles_per_frame-1, clamping to {}",
                self.shared_profiles, max_shared
            );
            self.shared_profiles = max_shared;
            true
        } else {
            false
        }
    }

    /// profiles removed from the window after each frame
    pub fn profiles_to_drain(&self) -> usize {
        self.profiles_per_frame - self.shared_profiles
    }

    pub fn validate(&self) -> Result<()> {
        if self.profiles_per_frame == 0 {
            return Err(invalid("profiles_per_frame", "must be at least 1"));
        }
        if self.number_of_iterations == 0 {
            return Err(invalid("number_of_iterations", "must be at least 1"));
        }
        if !(self.oversampling >= 1.0) {
            return Err(invalid("oversampling", "must be at least 1"));
        }
        if !(self.kernel_width > 0.0) {
            return Err(invalid("kernel_width", "must be positive"));
        }
        if !(self.kappa >= 0.0) {
            return Err(invalid("kappa", "must be non-negative"));
        }
        if !(self.cg_limit > 0.0) {
            return Err(invalid("cg_limit", "must be positive"));
        }
        Ok(())
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut toml_str = String::new();
        File::open(path)?.read_to_string(&mut toml_str)?;
        Ok(toml::from_str(&toml_str)?)
    }

    pub fn to_toml_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut toml_string = toml::to_string(self)?;
        toml_string.push('\n');
        File::create(path)?.write_all(toml_string.as_bytes())?;
        Ok(())
    }
}

fn invalid(parameter: &str, reason: &str) -> ReconError {
    ReconError::InvalidParameter { parameter: parameter.to_string(), reason: reason.to_string() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSize {
    pub x: usize,
    pub y: usize,
    #[serde(default = "one")]
    pub z: usize,
}

fn one() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingSpace {
    pub encoded_space: MatrixSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recon_space: Option<MatrixSize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AcquisitionSystemInformation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_channels: Option<usize>,
}

/// Stream-start metadata sent once ahead of the first profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamHeader {
    pub encoding: Vec<EncodingSpace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition_system_information: Option<AcquisitionSystemInformation>,
}

impl StreamHeader {
    /// a single encoding space header
    pub fn new(matrix_size: [usize; 2], receiver_channels: Option<usize>) -> Self {
        Self {
            encoding: vec![EncodingSpace {
                encoded_space: MatrixSize { x: matrix_size[0], y: matrix_size[1], z: 1 },
                recon_space: None,
            }],
            acquisition_system_information: Some(AcquisitionSystemInformation { receiver_channels }),
        }
    }

    /// The single encoding space this stage supports
    pub fn encoding_space(&self) -> Result<&EncodingSpace> {
        match self.encoding.as_slice() {
            [space] => Ok(space),
            spaces => Err(ReconError::EncodingSpaces { found: spaces.len() }),
        }
    }

    /// receiver channels, defaulting to 1 when the header does not say
    pub fn receiver_channels(&self) -> usize {
        self.acquisition_system_information
            .as_ref()
            .and_then(|info| info.receiver_channels)
            .unwrap_or(1)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let f = File::open(path)?;
        Ok(serde_json::from_reader(f)?)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let f = File::create(path)?;
        serde_json::to_writer_pretty(f, self)?;
        Ok(())
    }
}
