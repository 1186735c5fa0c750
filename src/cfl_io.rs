//! Recorded streams and reconstructed images on disk.
//!
//! Arrays are stored as cfl/hdr pairs: a text header listing the dimensions and raw little
//! endian complex float data in column major order. A recorded stream is a directory with
//! the stream header in `header.json` and one `profile_NNNNN` stem per profile, the
//! acquisition header as json next to a `[samples, channels]` cfl payload.

use crate::error::{ReconError, Result};
use crate::params::StreamHeader;
use crate::profile::{AcquisitionHeader, AcquisitionProfile, ImageHeader, ImageResult, StageOutput};
use byteorder::{ByteOrder, LittleEndian};
use crossbeam_channel::Receiver;
use log::{debug, info};
use ndarray::{Array2, ShapeBuilder};
use num_complex::Complex32;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

fn invalid_data(msg: String) -> ReconError {
    ReconError::Io(io::Error::new(io::ErrorKind::InvalidData, msg))
}

/// Writes `data` with shape `dims` to `stem.hdr` and `stem.cfl`
pub fn write_cfl(stem: impl AsRef<Path>, data: &[Complex32], dims: &[usize]) -> Result<()> {
    let stem = stem.as_ref();
    let n: usize = dims.iter().product();
    if n != data.len() {
        return Err(invalid_data(format!("{} values for dims {dims:?}", data.len())));
    }
    let dim_line = dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(" ");
    File::create(stem.with_extension("hdr"))?.write_all(format!("# Dimensions\n{dim_line}\n").as_bytes())?;

    let floats: Vec<f32> = data.iter().flat_map(|c| [c.re, c.im]).collect();
    let mut bytes = vec![0u8; floats.len() * std::mem::size_of::<f32>()];
    LittleEndian::write_f32_into(&floats, &mut bytes);
    File::create(stem.with_extension("cfl"))?.write_all(&bytes)?;
    Ok(())
}

/// Reads the dimensions and values written by [write_cfl]
pub fn read_cfl(stem: impl AsRef<Path>) -> Result<(Vec<usize>, Vec<Complex32>)> {
    let stem = stem.as_ref();
    let mut hdr = String::new();
    File::open(stem.with_extension("hdr"))?.read_to_string(&mut hdr)?;
    let dim_line = hdr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .ok_or_else(|| invalid_data(format!("{} has no dimensions", stem.display())))?;
    let dims = dim_line
        .split_ascii_whitespace()
        .map(|d| d.parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| invalid_data(format!("bad dimension in {}: {e}", stem.display())))?;

    let mut bytes = Vec::new();
    File::open(stem.with_extension("cfl"))?.read_to_end(&mut bytes)?;
    let n: usize = dims.iter().product();
    if bytes.len() != n * std::mem::size_of::<Complex32>() {
        return Err(invalid_data(format!(
            "{} holds {} bytes, dims {dims:?} need {}",
            stem.display(),
            bytes.len(),
            n * std::mem::size_of::<Complex32>()
        )));
    }
    let mut floats = vec![0f32; 2 * n];
    LittleEndian::read_f32_into(&bytes, &mut floats);
    let values = floats.chunks_exact(2).map(|p| Complex32::new(p[0], p[1])).collect();
    Ok((dims, values))
}

/// Reads a 2D cfl, trailing singleton dimensions allowed
pub fn read_cfl_array2(stem: impl AsRef<Path>) -> Result<Array2<Complex32>> {
    let (dims, values) = read_cfl(&stem)?;
    let (nx, ny) = match dims.as_slice() {
        [nx] => (*nx, 1),
        [nx, ny, rest @ ..] if rest.iter().all(|&d| d == 1) => (*nx, *ny),
        _ => return Err(invalid_data(format!("{dims:?} is not two dimensional"))),
    };
    Array2::from_shape_vec((nx, ny).f(), values).map_err(|e| invalid_data(e.to_string()))
}

pub fn write_cfl_array2(stem: impl AsRef<Path>, array: &Array2<Complex32>) -> Result<()> {
    let (nx, ny) = array.dim();
    let values: Vec<Complex32> = array.t().iter().cloned().collect();
    write_cfl(stem, &values, &[nx, ny])
}

/// A directory of recorded profiles that can be replayed through a stage
#[derive(Debug, Clone)]
pub struct RecordedStream {
    dir: PathBuf,
}

impl RecordedStream {
    const HEADER: &'static str = "header.json";

    /// Creates the directory if needed and writes the stream header
    pub fn create(dir: impl AsRef<Path>, header: &StreamHeader) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        header.to_json_file(dir.join(Self::HEADER))?;
        Ok(Self { dir })
    }

    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.join(Self::HEADER).is_file() {
            return Err(invalid_data(format!("{} has no {}", dir.display(), Self::HEADER)));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn header(&self) -> Result<StreamHeader> {
        StreamHeader::from_json_file(self.dir.join(Self::HEADER))
    }

    pub fn write_profile(&self, index: usize, profile: &AcquisitionProfile) -> Result<()> {
        let stem = self.dir.join(format!("profile_{index:05}"));
        let f = File::create(stem.with_extension("json"))?;
        serde_json::to_writer(f, &profile.header)?;
        let data = profile
            .data()
            .as_slice()
            .ok_or_else(|| invalid_data("profile payload is not contiguous".to_string()))?;
        write_cfl(&stem, data, &[profile.samples(), profile.channels()])
    }

    /// Profile stems in recording order
    pub fn profile_stems(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.dir.join("profile_*.json");
        let mut stems = glob::glob(&pattern.to_string_lossy())?
            .map(|entry| entry.map(|p| p.with_extension("")).map_err(|e| ReconError::Io(e.into_error())))
            .collect::<Result<Vec<_>>>()?;
        stems.sort();
        debug!("found {} recorded profiles in {}", stems.len(), self.dir.display());
        Ok(stems)
    }

    pub fn read_profile(stem: impl AsRef<Path>) -> Result<AcquisitionProfile> {
        let stem = stem.as_ref();
        let header: AcquisitionHeader = serde_json::from_reader(File::open(stem.with_extension("json"))?)?;
        let (dims, values) = read_cfl(stem)?;
        if dims != [header.samples(), header.channels()] {
            return Err(ReconError::PayloadShape {
                scan_counter: header.scan_counter,
                reason: format!("recorded payload is {dims:?}"),
            });
        }
        AcquisitionProfile::from_vec(header, values)
    }

    /// Reads the recorded profiles lazily, in order
    pub fn profiles(&self) -> Result<impl Iterator<Item = Result<AcquisitionProfile>>> {
        Ok(self.profile_stems()?.into_iter().map(Self::read_profile))
    }
}

/// Writes an image as `image_SSS_IIIII.{json,hdr,cfl}` in `dir`, returning the stem
pub fn write_image(dir: impl AsRef<Path>, image: &ImageResult) -> Result<PathBuf> {
    let stem = dir
        .as_ref()
        .join(format!("image_{:03}_{:05}", image.header.image_series_index, image.header.image_index));
    serde_json::to_writer_pretty(File::create(stem.with_extension("json"))?, &image.header)?;
    write_cfl_array2(&stem, &image.data)?;
    Ok(stem)
}

pub fn read_image(stem: impl AsRef<Path>) -> Result<ImageResult> {
    let stem = stem.as_ref();
    let header: ImageHeader = serde_json::from_reader(File::open(stem.with_extension("json"))?)?;
    let data = read_cfl_array2(stem)?;
    Ok(ImageResult { header, data })
}

/// Writes the images arriving on a stage's output queue from a background thread.
/// Forwarded profiles are skipped.
pub struct ImageWriter {
    worker: JoinHandle<Result<usize>>,
}

impl ImageWriter {
    pub fn spawn(dir: impl AsRef<Path>, outputs: Receiver<StageOutput>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let worker = thread::Builder::new().name("image-writer".to_string()).spawn(move || {
            let mut written = 0;
            for output in outputs {
                if let StageOutput::Image(image) = output {
                    let stem = write_image(&dir, &image)?;
                    info!("wrote {}", stem.display());
                    written += 1;
                }
            }
            Ok(written)
        })?;
        Ok(Self { worker })
    }

    /// Waits for every sender of the queue to close and everything queued to be written.
    /// Returns the number of images written.
    pub fn finish(self) -> Result<usize> {
        self.worker.join().map_err(|_| ReconError::Disconnected)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(scan_counter: u32) -> AcquisitionProfile {
        let header = AcquisitionHeader {
            scan_counter,
            active_channels: 2,
            number_of_samples: 3,
            position: [0., 0., 1.5],
            ..Default::default()
        };
        let data = Array2::from_shape_fn((2, 3), |(c, s)| Complex32::new(s as f32, c as f32 + scan_counter as f32));
        AcquisitionProfile::new(header, data).unwrap()
    }

    #[test]
    fn cfl_layout_is_column_major() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("a");
        let a = Array2::from_shape_fn((2, 3), |(x, y)| Complex32::new(x as f32, y as f32));
        write_cfl_array2(&stem, &a).unwrap();
        let (dims, values) = read_cfl(&stem).unwrap();
        assert_eq!(dims, vec![2, 3]);
        assert_eq!(values[1], Complex32::new(1., 0.));
        assert_eq!(values[2], Complex32::new(0., 1.));
        assert_eq!(read_cfl_array2(&stem).unwrap(), a);
        assert_eq!(fs::read(stem.with_extension("cfl")).unwrap().len(), 6 * 8);
    }

    #[test]
    fn truncated_cfl_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("b");
        write_cfl(&stem, &[Complex32::ONE; 4], &[4]).unwrap();
        fs::write(stem.with_extension("cfl"), [0u8; 12]).unwrap();
        assert!(read_cfl(&stem).is_err());
        assert!(write_cfl(&stem, &[Complex32::ONE; 3], &[4]).is_err());
    }

    #[test]
    fn recorded_stream_replays_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let header = StreamHeader::new([16, 16], Some(2));
        let stream = RecordedStream::create(dir.path().join("rec"), &header).unwrap();
        for i in (0..12).rev() {
            stream.write_profile(i, &profile(i as u32)).unwrap();
        }
        let reopened = RecordedStream::open(stream.dir()).unwrap();
        assert_eq!(reopened.header().unwrap(), header);
        let profiles = reopened.profiles().unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(profiles.len(), 12);
        assert_eq!(profiles[7], profile(7));
        assert!(profiles.windows(2).all(|w| w[0].header.scan_counter < w[1].header.scan_counter));
    }

    #[test]
    fn open_requires_header() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RecordedStream::open(dir.path()).is_err());
    }

    #[test]
    fn image_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let header = ImageHeader { matrix_size: [4, 2, 1], image_index: 3, image_series_index: 1, ..Default::default() };
        let mut image = ImageResult::zeros(header);
        image.data[[3, 1]] = Complex32::new(2., -1.);
        let stem = write_image(dir.path(), &image).unwrap();
        assert!(stem.ends_with("image_001_00003"));
        assert_eq!(read_image(&stem).unwrap(), image);
    }

    #[test]
    fn writer_drains_queue_before_finishing() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        for index in 1..=3 {
            let header = ImageHeader { matrix_size: [2, 2, 1], image_index: index, ..Default::default() };
            tx.send(StageOutput::Image(ImageResult::zeros(header))).unwrap();
        }
        tx.send(StageOutput::Profile(profile(0))).unwrap();
        let writer = ImageWriter::spawn(dir.path().join("images"), rx).unwrap();
        drop(tx);
        assert_eq!(writer.finish().unwrap(), 3);
        assert!(read_image(dir.path().join("images").join("image_000_00003")).is_ok());
    }
}
