//! Capture sources turn an input stream (e.g. a television picture) into
//! the four ordered color sequences the analyzer maps onto devices.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{AtmoError, CapturedFrame, Color, Region, Result};

/// Captures and samples one frame per call. May block until input is
/// available.
pub trait CaptureSource: Send {
    fn capture(&mut self) -> Result<CapturedFrame>;
}

/// Opens a fresh [`CaptureSource`] each time an analyzer is started.
pub trait CaptureFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureSource>>;
}

/// Sampling settings for one screen area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Number of samples taken along the edge.
    pub count: usize,
    /// Thickness of the sampled strip in pixels.
    pub depth: u32,
    /// Outer pixels to ignore (letterbox bars etc.).
    pub crop: u32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            count: 0,
            depth: 20,
            crop: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfigs {
    pub top: RegionConfig,
    pub bottom: RegionConfig,
    pub left: RegionConfig,
    pub right: RegionConfig,
}

impl RegionConfigs {
    pub fn get(&self, region: Region) -> &RegionConfig {
        match region {
            Region::Top => &self.top,
            Region::Bottom => &self.bottom,
            Region::Left => &self.left,
            Region::Right => &self.right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    /// Packed rgb24 frames read from a file or FIFO.
    RawVideo,
}

/// Capture source description as found in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(rename = "type")]
    pub kind: CaptureKind,
    pub filename: PathBuf,
    pub width: u32,
    pub height: u32,
    #[serde(flatten)]
    pub regions: RegionConfigs,
}

impl CaptureFactory for CaptureConfig {
    fn open(&self) -> Result<Box<dyn CaptureSource>> {
        match self.kind {
            CaptureKind::RawVideo => Ok(Box::new(RawVideoCapture::new(self)?)),
        }
    }
}

/// One decoded picture in packed 8-bit RGB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RgbFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = frame_size(width, height);
        if pixels.len() != expected {
            return Err(AtmoError::capture(format!(
                "expected {expected} bytes for a {width}x{height} frame, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A frame filled with a single color.
    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        let pixels = [color.red, color.green, color.blue].repeat(frame_size(width, height) / 3);
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        Some(Color::new(
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
        ))
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[offset..offset + 3].copy_from_slice(&[color.red, color.green, color.blue]);
    }

    /// Mean color of the rectangle, clipped to the frame. Black if empty.
    pub fn mean(&self, x: u32, y: u32, width: u32, height: u32) -> Color {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        if x >= x_end || y >= y_end {
            return Color::BLACK;
        }

        let mut sums = [0u64; 3];
        for row in y..y_end {
            let start = (row as usize * self.width as usize + x as usize) * 3;
            let end = (row as usize * self.width as usize + x_end as usize) * 3;
            for pixel in self.pixels[start..end].chunks_exact(3) {
                for (sum, value) in sums.iter_mut().zip(pixel) {
                    *sum += u64::from(*value);
                }
            }
        }

        let count = u64::from(x_end - x) * u64::from(y_end - y);
        Color::new(
            (sums[0] / count) as u8,
            (sums[1] / count) as u8,
            (sums[2] / count) as u8,
        )
    }
}

fn frame_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Averages the configured edge strips of `frame`.
///
/// Top and bottom split the width between the left and right crop into
/// `count` slices; left and right split the height between the top and
/// bottom crop.
pub fn sample_regions(frame: &RgbFrame, regions: &RegionConfigs) -> CapturedFrame {
    let inner_width = frame
        .width
        .saturating_sub(regions.left.crop)
        .saturating_sub(regions.right.crop);
    let inner_height = frame
        .height
        .saturating_sub(regions.top.crop)
        .saturating_sub(regions.bottom.crop);

    let horizontal = |config: &RegionConfig, y: u32| -> Vec<Color> {
        if config.count == 0 {
            return Vec::new();
        }
        let span = inner_width as f32 / config.count as f32;
        (0..config.count)
            .map(|channel| {
                let x = regions.left.crop + (span * channel as f32) as u32;
                frame.mean(x, y, span as u32, config.depth)
            })
            .collect()
    };

    let vertical = |config: &RegionConfig, x: u32| -> Vec<Color> {
        if config.count == 0 {
            return Vec::new();
        }
        let span = inner_height as f32 / config.count as f32;
        (0..config.count)
            .map(|channel| {
                let y = regions.top.crop + (span * channel as f32) as u32;
                frame.mean(x, y, config.depth, span as u32)
            })
            .collect()
    };

    let bottom_y = frame
        .height
        .saturating_sub(regions.bottom.crop)
        .saturating_sub(regions.bottom.depth);
    let right_x = frame
        .width
        .saturating_sub(regions.right.crop)
        .saturating_sub(regions.right.depth);

    CapturedFrame {
        top: horizontal(&regions.top, regions.top.crop),
        bottom: horizontal(&regions.bottom, bottom_y),
        left: vertical(&regions.left, regions.left.crop),
        right: vertical(&regions.right, right_x),
    }
}

/// Reads packed rgb24 frames of a fixed size from a file or FIFO, e.g. the
/// output of a video grabber piped through an external converter.
///
/// The file is opened on the first capture. At end of stream the reader is
/// dropped and the next capture reopens the file, which waits for a new
/// writer on a FIFO and restarts a regular file from the beginning.
#[derive(Debug)]
pub struct RawVideoCapture {
    path: PathBuf,
    regions: RegionConfigs,
    reader: Option<BufReader<File>>,
    frame: RgbFrame,
}

impl RawVideoCapture {
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(AtmoError::config(format!(
                "capture frame size must not be empty, got {}x{}",
                config.width, config.height
            )));
        }
        Ok(Self {
            path: config.filename.clone(),
            regions: config.regions,
            reader: None,
            frame: RgbFrame::filled(config.width, config.height, Color::BLACK),
        })
    }

    fn reader(&mut self) -> Result<&mut BufReader<File>> {
        if self.reader.is_none() {
            let file = File::open(&self.path).map_err(|err| {
                AtmoError::capture(format!(
                    "could not open capture source '{}': {err}",
                    self.path.display()
                ))
            })?;
            tracing::debug!(path = %self.path.display(), "opened capture source");
            self.reader = Some(BufReader::new(file));
        }
        self.reader
            .as_mut()
            .ok_or_else(|| AtmoError::capture("capture source is not open"))
    }
}

impl CaptureSource for RawVideoCapture {
    fn capture(&mut self) -> Result<CapturedFrame> {
        let mut pixels = std::mem::take(&mut self.frame.pixels);
        let result = self.reader().and_then(|reader| {
            reader.read_exact(&mut pixels).map_err(|err| match err.kind() {
                io::ErrorKind::UnexpectedEof => AtmoError::capture("end of capture stream"),
                _ => AtmoError::Io(err),
            })
        });
        self.frame.pixels = pixels;

        if let Err(err) = result {
            self.reader = None;
            return Err(err);
        }
        Ok(sample_regions(&self.frame, &self.regions))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const RED: Color = Color::new(255, 0, 0);
    const BLUE: Color = Color::new(0, 0, 255);

    fn regions(count: usize, depth: u32) -> RegionConfigs {
        let config = RegionConfig {
            count,
            depth,
            crop: 0,
        };
        RegionConfigs {
            top: config,
            bottom: config,
            left: config,
            right: config,
        }
    }

    #[test]
    fn mean_averages_and_clips() {
        let mut frame = RgbFrame::filled(4, 2, Color::BLACK);
        frame.set_pixel(0, 0, Color::new(100, 0, 0));
        frame.set_pixel(1, 0, Color::new(200, 0, 0));

        assert_eq!(frame.mean(0, 0, 2, 1), Color::new(150, 0, 0));
        assert_eq!(frame.mean(0, 0, 2, 2), Color::new(75, 0, 0));
        assert_eq!(frame.mean(3, 1, 10, 10), Color::BLACK);
        assert_eq!(frame.mean(4, 0, 1, 1), Color::BLACK);
    }

    #[test]
    fn samples_each_edge() {
        let mut frame = RgbFrame::filled(8, 8, Color::BLACK);
        for x in 0..4 {
            frame.set_pixel(x, 0, RED);
        }
        for y in 4..8 {
            frame.set_pixel(7, y, BLUE);
        }

        let sampled = sample_regions(&frame, &regions(2, 1));

        assert_eq!(sampled.top, vec![RED, Color::BLACK]);
        // The bottom-right slice shares one pixel with the blue column.
        assert_eq!(sampled.bottom, vec![Color::BLACK, Color::new(0, 0, 63)]);
        assert_eq!(sampled.left, vec![Color::new(63, 0, 0), Color::BLACK]);
        assert_eq!(sampled.right, vec![Color::BLACK, BLUE]);
    }

    #[test]
    fn crop_skips_outer_pixels() {
        let mut frame = RgbFrame::filled(6, 6, Color::BLACK);
        for x in 0..6 {
            frame.set_pixel(x, 0, RED);
            frame.set_pixel(x, 1, BLUE);
        }
        let mut configs = regions(1, 1);
        configs.top.crop = 1;

        let sampled = sample_regions(&frame, &configs);
        assert_eq!(sampled.top, vec![BLUE]);
    }

    #[test]
    fn zero_count_regions_are_empty() {
        let frame = RgbFrame::filled(4, 4, RED);
        let sampled = sample_regions(&frame, &RegionConfigs::default());
        assert_eq!(sampled, CapturedFrame::default());
    }

    #[test]
    fn rejects_frames_with_wrong_size() {
        assert!(RgbFrame::new(2, 2, vec![0; 11]).is_err());
        assert!(RgbFrame::new(2, 2, vec![0; 12]).is_ok());
    }

    #[test]
    fn reads_frames_and_reopens_at_end_of_stream() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[255, 0, 0].repeat(4)).unwrap();
        file.flush().unwrap();

        let config = CaptureConfig {
            kind: CaptureKind::RawVideo,
            filename: file.path().to_path_buf(),
            width: 2,
            height: 2,
            regions: regions(1, 2),
        };
        let mut capture = config.open().unwrap();

        let first = capture.capture().unwrap();
        assert_eq!(first.top, vec![RED]);
        assert!(matches!(capture.capture(), Err(AtmoError::Capture(_))));
        let again = capture.capture().unwrap();
        assert_eq!(again.left, vec![RED]);
    }

    #[test]
    fn missing_source_reports_capture_error() {
        let config = CaptureConfig {
            kind: CaptureKind::RawVideo,
            filename: PathBuf::from("/nonexistent/atmolight.rgb"),
            width: 2,
            height: 2,
            regions: RegionConfigs::default(),
        };
        let mut capture = RawVideoCapture::new(&config).unwrap();
        assert!(matches!(capture.capture(), Err(AtmoError::Capture(_))));
    }

    #[test]
    fn empty_frame_size_is_a_configuration_error() {
        let config = CaptureConfig {
            kind: CaptureKind::RawVideo,
            filename: PathBuf::from("/tmp/unused.rgb"),
            width: 0,
            height: 2,
            regions: RegionConfigs::default(),
        };
        assert!(matches!(
            RawVideoCapture::new(&config),
            Err(AtmoError::Config(_))
        ));
    }
}
