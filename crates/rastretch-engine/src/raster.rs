//! Raster I/O seams.
//!
//! The engine never touches files. It reads windows from a
//! [`RasterSource`] and writes finished tiles to a [`RasterSink`];
//! adapters for concrete formats live outside this crate.
//! [`MemoryRaster`] implements both traits over in-memory bands and is
//! what the tests and the bench harness use.

use image::{ImageBuffer, Luma};

use crate::buffer::{BufferRegion, SharedBuffer};
use crate::mask::NoDataMask;
use crate::stats::{BandStatistics, StatisticsAccumulator};
use crate::tiler::segment_image;
use crate::types::{Dimensions, EngineError, RasterError, Tile};

/// One band of `f32` samples.
pub type BandImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Samples per strip when streaming a band for statistics.
const STATISTICS_STRIP_SAMPLES: usize = 1 << 20;

/// Read access to a multi-band raster.
pub trait RasterSource {
    /// Width and height shared by every band.
    fn dimensions(&self) -> Dimensions;

    /// Number of bands.
    fn band_count(&self) -> usize;

    /// The band's own no-data sentinel, if it has one.
    fn no_data(&self, band: usize) -> Option<f64>;

    /// Copy `window` of `band` into `buffer`, which must be exactly
    /// `window.height × window.width`.
    ///
    /// # Errors
    ///
    /// Returns a [`RasterError`] if the band or window is out of range,
    /// the buffer has the wrong shape, or the backend fails.
    fn read_window(
        &self,
        band: usize,
        window: Tile,
        buffer: &mut SharedBuffer,
    ) -> Result<(), RasterError>;

    /// Statistics over every sample of `band` that is neither NaN nor
    /// equal to one of `sentinels`.
    ///
    /// The default implementation streams the band in horizontal strips
    /// through [`read_window`](Self::read_window), so at most one strip
    /// is resident at a time. Returns `Ok(None)` if the band has no valid
    /// samples.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Allocation`] if a strip buffer cannot be
    /// allocated and [`EngineError::Raster`] if a read fails.
    fn band_statistics(
        &self,
        band: usize,
        sentinels: &[f32],
    ) -> Result<Option<BandStatistics>, EngineError> {
        let dims = self.dimensions();
        let strips = dims.pixel_count().div_ceil(STATISTICS_STRIP_SAMPLES).max(1);
        let mut accumulator = StatisticsAccumulator::default();
        for strip in segment_image(dims.width, dims.height, 1, strips)? {
            let mut buffer = SharedBuffer::create(strip.height, strip.width)?;
            self.read_window(band, strip, &mut buffer)?;
            NoDataMask::apply(buffer.as_mut_slice(), sentinels);
            accumulator.extend(buffer.as_slice());
            buffer.release();
        }
        Ok(accumulator.finish())
    }
}

/// Write access to a multi-band raster.
pub trait RasterSink {
    /// Copy `region` into `window` of `band`. The region's shape matches
    /// the window.
    ///
    /// # Errors
    ///
    /// Returns a [`RasterError`] if the band or window is out of range,
    /// the shapes disagree, or the backend fails.
    fn write_window(
        &mut self,
        band: usize,
        window: Tile,
        region: BufferRegion<'_>,
    ) -> Result<(), RasterError>;

    /// Record the no-data sentinel written to `band`.
    ///
    /// # Errors
    ///
    /// Returns a [`RasterError`] if the backend cannot store it.
    fn set_no_data(&mut self, band: usize, value: f64) -> Result<(), RasterError> {
        let _ = (band, value);
        Ok(())
    }
}

/// A raster held entirely in memory, one [`BandImage`] per band.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRaster {
    dimensions: Dimensions,
    bands: Vec<BandImage>,
    no_data: Vec<Option<f64>>,
}

impl MemoryRaster {
    /// Build a raster from equally sized bands.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::BandSize`] if a band differs in size from
    /// the first, and [`RasterError::Backend`] if there are no bands.
    pub fn from_bands(bands: Vec<BandImage>) -> Result<Self, RasterError> {
        let first = bands
            .first()
            .ok_or_else(|| RasterError::Backend("a raster needs at least one band".to_string()))?;
        let dimensions = image_dimensions(first);
        for (band, image) in bands.iter().enumerate() {
            let found = image_dimensions(image);
            if found != dimensions {
                return Err(RasterError::BandSize {
                    band,
                    expected: dimensions,
                    found,
                });
            }
        }
        let no_data = vec![None; bands.len()];
        Ok(Self {
            dimensions,
            bands,
            no_data,
        })
    }

    /// A zero-filled raster, typically used as a sink.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Backend`] if the dimensions do not fit the
    /// image backend or `band_count` is zero.
    pub fn blank(dimensions: Dimensions, band_count: usize) -> Result<Self, RasterError> {
        let width = u32::try_from(dimensions.width)
            .map_err(|_| RasterError::Backend(format!("width {} too large", dimensions.width)))?;
        let height = u32::try_from(dimensions.height)
            .map_err(|_| RasterError::Backend(format!("height {} too large", dimensions.height)))?;
        Self::from_bands(vec![BandImage::new(width, height); band_count])
    }

    /// A single-band raster from row-major samples.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Backend`] if `samples` does not hold
    /// `width × height` values or the dimensions do not fit the backend.
    pub fn from_samples(
        dimensions: Dimensions,
        samples: Vec<f32>,
    ) -> Result<Self, RasterError> {
        let (Ok(width), Ok(height)) = (
            u32::try_from(dimensions.width),
            u32::try_from(dimensions.height),
        ) else {
            return Err(RasterError::Backend(format!(
                "{}x{} does not fit the image backend",
                dimensions.width, dimensions.height
            )));
        };
        let len = samples.len();
        let image = BandImage::from_raw(width, height, samples).ok_or_else(|| {
            RasterError::Backend(format!(
                "{len} samples do not fill a {}x{} band",
                dimensions.width, dimensions.height
            ))
        })?;
        Self::from_bands(vec![image])
    }

    /// Set the band's own no-data sentinel.
    #[must_use]
    pub fn with_no_data(mut self, band: usize, value: f64) -> Self {
        if let Some(slot) = self.no_data.get_mut(band) {
            *slot = Some(value);
        }
        self
    }

    /// Borrow a band.
    #[must_use]
    pub fn band(&self, band: usize) -> Option<&BandImage> {
        self.bands.get(band)
    }

    /// A band's samples, row-major.
    #[must_use]
    pub fn samples(&self, band: usize) -> Option<&[f32]> {
        self.bands.get(band).map(|image| image.as_raw().as_slice())
    }

    fn check_window(&self, band: usize, window: Tile) -> Result<(), RasterError> {
        if band >= self.bands.len() {
            return Err(RasterError::BandOutOfRange {
                band,
                band_count: self.bands.len(),
            });
        }
        if !window.fits_within(self.dimensions) {
            return Err(RasterError::OutOfBounds {
                tile: window,
                width: self.dimensions.width,
                height: self.dimensions.height,
            });
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn image_dimensions(image: &BandImage) -> Dimensions {
    Dimensions::new(image.width() as usize, image.height() as usize)
}

impl RasterSource for MemoryRaster {
    fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn no_data(&self, band: usize) -> Option<f64> {
        self.no_data.get(band).copied().flatten()
    }

    fn read_window(
        &self,
        band: usize,
        window: Tile,
        buffer: &mut SharedBuffer,
    ) -> Result<(), RasterError> {
        self.check_window(band, window)?;
        if buffer.rows() != window.height || buffer.cols() != window.width {
            return Err(RasterError::ShapeMismatch {
                tile: window,
                rows: buffer.rows(),
                cols: buffer.cols(),
            });
        }
        let source = self.bands[band].as_raw();
        let stride = self.dimensions.width;
        for (i, row) in (window.y_start..window.y_end()).enumerate() {
            let start = row * stride + window.x_start;
            if let Some(dest) = buffer.row_mut(i) {
                dest.copy_from_slice(&source[start..start + window.width]);
            }
        }
        Ok(())
    }
}

impl RasterSink for MemoryRaster {
    fn write_window(
        &mut self,
        band: usize,
        window: Tile,
        region: BufferRegion<'_>,
    ) -> Result<(), RasterError> {
        self.check_window(band, window)?;
        if region.height() != window.height || region.width() != window.width {
            return Err(RasterError::ShapeMismatch {
                tile: window,
                rows: region.height(),
                cols: region.width(),
            });
        }
        let stride = self.dimensions.width;
        let dest: &mut [f32] = &mut self.bands[band];
        for (row, samples) in (window.y_start..window.y_end()).zip(region.rows()) {
            let start = row * stride + window.x_start;
            dest[start..start + window.width].copy_from_slice(samples);
        }
        Ok(())
    }

    fn set_no_data(&mut self, band: usize, value: f64) -> Result<(), RasterError> {
        let band_count = self.no_data.len();
        let slot = self
            .no_data
            .get_mut(band)
            .ok_or(RasterError::BandOutOfRange { band, band_count })?;
        *slot = Some(value);
        Ok(())
    }
}
