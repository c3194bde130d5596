//! Detector read-out regions.
//!
//! A [`DetectorRoi`] is a rectangular sub-window of the sensor that is read
//! out and calibrated independently. [`DetectorRegions`] is the set of
//! regions configured for one session, ordered by region id; when regions are
//! active the instrument returns the concatenated read-out of all enabled
//! regions instead of a full-detector frame, so the total pixel count may
//! legitimately differ from the sensor's native width.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SpectroError};

/// One rectangular read-out window on the sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorRoi {
    pub region: u8,
    pub y0: u16,
    pub y1: u16,
    pub x0: u16,
    pub x1: u16,
    pub enabled: bool,
}

impl DetectorRoi {
    /// Build a region, rejecting degenerate bounds up front.
    pub fn new(region: u8, y0: u16, y1: u16, x0: u16, x1: u16) -> Result<Self> {
        if y0 >= y1 || x0 >= x1 {
            return Err(SpectroError::Configuration(format!(
                "degenerate region {region}: rows {y0}..{y1}, cols {x0}..{x1}"
            )));
        }
        Ok(Self {
            region,
            y0,
            y1,
            x0,
            x1,
            enabled: true,
        })
    }

    /// Whether the window fits inside a sensor of the given dimensions.
    pub fn fits(&self, rows: u16, cols: u16) -> bool {
        self.y1 <= rows && self.x1 <= cols
    }

    /// Pixels contributed to the read-out.
    pub fn width(&self) -> usize {
        usize::from(self.x1 - self.x0)
    }

    pub fn height(&self) -> usize {
        usize::from(self.y1 - self.y0)
    }
}

impl fmt::Display for DetectorRoi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "region {} rows {}..{} cols {}..{}{}",
            self.region,
            self.y0,
            self.y1,
            self.x0,
            self.x1,
            if self.enabled { "" } else { " (disabled)" }
        )
    }
}

/// All regions configured for one session, keyed and ordered by region id.
///
/// The order of [`DetectorRegions::region_list`] is guaranteed to match the
/// order of sub-spectra produced by [`DetectorRegions::split`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorRegions {
    regions: BTreeMap<u8, DetectorRoi>,
}

impl DetectorRegions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region, replacing any previous window with the same id.
    pub fn add(&mut self, roi: DetectorRoi) {
        self.regions.insert(roi.region, roi);
    }

    pub fn remove(&mut self, region: u8) -> Option<DetectorRoi> {
        self.regions.remove(&region)
    }

    pub fn count(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, region: u8) -> Option<&DetectorRoi> {
        self.regions.get(&region)
    }

    /// Regions in ascending id order, matching the read-out order.
    pub fn region_list(&self) -> impl Iterator<Item = &DetectorRoi> {
        self.regions.values()
    }

    /// Sum of widths of enabled regions; the expected frame length.
    pub fn total_pixels(&self) -> usize {
        self.regions
            .values()
            .filter(|roi| roi.enabled)
            .map(DetectorRoi::width)
            .sum()
    }

    /// Split a concatenated frame into its per-region sub-spectra.
    ///
    /// Every sample belongs to exactly one region; a frame shorter than the
    /// configured total is an error, never a silent truncation. Disabled
    /// regions are skipped.
    pub fn split(&self, frame: &[f64]) -> Result<Vec<Vec<f64>>> {
        let mut subspectra = Vec::with_capacity(self.regions.len());
        let mut start = 0;
        for roi in self.regions.values().filter(|roi| roi.enabled) {
            let end = start + roi.width();
            if end > frame.len() {
                return Err(SpectroError::FrameTooShort {
                    expected: self.total_pixels(),
                    actual: frame.len(),
                });
            }
            subspectra.push(frame[start..end].to_vec());
            start = end;
        }
        Ok(subspectra)
    }

    /// Cut a full-detector axis (wavelengths, wavenumbers) into per-region
    /// pieces addressed by each region's own column bounds.
    ///
    /// Unlike [`DetectorRegions::split`], samples outside every region are
    /// dropped and overlapping regions may share samples.
    pub fn chop(&self, axis: &[f64]) -> Result<Vec<Vec<f64>>> {
        let mut pieces = Vec::with_capacity(self.regions.len());
        for roi in self.regions.values().filter(|roi| roi.enabled) {
            let x0 = usize::from(roi.x0);
            let x1 = usize::from(roi.x1);
            if x1 > axis.len() {
                return Err(SpectroError::FrameTooShort {
                    expected: x1,
                    actual: axis.len(),
                });
            }
            pieces.push(axis[x0..x1].to_vec());
        }
        Ok(pieces)
    }
}
