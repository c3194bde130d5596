//! Spectrum post-processing pipeline.
//!
//! Every raw frame passes through the same fixed, order-sensitive sequence of
//! corrections before it reaches a caller:
//!
//! 1. even/odd gain-and-offset rescale (InGaAs, unless firmware already did)
//! 2. area-scan row-index extraction
//! 3. start-marker validation (protocol-debug mode)
//! 4. edge-pixel stomping of optically-masked pixels
//! 5. x-axis inversion
//! 6. bad-pixel interpolation
//! 7. alternating-pixel swap (sensor debug)
//! 8. 2x2 adjacent-pixel binning, per region when regions are active
//! 9. alternating-pixel smoothing (sensor debug)
//!
//! Inversion (5) runs before bad-pixel correction (6): the record's bad-pixel
//! indices are expressed in logical (post-inversion) pixel order for inverted
//! benches, so every code path must flip first. Historical drivers disagreed
//! on this order across backends; the sequence above is the contract here,
//! and `inversion_order_is_observable` pins it.

pub mod badpix;

use log::{debug, warn};

use crate::eeprom::ConfigurationRecord;
use crate::error::{Result, SpectroError};
use crate::regions::DetectorRegions;
use crate::state::{BadPixelMode, RuntimeState};

/// Sentinel carried in pixel 0 when the firmware's frame markers are enabled.
const START_MARKER: f64 = 65535.0;

/// Side data extracted from a frame during processing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Row index recovered from pixel 0 in area-scan mode.
    pub area_scan_row: Option<u16>,
}

/// Run the full correction sequence over one raw frame, in place.
pub fn process(
    spectrum: &mut Vec<f64>,
    record: &ConfigurationRecord,
    state: &RuntimeState,
) -> Result<FrameReport> {
    let mut report = FrameReport::default();
    if spectrum.is_empty() {
        return Ok(report);
    }

    if record.is_ingaas() && !record.hardware_even_odd {
        rescale_odd_pixels(spectrum, record);
    }

    if state.area_scan_enabled && spectrum.len() >= 2 {
        report.area_scan_row = Some(spectrum[0] as u16);
        spectrum[0] = spectrum[1];
    }

    if state.validate_frame_markers {
        validate_start_marker(spectrum);
    }

    // region read-outs define their own geometry; the record's horizontal ROI
    // only describes full-detector frames
    if state.detector_regions.is_none() {
        stomp_masked_edges(spectrum, record);
    }

    if state.invert_x_axis {
        spectrum.reverse();
    }

    if state.bad_pixel_mode == BadPixelMode::Average {
        badpix::interpolate(spectrum, &record.bad_pixels);
    }

    if state.swap_alternating_pixels {
        swap_alternating(spectrum);
    }

    if record.horiz_binning_enabled {
        bin_2x2(spectrum, state.detector_regions.as_ref())?;
    }

    if state.graph_alternating_pixels {
        smooth_alternating(spectrum);
    }

    Ok(report)
}

/// Odd pixels of InGaAs detectors are digitized through a separate amplifier;
/// back out the even gain/offset the firmware applied, then apply the odd
/// pair from the calibration.
fn rescale_odd_pixels(spectrum: &mut [f64], record: &ConfigurationRecord) {
    let even_gain = f64::from(record.detector_gain);
    if even_gain == 0.0 {
        warn!("even-pixel gain is zero; skipping odd-pixel rescale");
        return;
    }
    let even_offset = f64::from(record.detector_offset);
    let odd_gain = f64::from(record.detector_gain_odd);
    let odd_offset = f64::from(record.detector_offset_odd);

    for sample in spectrum.iter_mut().skip(1).step_by(2) {
        let raw = (*sample - even_offset) / even_gain;
        *sample = raw * odd_gain + odd_offset;
    }
}

/// Pixel 0 carries a 0xffff sentinel when frame markers are enabled; replace
/// it with its neighbor, or hunt for a stray marker and log it.
fn validate_start_marker(spectrum: &mut [f64]) {
    if spectrum.len() < 2 {
        return;
    }
    if spectrum[0] == START_MARKER {
        spectrum[0] = spectrum[1];
        return;
    }
    let strays: Vec<usize> = spectrum
        .iter()
        .enumerate()
        .filter(|(_, &v)| v == START_MARKER)
        .map(|(i, _)| i)
        .collect();
    if !strays.is_empty() {
        warn!("start marker missing from pixel 0; sentinel found at {strays:?}");
    } else {
        debug!("start marker missing and no sentinel in frame");
    }
}

/// Overwrite optically-masked pixels outside the horizontal ROI with their
/// first valid neighbor.
fn stomp_masked_edges(spectrum: &mut [f64], record: &ConfigurationRecord) {
    let start = usize::from(record.roi_horizontal_start);
    let end = usize::from(record.roi_horizontal_end);
    if end <= start || end >= spectrum.len() {
        return;
    }
    stomp_first(spectrum, start);
    stomp_last(spectrum, spectrum.len() - 1 - end);
}

/// Overwrite the first `count` samples with the first valid one.
fn stomp_first(spectrum: &mut [f64], count: usize) {
    if count == 0 || count >= spectrum.len() {
        return;
    }
    let value = spectrum[count];
    for sample in &mut spectrum[..count] {
        *sample = value;
    }
}

/// Overwrite the last `count` samples with the last valid one.
fn stomp_last(spectrum: &mut [f64], count: usize) {
    let len = spectrum.len();
    if count == 0 || count >= len {
        return;
    }
    let value = spectrum[len - 1 - count];
    for sample in &mut spectrum[len - count..] {
        *sample = value;
    }
}

fn swap_alternating(spectrum: &mut [f64]) {
    for pair in spectrum.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// Average each sample with its right neighbor; the final sample is kept.
/// With regions active, binning respects region boundaries.
fn bin_2x2(spectrum: &mut [f64], regions: Option<&DetectorRegions>) -> Result<()> {
    match regions {
        None => bin_slice(spectrum),
        Some(regions) => {
            let mut start = 0;
            for roi in regions.region_list().filter(|roi| roi.enabled) {
                let end = start + roi.width();
                if end > spectrum.len() {
                    return Err(SpectroError::FrameTooShort {
                        expected: regions.total_pixels(),
                        actual: spectrum.len(),
                    });
                }
                bin_slice(&mut spectrum[start..end]);
                start = end;
            }
        }
    }
    Ok(())
}

fn bin_slice(slice: &mut [f64]) {
    for i in 0..slice.len().saturating_sub(1) {
        slice[i] = (slice[i] + slice[i + 1]) / 2.0;
    }
}

/// Replace each odd sample with the mean of its even neighbors, for viewing
/// sensors whose odd pixels read systematically differently.
fn smooth_alternating(spectrum: &mut [f64]) {
    let len = spectrum.len();
    let mut i = 1;
    while i < len {
        spectrum[i] = if i + 1 < len {
            (spectrum[i - 1] + spectrum[i + 1]) / 2.0
        } else {
            spectrum[i - 1]
        };
        i += 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::DetectorRoi;

    fn plain_record(pixels: u16) -> ConfigurationRecord {
        ConfigurationRecord {
            active_pixels_horizontal: pixels,
            actual_pixels_horizontal: pixels,
            ..ConfigurationRecord::default()
        }
    }

    fn plain_state(record: &ConfigurationRecord) -> RuntimeState {
        let mut state = RuntimeState::from_record(record);
        state.bad_pixel_mode = BadPixelMode::Disabled;
        state
    }

    #[test]
    fn odd_pixels_are_rescaled_for_ingaas() {
        let mut record = plain_record(4);
        record.detector = "G9214".into();
        record.detector_gain = 2.0;
        record.detector_offset = 100;
        record.detector_gain_odd = 4.0;
        record.detector_offset_odd = 10;
        let state = plain_state(&record);

        let mut spectrum = vec![300.0, 300.0, 500.0, 500.0];
        process(&mut spectrum, &record, &state).unwrap();
        // raw = (300 - 100) / 2 = 100 -> 100 * 4 + 10 = 410
        assert_eq!(spectrum, vec![300.0, 410.0, 500.0, 810.0]);
    }

    #[test]
    fn hardware_even_odd_suppresses_rescale() {
        let mut record = plain_record(4);
        record.detector = "G9214".into();
        record.detector_gain_odd = 4.0;
        record.hardware_even_odd = true;
        let state = plain_state(&record);

        let mut spectrum = vec![300.0, 300.0, 500.0, 500.0];
        process(&mut spectrum, &record, &state).unwrap();
        assert_eq!(spectrum, vec![300.0, 300.0, 500.0, 500.0]);
    }

    #[test]
    fn area_scan_row_is_extracted() {
        let record = plain_record(4);
        let mut state = plain_state(&record);
        state.area_scan_enabled = true;

        let mut spectrum = vec![17.0, 200.0, 201.0, 202.0];
        let report = process(&mut spectrum, &record, &state).unwrap();
        assert_eq!(report.area_scan_row, Some(17));
        assert_eq!(spectrum[0], 200.0);
    }

    #[test]
    fn start_marker_is_replaced_by_neighbor() {
        let record = plain_record(4);
        let mut state = plain_state(&record);
        state.validate_frame_markers = true;

        let mut spectrum = vec![65535.0, 120.0, 121.0, 122.0];
        process(&mut spectrum, &record, &state).unwrap();
        assert_eq!(spectrum, vec![120.0, 120.0, 121.0, 122.0]);
    }

    #[test]
    fn masked_edges_are_stomped() {
        let mut record = plain_record(8);
        record.roi_horizontal_start = 2;
        record.roi_horizontal_end = 5;
        let state = plain_state(&record);

        let mut spectrum = vec![9.0, 9.0, 10.0, 11.0, 12.0, 13.0, 99.0, 99.0];
        process(&mut spectrum, &record, &state).unwrap();
        assert_eq!(spectrum, vec![10.0, 10.0, 10.0, 11.0, 12.0, 13.0, 13.0, 13.0]);
    }

    #[test]
    fn inversion_mirrors_the_frame() {
        let record = plain_record(4);
        let mut state = plain_state(&record);
        state.invert_x_axis = true;

        let mut spectrum = vec![1.0, 2.0, 3.0, 4.0];
        process(&mut spectrum, &record, &state).unwrap();
        assert_eq!(spectrum, vec![4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn inversion_order_is_observable() {
        // a bad pixel at logical index 1 must be corrected AFTER the mirror;
        // correcting first and mirroring second repairs a different pixel
        let mut record = plain_record(5);
        record.bad_pixels = vec![1];
        let mut state = plain_state(&record);
        state.bad_pixel_mode = BadPixelMode::Average;
        state.invert_x_axis = true;

        let raw = vec![10.0, 20.0, 30.0, 999.0, 50.0];

        let mut documented = raw.clone();
        process(&mut documented, &record, &state).unwrap();

        let mut swapped = raw;
        badpix::interpolate(&mut swapped, &record.bad_pixels);
        swapped.reverse();

        // mirrored to [50, 999, 30, 20, 10], then index 1 interpolated 50..30
        assert_eq!(documented, vec![50.0, 40.0, 30.0, 20.0, 10.0]);
        assert_ne!(documented, swapped);
    }

    #[test]
    fn alternating_swap_exchanges_pairs() {
        let record = plain_record(5);
        let mut state = plain_state(&record);
        state.swap_alternating_pixels = true;

        let mut spectrum = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        process(&mut spectrum, &record, &state).unwrap();
        assert_eq!(spectrum, vec![2.0, 1.0, 4.0, 3.0, 5.0]);
    }

    #[test]
    fn binning_averages_adjacent_pixels() {
        let mut record = plain_record(4);
        record.horiz_binning_enabled = true;
        let state = plain_state(&record);

        let mut spectrum = vec![1.0, 3.0, 5.0, 7.0];
        process(&mut spectrum, &record, &state).unwrap();
        assert_eq!(spectrum, vec![2.0, 4.0, 6.0, 7.0]);
    }

    #[test]
    fn binning_respects_region_boundaries() {
        let mut record = plain_record(4);
        record.horiz_binning_enabled = true;
        let mut state = plain_state(&record);
        let mut regions = DetectorRegions::new();
        regions.add(DetectorRoi::new(0, 0, 10, 0, 2).unwrap());
        regions.add(DetectorRoi::new(1, 10, 20, 0, 2).unwrap());
        state.detector_regions = Some(regions);

        let mut spectrum = vec![1.0, 3.0, 100.0, 200.0];
        process(&mut spectrum, &record, &state).unwrap();
        // pixel 1 does not average with pixel 2 across the region boundary
        assert_eq!(spectrum, vec![2.0, 3.0, 150.0, 200.0]);
    }

    #[test]
    fn binning_errors_on_short_region_frame() {
        let mut record = plain_record(4);
        record.horiz_binning_enabled = true;
        let mut state = plain_state(&record);
        let mut regions = DetectorRegions::new();
        regions.add(DetectorRoi::new(0, 0, 10, 0, 8).unwrap());
        state.detector_regions = Some(regions);

        let mut spectrum = vec![1.0, 2.0, 3.0];
        assert!(process(&mut spectrum, &record, &state).is_err());
    }

    #[test]
    fn smoothing_interpolates_odd_pixels() {
        let record = plain_record(5);
        let mut state = plain_state(&record);
        state.graph_alternating_pixels = true;

        let mut spectrum = vec![10.0, 99.0, 20.0, 99.0, 30.0];
        process(&mut spectrum, &record, &state).unwrap();
        assert_eq!(spectrum, vec![10.0, 15.0, 20.0, 25.0, 30.0]);
    }
}
