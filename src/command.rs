//! Commands applied to a device session by the worker loop.
//!
//! Commands form a closed sum type rather than a name/value table: the worker
//! matches exhaustively, so an unhandled setting is a compile error instead
//! of a silent runtime drop.

use serde::{Deserialize, Serialize};

use crate::autoexposure::AutoExposureRequest;
use crate::eeprom::ConfigurationRecord;
use crate::state::{BadPixelMode, TriggerSource};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Command {
    SetIntegrationTimeMs(u32),
    SetDetectorGain(f32),
    SetLaserEnable(bool),
    SetLaserPowerPercent(f32),
    SetLaserPowerMw(f32),
    SetDetectorTecEnable(bool),
    SetDetectorTecSetpointDegc(f32),
    SetTriggerSource(TriggerSource),
    SetScansToAverage(u32),
    SetBadPixelMode(BadPixelMode),
    SetAreaScanEnable(bool),
    SetVerticalBinning { start: u16, end: u16 },
    SetDetectorRoi { region: u8, y0: u16, y1: u16, x0: u16, x1: u16 },
    /// Copy the editable subset of the given record over the session's.
    UpdateEditableConfig(Box<ConfigurationRecord>),
    /// Write the session's configuration record back to the instrument.
    WriteConfig,
    RunAutoExposure(Box<AutoExposureRequest>),
    /// How many sessions share the bus; scales the worker's poll interval.
    SetConnectedDeviceCount(u32),
    /// Terminate the worker after applying every command ahead of this one.
    Poison,
}

/// Identity used for queue de-duplication. Two commands with equal keys
/// target the same setting, so only the later one survives a drain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DedupeKey {
    Setting(&'static str),
    /// Regions are independent settings per region id.
    Roi(u8),
}

impl Command {
    /// Setting name for logs and de-duplication.
    pub fn setting_name(&self) -> &'static str {
        match self {
            Command::SetIntegrationTimeMs(_) => "integration_time_ms",
            Command::SetDetectorGain(_) => "detector_gain",
            Command::SetLaserEnable(_) => "laser_enable",
            Command::SetLaserPowerPercent(_) => "laser_power_percent",
            Command::SetLaserPowerMw(_) => "laser_power_mw",
            Command::SetDetectorTecEnable(_) => "detector_tec_enable",
            Command::SetDetectorTecSetpointDegc(_) => "detector_tec_setpoint_degc",
            Command::SetTriggerSource(_) => "trigger_source",
            Command::SetScansToAverage(_) => "scans_to_average",
            Command::SetBadPixelMode(_) => "bad_pixel_mode",
            Command::SetAreaScanEnable(_) => "area_scan_enable",
            Command::SetVerticalBinning { .. } => "vertical_binning",
            Command::SetDetectorRoi { .. } => "detector_roi",
            Command::UpdateEditableConfig(_) => "update_editable_config",
            Command::WriteConfig => "write_config",
            Command::RunAutoExposure(_) => "run_auto_exposure",
            Command::SetConnectedDeviceCount(_) => "connected_device_count",
            Command::Poison => "poison",
        }
    }

    fn dedupe_key(&self) -> Option<DedupeKey> {
        match self {
            // the sentinel must survive every drain
            Command::Poison => None,
            Command::SetDetectorRoi { region, .. } => Some(DedupeKey::Roi(*region)),
            other => Some(DedupeKey::Setting(other.setting_name())),
        }
    }
}

/// Collapse a drained batch so only the last command per setting survives,
/// in the relative order of the surviving occurrences. Poison sentinels are
/// never removed.
pub fn dedupe(drained: Vec<Command>) -> Vec<Command> {
    let mut kept: Vec<Command> = Vec::with_capacity(drained.len());
    for command in drained {
        if let Some(key) = command.dedupe_key() {
            kept.retain(|earlier| earlier.dedupe_key() != Some(key));
        }
        kept.push(command);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_command_supersedes_earlier() {
        let drained = vec![
            Command::SetIntegrationTimeMs(1),
            Command::SetScansToAverage(2),
            Command::SetIntegrationTimeMs(3),
            Command::SetIntegrationTimeMs(4),
        ];
        let applied = dedupe(drained);
        assert_eq!(
            applied,
            vec![
                Command::SetScansToAverage(2),
                Command::SetIntegrationTimeMs(4),
            ]
        );
    }

    #[test]
    fn poison_is_never_deduped() {
        let drained = vec![
            Command::Poison,
            Command::SetLaserEnable(false),
            Command::Poison,
        ];
        let applied = dedupe(drained);
        assert_eq!(
            applied,
            vec![
                Command::Poison,
                Command::SetLaserEnable(false),
                Command::Poison,
            ]
        );
    }

    #[test]
    fn commands_ahead_of_poison_survive() {
        let drained = vec![Command::SetLaserEnable(true), Command::Poison];
        let applied = dedupe(drained);
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0], Command::SetLaserEnable(true));
        assert_eq!(applied[1], Command::Poison);
    }

    #[test]
    fn regions_dedupe_per_region_id() {
        let drained = vec![
            Command::SetDetectorRoi { region: 0, y0: 0, y1: 10, x0: 0, x1: 100 },
            Command::SetDetectorRoi { region: 1, y0: 10, y1: 20, x0: 0, x1: 100 },
            Command::SetDetectorRoi { region: 0, y0: 0, y1: 15, x0: 0, x1: 100 },
        ];
        let applied = dedupe(drained);
        assert_eq!(applied.len(), 2);
        assert!(matches!(
            applied[0],
            Command::SetDetectorRoi { region: 1, .. }
        ));
        assert!(matches!(
            applied[1],
            Command::SetDetectorRoi { region: 0, y1: 15, .. }
        ));
    }
}
