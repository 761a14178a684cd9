// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

mod overrides;

pub use overrides::{TitleOverride, TitleOverrides};

/// Accepted range for `cpu_clock_percentage`.
pub const MIN_CLOCK_PERCENTAGE: u32 = 5;
pub const MAX_CLOCK_PERCENTAGE: u32 = 400;

pub const DEFAULT_GDBSTUB_PORT: u16 = 24689;

/// Per-core slice divisors used when the CPU usage limit is active in 4-core mode.
pub const DEFAULT_DOWNCOUNT_DIVISORS: [u32; 4] = [1, 4, 2, 2];

bitflags::bitflags! {
    /// Compatibility switches consumed by the GPU and service layers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HackFlags: u32 {
        const SKIP_TEXTURE_COPY = 1 << 0;
        const SKIP_SLOW_DRAW = 1 << 1;
        const DISPLAY_TRANSFER_HACK = 1 << 2;
        const STREAM_BUFFER_HACK = 1 << 3;
        const SHADERS_ACCURATE_MUL = 1 << 4;
        const Y2R_PERFORM_HACK = 1 << 5;
        const Y2R_EVENT_DELAY = 1 << 6;
    }
}

impl Default for HackFlags {
    fn default() -> Self {
        HackFlags::STREAM_BUFFER_HACK
    }
}

/// Named form of a single [`HackFlags`] bit, as written in YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hack {
    SkipTextureCopy,
    SkipSlowDraw,
    DisplayTransferHack,
    StreamBufferHack,
    ShadersAccurateMul,
    Y2rPerformHack,
    Y2rEventDelay,
}

impl Hack {
    pub const ALL: [Hack; 7] = [
        Hack::SkipTextureCopy,
        Hack::SkipSlowDraw,
        Hack::DisplayTransferHack,
        Hack::StreamBufferHack,
        Hack::ShadersAccurateMul,
        Hack::Y2rPerformHack,
        Hack::Y2rEventDelay,
    ];

    pub fn flag(self) -> HackFlags {
        match self {
            Hack::SkipTextureCopy => HackFlags::SKIP_TEXTURE_COPY,
            Hack::SkipSlowDraw => HackFlags::SKIP_SLOW_DRAW,
            Hack::DisplayTransferHack => HackFlags::DISPLAY_TRANSFER_HACK,
            Hack::StreamBufferHack => HackFlags::STREAM_BUFFER_HACK,
            Hack::ShadersAccurateMul => HackFlags::SHADERS_ACCURATE_MUL,
            Hack::Y2rPerformHack => HackFlags::Y2R_PERFORM_HACK,
            Hack::Y2rEventDelay => HackFlags::Y2R_EVENT_DELAY,
        }
    }
}

impl HackFlags {
    pub fn names(self) -> Vec<Hack> {
        Hack::ALL
            .iter()
            .copied()
            .filter(|hack| self.contains(hack.flag()))
            .collect()
    }
}

impl Serialize for HackFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.names().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HackFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hacks = Vec::<Hack>::deserialize(deserializer)?;
        Ok(hacks
            .into_iter()
            .fold(HackFlags::empty(), |acc, hack| acc | hack.flag()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GdbStubSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for GdbStubSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_GDBSTUB_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginLoaderSettings {
    pub enabled: bool,
    pub allow_game_change_state: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("cpu_clock_percentage must be within {min}..={max}, got {value}")]
    ClockPercentageOutOfRange { value: u32, min: u32, max: u32 },
    #[error("gdbstub port must be non-zero when the stub is enabled")]
    InvalidGdbStubPort,
}

/// Emulator-wide settings. Title overrides are applied on top of a copy of
/// these at every load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Emulate the 4-core model instead of the single application core.
    pub new_hardware: bool,
    pub cpu_clock_percentage: u32,
    /// Throttle per-core slice lengths with `downcount_divisors`.
    pub core_downcount_hack: bool,
    /// Divisor per core index; a missing entry or 0 leaves that core unthrottled.
    pub downcount_divisors: Vec<u32>,
    pub gdbstub: GdbStubSettings,
    pub plugin_loader: PluginLoaderSettings,
    pub hacks: HackFlags,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            new_hardware: false,
            cpu_clock_percentage: 100,
            core_downcount_hack: false,
            downcount_divisors: DEFAULT_DOWNCOUNT_DIVISORS.to_vec(),
            gdbstub: GdbStubSettings::default(),
            plugin_loader: PluginLoaderSettings::default(),
            hacks: HackFlags::default(),
        }
    }
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open settings at {:?}", path.as_ref()))?;
        let settings: Self = serde_yaml::from_reader(f).context("Failed to parse Settings YAML")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml).context("Failed to parse Settings YAML")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(MIN_CLOCK_PERCENTAGE..=MAX_CLOCK_PERCENTAGE).contains(&self.cpu_clock_percentage) {
            return Err(SettingsError::ClockPercentageOutOfRange {
                value: self.cpu_clock_percentage,
                min: MIN_CLOCK_PERCENTAGE,
                max: MAX_CLOCK_PERCENTAGE,
            });
        }
        if self.gdbstub.enabled && self.gdbstub.port == 0 {
            return Err(SettingsError::InvalidGdbStubPort);
        }
        Ok(())
    }

    /// Number of emulated application cores implied by these settings.
    pub fn num_cores(&self) -> usize {
        if self.new_hardware {
            4
        } else {
            1
        }
    }

    /// Divisor for `core`, or 0 when the core is not throttled.
    pub fn downcount_divisor(&self, core: usize) -> u32 {
        self.downcount_divisors.get(core).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_yaml() {
        let settings = Settings::default();
        let yaml = serde_yaml::to_string(&settings).unwrap();
        assert!(yaml.contains("stream_buffer_hack"));
        let parsed = Settings::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let settings = Settings::from_yaml("new_hardware: true\n").unwrap();
        assert!(settings.new_hardware);
        assert_eq!(settings.num_cores(), 4);
        assert_eq!(settings.cpu_clock_percentage, 100);
        assert_eq!(settings.downcount_divisors, vec![1, 4, 2, 2]);
    }

    #[test]
    fn test_clock_percentage_validation() {
        let err = Settings::from_yaml("cpu_clock_percentage: 1000\n").unwrap_err();
        assert!(err.to_string().contains("cpu_clock_percentage"));

        let settings = Settings {
            cpu_clock_percentage: 4,
            ..Settings::default()
        };
        assert_eq!(
            settings.validate(),
            Err(SettingsError::ClockPercentageOutOfRange {
                value: 4,
                min: 5,
                max: 400
            })
        );
    }

    #[test]
    fn test_gdbstub_port_validation() {
        let settings = Settings {
            gdbstub: GdbStubSettings {
                enabled: true,
                port: 0,
            },
            ..Settings::default()
        };
        assert_eq!(settings.validate(), Err(SettingsError::InvalidGdbStubPort));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Settings::from_yaml("turbo: true\n").is_err());
    }

    #[test]
    fn test_hack_flags_parse_from_names() {
        let settings = Settings::from_yaml("hacks: [skip_slow_draw, y2r_event_delay]\n").unwrap();
        assert_eq!(
            settings.hacks,
            HackFlags::SKIP_SLOW_DRAW | HackFlags::Y2R_EVENT_DELAY
        );
        assert_eq!(
            settings.hacks.names(),
            vec![Hack::SkipSlowDraw, Hack::Y2rEventDelay]
        );
    }

    #[test]
    fn test_downcount_divisor_lookup() {
        let settings = Settings::default();
        assert_eq!(settings.downcount_divisor(1), 4);
        assert_eq!(settings.downcount_divisor(7), 0);
    }
}
