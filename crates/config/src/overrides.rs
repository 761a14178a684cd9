// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{HackFlags, Settings};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Settings adjustments for a group of program ids (regional releases of one title).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TitleOverride {
    pub name: String,
    pub program_ids: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_hardware: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_downcount_hack: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_clock_percentage: Option<u32>,
    #[serde(default = "HackFlags::empty")]
    pub enable: HackFlags,
    #[serde(default = "HackFlags::empty")]
    pub disable: HackFlags,
}

impl TitleOverride {
    pub fn new(name: &str, program_ids: &[u64]) -> Self {
        Self {
            name: name.to_string(),
            program_ids: program_ids.to_vec(),
            new_hardware: None,
            core_downcount_hack: None,
            cpu_clock_percentage: None,
            enable: HackFlags::empty(),
            disable: HackFlags::empty(),
        }
    }

    pub fn with_new_hardware(mut self) -> Self {
        self.new_hardware = Some(true);
        self
    }

    pub fn with_downcount_hack(mut self) -> Self {
        self.core_downcount_hack = Some(true);
        self
    }

    pub fn enabling(mut self, hacks: HackFlags) -> Self {
        self.enable |= hacks;
        self
    }

    pub fn disabling(mut self, hacks: HackFlags) -> Self {
        self.disable |= hacks;
        self
    }

    pub fn matches(&self, program_id: u64) -> bool {
        self.program_ids.contains(&program_id)
    }

    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(new_hardware) = self.new_hardware {
            settings.new_hardware = new_hardware;
        }
        if let Some(hack) = self.core_downcount_hack {
            settings.core_downcount_hack = hack;
        }
        if let Some(percentage) = self.cpu_clock_percentage {
            settings.cpu_clock_percentage = percentage;
        }
        settings.hacks.insert(self.enable);
        settings.hacks.remove(self.disable);
    }
}

/// Ordered per-title override table. Every matching entry is applied, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TitleOverrides {
    #[serde(default)]
    pub titles: Vec<TitleOverride>,
}

impl TitleOverrides {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read title overrides at {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse Title Overrides YAML")
    }

    /// Appends `other` after the current entries, so its adjustments win.
    pub fn extend(&mut self, other: TitleOverrides) {
        self.titles.extend(other.titles);
    }

    pub fn matching(&self, program_id: u64) -> impl Iterator<Item = &TitleOverride> {
        self.titles.iter().filter(move |t| t.matches(program_id))
    }

    /// Applies every entry for `program_id` and returns the names applied.
    pub fn apply(&self, program_id: u64, settings: &mut Settings) -> Vec<String> {
        let mut applied = Vec::new();
        for title in self.matching(program_id) {
            info!("Applying overrides for {} ({:016X})", title.name, program_id);
            title.apply_to(settings);
            applied.push(title.name.clone());
        }
        applied
    }

    /// Known titles that need timing or rendering adjustments.
    pub fn builtin() -> Self {
        let titles = vec![
            TitleOverride::new(
                "Mario Kart 7",
                &[
                    0x000400000008B400,
                    0x0004000000030600,
                    0x0004000000030800,
                    0x0004000000030700,
                ],
            )
            .enabling(HackFlags::SKIP_TEXTURE_COPY),
            TitleOverride::new(
                "Luigi's Mansion: Dark Moon",
                &[
                    0x00040000000D0000,
                    0x0004000000076400,
                    0x0004000000055F00,
                    0x0004000000076500,
                ],
            )
            .with_downcount_hack()
            .enabling(HackFlags::SHADERS_ACCURATE_MUL),
            TitleOverride::new(
                "Danball Senki W Chou Custom / WARS",
                &[0x00040000000DCA00, 0x00040000000F4000],
            )
            .enabling(HackFlags::Y2R_PERFORM_HACK),
            TitleOverride::new(
                "Tales of the Abyss / Pac Man Party 3D",
                &[
                    0x0004000000068B00,
                    0x0004000000061300,
                    0x000400000004A700,
                    0x000400000005D700,
                ],
            )
            .enabling(HackFlags::DISPLAY_TRANSFER_HACK | HackFlags::SKIP_SLOW_DRAW),
            TitleOverride::new(
                "Slow draw titles",
                &[
                    0x000400000015CB00, // New Atelier Rorona
                    0x000400000018E900, // My Hero Academia
                    0x000400000016AD00, // Dragon Quest Monsters Joker 3
                    0x00040000001ACB00, // Dragon Quest Monsters Joker 3 Professional
                ],
            )
            .enabling(HackFlags::SKIP_SLOW_DRAW),
            TitleOverride::new(
                "Stream buffer sensitive titles",
                &[
                    0x000400000019E700, // Armed Blue Gunvolt
                    0x00040000001A5600,
                    0x000400000019B200, // Armed Blue Gunvolt 2
                    0x0004000000196A00,
                    0x00040000001A6E00,
                    0x0004000000149100, // Gravity Falls
                    0x0004000000196900, // Shovel Knight
                    0x0004000000119A00,
                    0x000400000017C900,
                    0x000400000017E100,
                    0x000400000008FE00, // 1001 Spikes
                ],
            )
            .disabling(HackFlags::STREAM_BUFFER_HACK),
            TitleOverride::new(
                "Accurate multiplication titles",
                &[
                    0x0004000000054000, // Super Mario 3D Land
                    0x0004000000053F00,
                    0x0004000000054100,
                    0x0004000000033400, // Ocarina of Time 3D
                    0x0004000000033500,
                    0x0004000000033600,
                    0x0004000000125600, // Majora's Mask 3D
                    0x0004000000125500,
                    0x00040000000D6E00,
                    0x00040000000EC200, // A Link Between Worlds
                    0x00040000000EC300,
                    0x00040000000EC400,
                ],
            )
            .enabling(HackFlags::SHADERS_ACCURATE_MUL),
            TitleOverride::new(
                "CPU usage limited titles",
                &[
                    0x000400000007C700, // Mario Tennis Open
                    0x000400000007C800,
                    0x0004000000064D00,
                    0x00040000000B9100,
                    0x00040000000DCD00, // Mario Golf: World Tour
                    0x00040000000A5300,
                    0x00040000000DCE00,
                ],
            )
            .with_downcount_hack(),
            TitleOverride::new(
                "FIFA 12-15",
                &[
                    0x0004000000044700,
                    0x0004000000047A00,
                    0x0004000000044800,
                    0x00040000000A2B00,
                    0x00040000000A2900,
                    0x00040000000A3000,
                    0x00040000000E7900,
                    0x00040000000DEA00,
                    0x00040000000E7A00,
                    0x000400000013C700,
                    0x000400000013CA00,
                    0x000400000013CB00,
                ],
            )
            .enabling(HackFlags::Y2R_EVENT_DELAY),
            TitleOverride::new(
                "New hardware titles",
                &[
                    0x000400000F700000, // Xenoblade Chronicles 3D
                    0x000400000F700100,
                    0x000400000F700200,
                    0x000400000F70CC00, // Fire Emblem Warriors
                    0x000400000F70CD00,
                    0x000400000F70C100,
                    0x000400000F700800, // The Binding of Isaac: Rebirth
                    0x000400000F701700,
                    0x000400000F700900,
                    0x00040000000CCE00, // Donkey Kong Country Returns 3D
                    0x00040000000CC000,
                    0x00040000000CCF00,
                    0x0004000000127500, // Sonic Boom: Shattered Crystal
                    0x000400000014AE00,
                    0x000400000012C200,
                    0x0004000000161300, // Sonic Boom: Fire & Ice
                    0x0004000000170700,
                    0x0004000000164700,
                    0x00040000000B3500, // Sonic & All-Stars Racing Transformed
                    0x000400000008FC00,
                    0x00040000001B8700, // Minecraft
                    0x000400000F707F00, // Hyperlight EX
                    0x000400000008FE00, // 1001 Spikes
                    0x000400000007C700, // Mario Tennis Open
                    0x000400000007C800,
                    0x0004000000064D00,
                    0x00040000000B9100,
                    0x00040000000DCD00, // Mario Golf: World Tour
                    0x00040000000A5300,
                    0x00040000000DCE00,
                ],
            )
            .with_new_hardware(),
        ];
        Self { titles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_cpu_limited_title_gets_four_throttled_cores() {
        let mut settings = Settings::default();
        let applied = TitleOverrides::builtin().apply(0x000400000007C700, &mut settings);
        assert_eq!(
            applied,
            vec!["CPU usage limited titles", "New hardware titles"]
        );
        assert!(settings.new_hardware);
        assert!(settings.core_downcount_hack);
    }

    #[test]
    fn test_unknown_title_leaves_settings_untouched() {
        let mut settings = Settings::default();
        let applied = TitleOverrides::builtin().apply(0x0004000000000000, &mut settings);
        assert!(applied.is_empty());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_disable_clears_default_hack() {
        let mut settings = Settings::default();
        TitleOverrides::builtin().apply(0x000400000008FE00, &mut settings);
        assert!(!settings.hacks.contains(HackFlags::STREAM_BUFFER_HACK));
        assert!(settings.new_hardware);
    }

    #[test]
    fn test_yaml_table_with_hex_ids() {
        let yaml = r#"
titles:
  - name: "Test Title"
    program_ids: [0x0004000000ABCD00]
    cpu_clock_percentage: 150
    enable: [skip_slow_draw]
"#;
        let table = TitleOverrides::from_yaml(yaml).unwrap();
        assert_eq!(table.titles[0].program_ids, vec![0x0004000000ABCD00]);

        let mut settings = Settings::default();
        table.apply(0x0004000000ABCD00, &mut settings);
        assert_eq!(settings.cpu_clock_percentage, 150);
        assert!(settings.hacks.contains(HackFlags::SKIP_SLOW_DRAW));
        assert!(!settings.new_hardware);
    }

    #[test]
    fn test_later_entries_win() {
        let mut table = TitleOverrides::default();
        table
            .titles
            .push(TitleOverride::new("first", &[1]).with_new_hardware());
        let mut second = TitleOverride::new("second", &[1]);
        second.new_hardware = Some(false);
        table.extend(TitleOverrides {
            titles: vec![second],
        });

        let mut settings = Settings::default();
        table.apply(1, &mut settings);
        assert!(!settings.new_hardware);
    }
}
