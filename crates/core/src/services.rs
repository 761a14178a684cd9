// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! System services whose state survives a reset.

use crate::EmuResult;
use serde::{Deserialize, Serialize};

/// Launch parameter handed from one application to the next.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeliverArg {
    pub param: Vec<u8>,
    pub hmac: Vec<u8>,
    pub source_program_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginMemoryStrategy {
    #[default]
    Swap,
    /// Plugin memory carved out of the Dev2 layout.
    Mode3,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PluginLoadParameters {
    pub no_flash: bool,
    pub plugin_memory_strategy: PluginMemoryStrategy,
    pub low_title_id: u32,
    pub path: String,
    pub config: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PluginLoaderContext {
    pub is_enabled: bool,
    pub plugin_loaded: bool,
    pub allow_game_change_state: bool,
    pub use_user_load_parameters: bool,
    pub user_load_parameters: PluginLoadParameters,
}

impl PluginLoaderContext {
    /// Whether loading `program_id` must use the Dev2 memory layout.
    pub fn forces_dev2_for(&self, program_id: u64) -> bool {
        self.is_enabled
            && self.use_user_load_parameters
            && self.user_load_parameters.low_title_id == program_id as u32
            && self.user_load_parameters.plugin_memory_strategy == PluginMemoryStrategy::Mode3
    }
}

pub trait Services: Send {
    /// Take the pending deliver argument, if any.
    fn receive_deliver_arg(&mut self) -> Option<DeliverArg>;
    fn set_deliver_arg(&mut self, arg: DeliverArg);

    fn plugin_loader_context(&self) -> Option<PluginLoaderContext>;
    fn set_plugin_loader_context(&mut self, context: PluginLoaderContext);
    fn configure_plugin_loader(&mut self, _enabled: bool, _allow_game_change_state: bool) {}

    fn reload_input_devices(&mut self) {}

    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn restore(&mut self, _state: &serde_json::Value) -> EmuResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode3_context(low_title_id: u32) -> PluginLoaderContext {
        PluginLoaderContext {
            is_enabled: true,
            use_user_load_parameters: true,
            user_load_parameters: PluginLoadParameters {
                low_title_id,
                plugin_memory_strategy: PluginMemoryStrategy::Mode3,
                ..PluginLoadParameters::default()
            },
            ..PluginLoaderContext::default()
        }
    }

    #[test]
    fn test_dev2_only_for_matching_low_title_id() {
        let ctx = mode3_context(0x00030800);
        assert!(ctx.forces_dev2_for(0x0004000000030800));
        assert!(!ctx.forces_dev2_for(0x0004000000030700));
    }

    #[test]
    fn test_dev2_requires_mode3_and_user_parameters() {
        let mut ctx = mode3_context(0x00030800);
        ctx.user_load_parameters.plugin_memory_strategy = PluginMemoryStrategy::Swap;
        assert!(!ctx.forces_dev2_for(0x0004000000030800));

        let mut ctx = mode3_context(0x00030800);
        ctx.use_user_load_parameters = false;
        assert!(!ctx.forces_dev2_for(0x0004000000030800));

        let mut ctx = mode3_context(0x00030800);
        ctx.is_enabled = false;
        assert!(!ctx.forces_dev2_for(0x0004000000030800));
    }
}
