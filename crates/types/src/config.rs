use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Host configuration, loadable from a JSON file.
///
/// Field names on disk match the historical key names (`PhysicalMemory`,
/// `MemoryPageSize`, ...) so existing config files keep working. Every size
/// is in bytes and is rounded up to a page multiple at the point of use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Config {
    /// Bytes of physical memory backing the frame pool.
    pub physical_memory: u32,
    /// Page size P. Must be a multiple of 4.
    pub memory_page_size: u32,
    /// Default per-process memory budget.
    pub process_memory: u32,
    /// Fixed per-process stack region size.
    pub stack_size: u32,
    /// Fixed per-process data region size.
    pub data_size: u32,
    /// Size S of each shared memory region.
    pub shared_memory_region_size: u32,
    /// Number R of shared memory regions reserved at boot.
    pub num_of_shared_memory_regions: u32,

    // Diagnostic toggles. None of these affect semantics.
    pub dump_physical_memory: bool,
    pub dump_registers: bool,
    pub dump_instruction: bool,
    pub dump_context_switch: bool,
    pub dump_program: bool,

    /// Wait for an input line before the host exits.
    pub pause_on_exit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            physical_memory: 1024,
            memory_page_size: 16,
            process_memory: 384,
            stack_size: 64,
            data_size: 64,
            shared_memory_region_size: 64,
            num_of_shared_memory_regions: 2,
            dump_physical_memory: false,
            dump_registers: false,
            dump_instruction: false,
            dump_context_switch: false,
            dump_program: false,
            pause_on_exit: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory_page_size == 0 || self.memory_page_size % 4 != 0 {
            anyhow::bail!(
                "MemoryPageSize must be a non-zero multiple of 4, got {}",
                self.memory_page_size
            );
        }
        Ok(())
    }

    /// Round `bytes` up to the next page multiple.
    pub fn round_to_page(&self, bytes: u32) -> u32 {
        round_to(bytes, self.memory_page_size)
    }
}

pub fn round_to(bytes: u32, page_size: u32) -> u32 {
    bytes.div_ceil(page_size) * page_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_page_aligned() {
        let config = Config::default();
        assert_eq!(config.physical_memory % config.memory_page_size, 0);
        assert_eq!(config.stack_size % config.memory_page_size, 0);
        assert_eq!(config.data_size % config.memory_page_size, 0);
        assert_eq!(
            config.shared_memory_region_size % config.memory_page_size,
            0
        );
    }

    #[test]
    fn round_to_page() {
        let config = Config::default();
        assert_eq!(config.round_to_page(0), 0);
        assert_eq!(config.round_to_page(1), 16);
        assert_eq!(config.round_to_page(16), 16);
        assert_eq!(config.round_to_page(17), 32);
    }

    #[test]
    fn parses_historical_key_names() {
        let json = r#"{ "PhysicalMemory": 256, "MemoryPageSize": 32, "PauseOnExit": true }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.physical_memory, 256);
        assert_eq!(config.memory_page_size, 32);
        assert!(config.pause_on_exit);
        // Unspecified keys fall back to defaults.
        assert_eq!(config.process_memory, 384);
    }

    #[test]
    fn rejects_unaligned_page_size() {
        let config = Config {
            memory_page_size: 6,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
