//! Configuration for runpane.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.runpane/config.toml`
//! - The color palette used to render the eight output colors
//! - Conversion into the runtime [`ConsoleConfig`]
//!
//! # Configuration File
//!
//! Every key is optional:
//!
//! ```toml
//! # Directory containing run/main
//! program_root = "/home/me/projects/demo"
//!
//! tick_ms = 16
//! relay_poll_ms = 5
//! relay_idle_ms = 50
//! respawn_grace_ms = 500
//! scrollback_lines = 5000
//! kill_identifier = "run/main"
//! log_level = "info"
//!
//! [palette]
//! red = { r = 117, g = 2, b = 12 }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ansi::StyleTag;
use crate::core::console::ConsoleConfig;
use crate::core::killall::DEFAULT_IDENTIFIER;

const CONFIG_DIR: &str = ".runpane";

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Program directory launched on startup
    pub program_root: Option<PathBuf>,
    /// UI refresh interval
    pub tick_ms: u64,
    pub relay_poll_ms: u64,
    pub relay_idle_ms: u64,
    /// Grace period between SIGTERM and SIGKILL on respawn
    pub respawn_grace_ms: u64,
    pub scrollback_lines: usize,
    /// Substring matched against command lines by `--kill-all`
    pub kill_identifier: String,
    pub log_level: String,
    pub palette: Palette,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            program_root: None,
            tick_ms: 16,
            relay_poll_ms: 5,
            relay_idle_ms: 50,
            respawn_grace_ms: 500,
            scrollback_lines: 5000,
            kill_identifier: DEFAULT_IDENTIFIER.to_string(),
            log_level: "info".to_string(),
            palette: Palette::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// A missing file, or one lacking keys, is written back with every key
    /// present so the file documents the available settings.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from `path`, completing the file when keys are missing
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                return Self::default();
            }
        };

        let config = match toml::from_str::<Config>(&content) {
            Ok(config) => config,
            Err(e) => {
                // Keep the user's file untouched so it can be fixed
                tracing::warn!("Ignoring invalid config: {}", e);
                return Self::default();
            }
        };

        if !has_all_keys(&content, &config) {
            if let Err(e) = config.save_to(path) {
                tracing::warn!("{}", e);
            }
        }
        config
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))?;
        tracing::info!("Wrote complete config to {}", path.display());
        Ok(())
    }

    /// Get config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get log file path
    pub fn log_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("runpane.log"))
    }

    fn config_dir() -> Option<PathBuf> {
        let dir = home_dir()?.join(CONFIG_DIR);
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir)
    }

    /// Runtime settings handed to the console
    pub fn console(&self) -> ConsoleConfig {
        ConsoleConfig {
            relay_poll: Duration::from_millis(self.relay_poll_ms.max(1)),
            relay_idle: Duration::from_millis(self.relay_idle_ms.max(1)),
            respawn_grace: Duration::from_millis(self.respawn_grace_ms),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Color definition (RGB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert to crossterm Color
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        crossterm::style::Color::Rgb {
            r: self.r,
            g: self.g,
            b: self.b,
        }
    }
}

/// Foreground colors for the eight SGR colors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Palette {
    pub black: Color,
    pub red: Color,
    pub green: Color,
    pub yellow: Color,
    pub blue: Color,
    pub magenta: Color,
    pub cyan: Color,
    pub white: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            black: Color::new(0, 0, 0),
            red: Color::new(0x75, 0x02, 0x0c),
            green: Color::new(0x0f, 0x69, 0x03),
            yellow: Color::new(0xb3, 0x9f, 0x07),
            blue: Color::new(0x0f, 0x6b, 0xd4),
            magenta: Color::new(0xff, 0x00, 0xff),
            cyan: Color::new(0x0e, 0xab, 0xa3),
            white: Color::new(0xff, 0xff, 0xff),
        }
    }
}

impl Palette {
    /// Color for a tag, `None` for default styling
    pub fn color_for(&self, tag: StyleTag) -> Option<Color> {
        match tag {
            StyleTag::None => None,
            StyleTag::Black => Some(self.black),
            StyleTag::Red => Some(self.red),
            StyleTag::Green => Some(self.green),
            StyleTag::Yellow => Some(self.yellow),
            StyleTag::Blue => Some(self.blue),
            StyleTag::Magenta => Some(self.magenta),
            StyleTag::Cyan => Some(self.cyan),
            StyleTag::White => Some(self.white),
        }
    }
}

/// Whether `content` spells out every key `config` serializes to
fn has_all_keys(content: &str, config: &Config) -> bool {
    let Ok(present) = toml::from_str::<toml::Table>(content) else {
        return false;
    };
    match toml::Value::try_from(config) {
        Ok(toml::Value::Table(expected)) => table_covers(&present, &expected),
        _ => true,
    }
}

fn table_covers(present: &toml::Table, expected: &toml::Table) -> bool {
    expected.iter().all(|(key, value)| match (present.get(key), value) {
        (Some(toml::Value::Table(inner)), toml::Value::Table(wanted)) => {
            table_covers(inner, wanted)
        }
        (Some(_), _) => true,
        (None, _) => false,
    })
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
