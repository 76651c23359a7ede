//! Image profiles
//!
//! A profile is a TOML file overriding the built-in defaults. All keys are optional:
//!
//! ```toml
//! [app]
//! magic = 0xDEADBEEF
//! version = "1.0.0.0"
//! entry_point = 0x08040100
//!
//! [bootloader]
//! block_offset = 0x8000
//! final_size = 254016
//!
//! [secrets]
//! service = "secboot_secrets"
//! store = "keys/secrets.toml"
//! provision = ["python3", "./store_keys.py"]
//! ```

use std::path::{Path, PathBuf};
use std::string::{String, ToString};
use std::vec::Vec;

use serde::Deserialize;

use crate::header::FirmwareVersion;
use crate::image::{AppMetadata, BootloaderLayout};
use crate::Error;

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppSection {
    pub magic: Option<u32>,
    pub version: Option<String>,
    pub entry_point: Option<u32>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootloaderSection {
    pub block_offset: Option<usize>,
    pub final_size: Option<usize>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretsSection {
    /// Service namespace the secrets are stored under
    pub service: Option<String>,
    /// TOML secret store; the environment is used when absent
    pub store: Option<PathBuf>,
    /// Command run once when secrets are missing
    pub provision: Option<Vec<String>>,
}

/// An image profile
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub bootloader: BootloaderSection,
    #[serde(default)]
    pub secrets: SecretsSection,
}

impl Profile {
    /// Load a profile from a TOML file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;

        Self::parse(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(std::format!("`{}`: {}", path.display(), msg)),
            e => e,
        })
    }

    /// Parse a profile from TOML text
    pub fn parse(text: &str) -> Result<Self, Error> {
        let profile: Self = toml::from_str(text)
            .map_err(|e| Error::Config(std::format!("Invalid profile: {}", e)))?;

        // Validate the version string
        profile.app_metadata()?;

        Ok(profile)
    }

    /// Application metadata, with defaults for the keys the profile does not set
    pub fn app_metadata(&self) -> Result<AppMetadata, Error> {
        let defaults = AppMetadata::default();

        let version = match &self.app.version {
            Some(version) => version.parse::<FirmwareVersion>().map_err(|e| {
                Error::Config(std::format!("Invalid version `{}`: {}", version, e))
            })?,
            None => defaults.version,
        };

        Ok(AppMetadata {
            magic: self.app.magic.unwrap_or(defaults.magic),
            version,
            entry_point: self.app.entry_point.unwrap_or(defaults.entry_point),
        })
    }

    /// Bootloader layout, with defaults for the keys the profile does not set
    pub fn bootloader_layout(&self) -> BootloaderLayout {
        let defaults = BootloaderLayout::default();

        BootloaderLayout {
            block_offset: self.bootloader.block_offset.unwrap_or(defaults.block_offset),
            final_size: self.bootloader.final_size.unwrap_or(defaults.final_size),
        }
    }

    /// Secret service namespace
    pub fn service(&self) -> String {
        self.secrets
            .service
            .clone()
            .unwrap_or_else(|| crate::secrets::SERVICE.to_string())
    }
}
