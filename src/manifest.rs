//! Update-manifest maintenance for release builds.
//!
//! Inventories a directory of built artifacts and records them as a new
//! release on one channel of the JSON manifest.

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MAX_RELEASES_PER_CHANNEL: usize = 10;
const STABLE_ROLLOUT_PERCENT: u8 = 10;
const DEFAULT_ROLLOUT_PERCENT: u8 = 100;

const DEFAULT_NAME: &str = "FocusBridge";
const DEFAULT_DESCRIPTION: &str = "Browser activity bridge for the LeFocus desktop companion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stable,
    Beta,
    Alpha,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Beta => "beta",
            Channel::Alpha => "alpha",
        }
    }

    pub fn default_rollout(&self) -> u8 {
        match self {
            Channel::Stable => STABLE_ROLLOUT_PERCENT,
            Channel::Beta | Channel::Alpha => DEFAULT_ROLLOUT_PERCENT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Darwin,
    Linux,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X64,
    Arm64,
    Ia32,
}

impl Platform {
    pub fn detect(file_name: &str) -> Self {
        let name = file_name.to_ascii_lowercase();
        if name.ends_with(".exe") || name.ends_with(".msi") {
            Platform::Windows
        } else if name.ends_with(".dmg")
            || name.ends_with(".pkg")
            || name.contains("mac")
            || name.contains("darwin")
        {
            Platform::Darwin
        } else if name.contains("win") {
            Platform::Windows
        } else if name.ends_with(".appimage")
            || name.ends_with(".deb")
            || name.ends_with(".rpm")
            || name.ends_with(".tar.gz")
            || name.contains("linux")
        {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }
}

impl Architecture {
    pub fn detect(file_name: &str) -> Self {
        let name = file_name.to_ascii_lowercase();
        if name.contains("arm64") || name.contains("aarch64") {
            Architecture::Arm64
        } else if name.contains("ia32")
            || name.contains("i386")
            || name.contains("i686")
            || (name.contains("x86") && !name.contains("x86_64") && !name.contains("x86-64"))
        {
            Architecture::Ia32
        } else {
            Architecture::X64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changelog {
    pub summary: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub fixes: Vec<String>,
    #[serde(default)]
    pub breaking: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFile {
    pub name: String,
    pub url: String,
    pub size: u64,
    pub sha256: String,
    pub platform: Platform,
    pub architecture: Architecture,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    pub percentage: u8,
    pub start_date: String,
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub version: String,
    pub release_date: String,
    pub channel: Channel,
    pub changelog: Changelog,
    pub files: Vec<ReleaseFile>,
    pub minimum_version: Option<String>,
    pub critical: bool,
    pub rollout: Rollout,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub current: Option<String>,
    #[serde(default)]
    pub releases: Vec<Release>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channels {
    #[serde(default)]
    pub stable: ChannelEntry,
    #[serde(default)]
    pub beta: ChannelEntry,
    #[serde(default)]
    pub alpha: ChannelEntry,
}

impl Channels {
    pub fn get(&self, channel: Channel) -> &ChannelEntry {
        match channel {
            Channel::Stable => &self.stable,
            Channel::Beta => &self.beta,
            Channel::Alpha => &self.alpha,
        }
    }

    fn get_mut(&mut self, channel: Channel) -> &mut ChannelEntry {
        match channel {
            Channel::Stable => &mut self.stable,
            Channel::Beta => &mut self.beta,
            Channel::Alpha => &mut self.alpha,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    pub description: String,
    pub homepage: String,
    #[serde(default)]
    pub channels: Channels,
    pub updated_at: String,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            homepage: String::new(),
            channels: Channels::default(),
            updated_at: iso(Utc::now()),
        }
    }
}

impl Manifest {
    /// Loads `path`, or starts a fresh manifest when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized + "\n")
            .with_context(|| format!("Failed to write manifest {}", path.display()))
    }

    /// Puts `release` at the head of its channel and makes it current.
    ///
    /// An existing entry with the same version is replaced; the channel
    /// keeps at most [`MAX_RELEASES_PER_CHANNEL`] releases.
    pub fn publish(&mut self, release: Release, now: DateTime<Utc>) {
        let entry = self.channels.get_mut(release.channel);
        entry.releases.retain(|r| r.version != release.version);
        entry.current = Some(release.version.clone());
        entry.releases.insert(0, release);
        entry.releases.truncate(MAX_RELEASES_PER_CHANNEL);
        self.updated_at = iso(now);
    }
}

/// Everything needed to describe one release.
#[derive(Debug, Clone)]
pub struct ReleaseInput {
    pub version: String,
    pub channel: Channel,
    pub base_url: String,
    pub changelog: Changelog,
    pub minimum_version: Option<String>,
    pub critical: bool,
    pub rollout_percentage: Option<u8>,
    pub regions: Vec<String>,
}

impl ReleaseInput {
    pub fn build(&self, files: Vec<ReleaseFile>, now: DateTime<Utc>) -> Result<Release> {
        semver::Version::parse(&self.version)
            .with_context(|| format!("'{}' is not a semantic version", self.version))?;
        if let Some(minimum) = &self.minimum_version {
            semver::Version::parse(minimum)
                .with_context(|| format!("minimum version '{minimum}' is not a semantic version"))?;
        }

        let percentage = self
            .rollout_percentage
            .unwrap_or_else(|| self.channel.default_rollout());
        if percentage > 100 {
            bail!("rollout percentage must be between 0 and 100, got {percentage}");
        }

        let release_date = iso(now);
        let regions = if self.regions.is_empty() {
            vec!["all".to_string()]
        } else {
            self.regions.clone()
        };

        Ok(Release {
            version: self.version.clone(),
            release_date: release_date.clone(),
            channel: self.channel,
            changelog: self.changelog.clone(),
            files,
            minimum_version: self.minimum_version.clone(),
            critical: self.critical,
            rollout: Rollout {
                percentage,
                start_date: release_date,
                regions,
            },
        })
    }
}

/// Hashes every artifact in `dir` (non-recursive, sorted by name).
pub fn scan_artifacts(dir: &Path, base_url: &str, version: &str) -> Result<Vec<ReleaseFile>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read artifacts directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_artifact(path))
        .collect();
    paths.sort();

    let base = base_url.trim_end_matches('/');
    paths
        .iter()
        .map(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let (size, sha256) = hash_file(path)?;
            Ok(ReleaseFile {
                url: format!("{base}/{version}/{name}"),
                size,
                sha256,
                platform: Platform::detect(&name),
                architecture: Architecture::detect(&name),
                name,
            })
        })
        .collect()
}

fn is_artifact(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    !(name.starts_with('.') || name.ends_with(".sha256") || name.ends_with(".sig"))
}

fn hash_file(path: &Path) -> Result<(u64, String)> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("Failed to open artifact {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut size: u64 = 0;

    loop {
        let n = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        if n == 0 {
            break;
        }
        size += n as u64;
        hasher.update(&buffer[..n]);
    }

    Ok((size, hex::encode(hasher.finalize())))
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
