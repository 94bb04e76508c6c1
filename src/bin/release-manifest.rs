use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use focusbridge_lib::manifest::{scan_artifacts, Changelog, Channel, Manifest, ReleaseInput};
use focusbridge_lib::utils::init_logging;

/// Record a build's artifacts as a new release in the update manifest.
#[derive(Debug, Parser)]
#[command(name = "release-manifest")]
struct Cli {
    /// Manifest file to update (created when missing)
    #[arg(long, default_value = "update-manifest.json")]
    manifest: PathBuf,

    /// Directory holding the built artifacts
    #[arg(long)]
    artifacts: PathBuf,

    /// Semantic version of the release
    #[arg(long)]
    version: String,

    #[arg(long, value_enum, default_value_t = Channel::Stable)]
    channel: Channel,

    /// Download prefix; files resolve to <base-url>/<version>/<name>
    #[arg(long)]
    base_url: String,

    #[arg(long, default_value = "")]
    summary: String,

    #[arg(long = "feature")]
    features: Vec<String>,

    #[arg(long = "fix")]
    fixes: Vec<String>,

    #[arg(long = "breaking")]
    breaking: Vec<String>,

    #[arg(long)]
    minimum_version: Option<String>,

    #[arg(long)]
    critical: bool,

    /// Rollout percentage (defaults to 10 on stable, 100 elsewhere)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    rollout: Option<u8>,

    #[arg(long = "region")]
    regions: Vec<String>,

    /// Project homepage recorded at the top of the manifest
    #[arg(long)]
    homepage: Option<String>,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let input = ReleaseInput {
        version: cli.version,
        channel: cli.channel,
        base_url: cli.base_url,
        changelog: Changelog {
            summary: cli.summary,
            features: cli.features,
            fixes: cli.fixes,
            breaking: cli.breaking,
        },
        minimum_version: cli.minimum_version,
        critical: cli.critical,
        rollout_percentage: cli.rollout,
        regions: cli.regions,
    };

    let files = scan_artifacts(&cli.artifacts, &input.base_url, &input.version)?;
    if files.is_empty() {
        log::warn!("no artifacts found in {}", cli.artifacts.display());
    }

    let now = Utc::now();
    let release = input.build(files, now)?;
    let file_count = release.files.len();

    let mut manifest = Manifest::load_or_default(&cli.manifest)?;
    if let Some(homepage) = cli.homepage {
        manifest.homepage = homepage;
    }
    manifest.publish(release, now);
    manifest
        .save(&cli.manifest)
        .with_context(|| format!("could not update {}", cli.manifest.display()))?;

    log::info!(
        "published {} to {} with {} file(s) in {}",
        input.version,
        input.channel.as_str(),
        file_count,
        cli.manifest.display()
    );
    Ok(())
}
