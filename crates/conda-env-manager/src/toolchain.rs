//! Base toolchain (Miniconda) download and installation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use switchboard_core::{CommandLine, CommandRunner, ExecutionContext};
use tracing::{debug, info};

use crate::error::EnvError;
use crate::Result;

/// Where installers are published.
pub const MINICONDA_BASE_URL: &str = "https://repo.continuum.io/miniconda/";

/// Default install directory name, relative to the run's base directory.
pub const DEFAULT_TOOLCHAIN_DIR: &str = "miniconda3";

/// Default installer file name, relative to the run's base directory.
pub const DEFAULT_INSTALLER_FILE: &str = "miniconda.sh";

/// Platforms with a published installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    LinuxX86_64,
    LinuxAarch64,
    MacOsX86_64,
    MacOsArm64,
}

impl Platform {
    /// Platform of the running process.
    pub fn detect() -> Result<Self> {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn from_parts(os: &str, arch: &str) -> Result<Self> {
        match (os, arch) {
            ("linux", "x86_64") => Ok(Platform::LinuxX86_64),
            ("linux", "aarch64") => Ok(Platform::LinuxAarch64),
            ("macos", "x86_64") => Ok(Platform::MacOsX86_64),
            ("macos", "aarch64") => Ok(Platform::MacOsArm64),
            _ => Err(EnvError::UnsupportedPlatform(format!("{os}-{arch}"))),
        }
    }

    /// Platform tag used in installer file names.
    pub fn installer_tag(&self) -> &'static str {
        match self {
            Platform::LinuxX86_64 => "Linux-x86_64",
            Platform::LinuxAarch64 => "Linux-aarch64",
            Platform::MacOsX86_64 => "MacOSX-x86_64",
            Platform::MacOsArm64 => "MacOSX-arm64",
        }
    }

    pub fn installer_url(&self) -> String {
        format!(
            "{}Miniconda3-latest-{}.sh",
            MINICONDA_BASE_URL,
            self.installer_tag()
        )
    }
}

/// Directories of an installed toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainLayout {
    pub root: PathBuf,
}

impl ToolchainLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Primary executables directory.
    pub fn bin(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// Secondary directory holding the `conda` entry point.
    pub fn condabin(&self) -> PathBuf {
        self.root.join("condabin")
    }

    /// Directories to put in front of the search path, in order.
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        vec![self.bin(), self.condabin()]
    }
}

/// Toolchain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Install directory
    pub root: PathBuf,
    /// Where the downloaded installer is kept between runs
    pub installer_path: PathBuf,
    /// Installer URL; derived from the platform when unset
    pub installer_url: Option<String>,
}

impl ToolchainConfig {
    /// Defaults relative to `base_dir`.
    pub fn new(base_dir: &Path) -> Self {
        ToolchainConfig {
            root: base_dir.join(DEFAULT_TOOLCHAIN_DIR),
            installer_path: base_dir.join(DEFAULT_INSTALLER_FILE),
            installer_url: None,
        }
    }

    /// Defaults relative to `base_dir`, overridden by
    /// `SWITCHBOARD_TOOLCHAIN_DIR` and `SWITCHBOARD_INSTALLER_URL`.
    pub fn from_env(base_dir: &Path) -> Self {
        let mut config = Self::new(base_dir);
        if let Ok(root) = std::env::var("SWITCHBOARD_TOOLCHAIN_DIR") {
            config.root = base_dir.join(root);
        }
        config.installer_url = std::env::var("SWITCHBOARD_INSTALLER_URL").ok();
        config
    }

    pub fn with_root(mut self, root: PathBuf) -> Self {
        self.root = root;
        self
    }

    pub fn with_installer_url(mut self, url: Option<String>) -> Self {
        if url.is_some() {
            self.installer_url = url;
        }
        self
    }

    pub fn layout(&self) -> ToolchainLayout {
        ToolchainLayout::new(self.root.clone())
    }

    /// Configured URL, or the published installer for this platform.
    pub fn resolve_installer_url(&self) -> Result<String> {
        match &self.installer_url {
            Some(url) => Ok(url.clone()),
            None => Ok(Platform::detect()?.installer_url()),
        }
    }
}

/// Fetches and installs the base toolchain.
#[async_trait]
pub trait ToolchainInstaller: Send + Sync {
    /// Whether a toolchain is already present at `layout`.
    fn is_installed(&self, layout: &ToolchainLayout) -> bool;

    /// Install the toolchain into `layout.root`.
    async fn install(&self, ctx: &ExecutionContext, layout: &ToolchainLayout) -> Result<()>;
}

/// Installs Miniconda by running its batch-mode shell installer.
pub struct MinicondaInstaller {
    config: ToolchainConfig,
    runner: Arc<dyn CommandRunner>,
    http_client: reqwest::Client,
}

impl MinicondaInstaller {
    pub fn new(config: ToolchainConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("switchboard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(MinicondaInstaller {
            config,
            runner,
            http_client,
        })
    }

    /// Download the installer unless a previous run left it in place.
    async fn ensure_installer(&self) -> Result<PathBuf> {
        let path = self.config.installer_path.clone();
        if path.exists() {
            debug!(path = %path.display(), "installer already downloaded");
            return Ok(path);
        }

        let url = self.config.resolve_installer_url()?;
        info!(url = %url, "downloading toolchain installer");
        let bytes = self
            .http_client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        // Write under a temporary name so an interrupted download is retried.
        let partial = path.with_extension("partial");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &path).await?;
        Ok(path)
    }
}

#[async_trait]
impl ToolchainInstaller for MinicondaInstaller {
    fn is_installed(&self, layout: &ToolchainLayout) -> bool {
        layout.root.exists()
    }

    async fn install(&self, ctx: &ExecutionContext, layout: &ToolchainLayout) -> Result<()> {
        let installer = self.ensure_installer().await?;
        let command = CommandLine::new(["bash"])
            .arg(installer.to_string_lossy())
            .arg("-b")
            .arg("-p")
            .arg(layout.root.to_string_lossy());
        self.runner.execute(ctx, &command).await?;
        Ok(())
    }
}
