//! Conda-Env-Manager: toolchain and environment provisioning for Switchboard
//!
//! This crate provides the environment layer: it bootstraps a Miniconda
//! toolchain, creates one named conda environment per project and activates
//! an environment by rewriting the search path of an
//! [`ExecutionContext`](switchboard_core::ExecutionContext).
//!
//! ## Modules
//!
//! - [`toolchain`]: installer download and batch install
//! - [`manager`]: `conda` listing, creation and installs
//! - [`provisioner`]: the idempotent bootstrap / check-then-create / activate flow

pub mod error;
pub mod fakes;
pub mod manager;
pub mod provisioner;
pub mod toolchain;

pub use error::EnvError;
pub use manager::{env_bin_dir, parse_env_list, CondaManager, EnvironmentManager};
pub use provisioner::{Bootstrap, EnvironmentProvisioner};
pub use toolchain::{
    MinicondaInstaller, Platform, ToolchainConfig, ToolchainInstaller, ToolchainLayout,
    DEFAULT_INSTALLER_FILE, DEFAULT_TOOLCHAIN_DIR, MINICONDA_BASE_URL,
};

/// Result type for environment operations
pub type Result<T> = std::result::Result<T, EnvError>;

/// Check if `conda` resolves on the search path of `ctx`
pub fn is_conda_available(ctx: &switchboard_core::ExecutionContext) -> bool {
    ctx.path_entries()
        .iter()
        .any(|dir| dir.join("conda").is_file())
}
