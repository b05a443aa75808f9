//! Linux exec denial using Landlock LSM

use super::{ExecAllowlist, SandboxStatus, SupportInfo};
use crate::error::{AegishError, Result};
use landlock::{
    AccessFs, PathBeneath, PathFd, Ruleset, RulesetAttr, RulesetCreatedAttr, RulesetStatus, ABI,
};
use tracing::{debug, info};

/// Execute access has been handled since the first ABI
const TARGET_ABI: ABI = ABI::V1;

/// Check if Landlock is supported on this system
pub fn is_supported() -> bool {
    Ruleset::default()
        .handle_access(AccessFs::Execute)
        .and_then(|r| r.create())
        .is_ok()
}

/// Get information about Landlock support
pub fn support_info() -> SupportInfo {
    match Ruleset::default()
        .handle_access(AccessFs::Execute)
        .and_then(|r| r.create())
    {
        Ok(_) => SupportInfo {
            is_supported: true,
            platform: "linux",
            details: format!("Landlock available (targeting ABI {:?})", TARGET_ABI),
        },
        Err(_) => SupportInfo {
            is_supported: false,
            platform: "linux",
            details: "Landlock not available. Requires Linux kernel 5.13+ with Landlock enabled."
                .to_string(),
        },
    }
}

/// Restrict exec for this process and its descendants to `allowlist`.
///
/// Only [`AccessFs::Execute`] is handled, so file reads and writes are left
/// alone.
pub fn apply(allowlist: &ExecAllowlist) -> Result<SandboxStatus> {
    let mut ruleset = Ruleset::default()
        .handle_access(AccessFs::Execute)?
        .create()?;

    for path in allowlist.files().chain(allowlist.dirs()) {
        let path_fd = match PathFd::new(path) {
            Ok(fd) => fd,
            Err(e) => {
                // Removed since the allowlist was built
                debug!("Skipping exec rule for {}: {e}", path.display());
                continue;
            }
        };
        ruleset = ruleset
            .add_rule(PathBeneath::new(path_fd, AccessFs::Execute))
            .map_err(|e| {
                AegishError::SandboxInit(format!(
                    "Cannot add Landlock rule for {}: {e}",
                    path.display()
                ))
            })?;
    }
    debug!("Landlock exec rules: {}", allowlist.len());

    // Irreversible from here on
    let status = ruleset
        .restrict_self()
        .map_err(|e| AegishError::SandboxInit(format!("Failed to restrict self: {e}")))?;

    match status.ruleset {
        RulesetStatus::FullyEnforced | RulesetStatus::PartiallyEnforced => {
            info!("Landlock exec denial enforced");
            Ok(SandboxStatus::Enforced)
        }
        RulesetStatus::NotEnforced => Err(AegishError::SandboxInit(
            "Landlock sandbox was not enforced".to_string(),
        )),
    }
}
