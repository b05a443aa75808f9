//! Configuration loading
//!
//! The system file `/etc/aegish/config.toml` decides the mode. In
//! production only that file is read, and it must be owned by root and not
//! world-writable. In development a user file (or `--config`) replaces it
//! and `AEGISH_*` variables override individual settings.

use aegish::config::{FailMode, Mode, Role, VarCmdAction};
use aegish::{AegishError, Config, IfsPolicy, Result};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SYSTEM_CONFIG_PATH: &str = "/etc/aegish/config.toml";

/// `~/.config/aegish/config.toml` or the platform equivalent
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("aegish").join("config.toml"))
}

/// Load the effective configuration.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let system = Path::new(SYSTEM_CONFIG_PATH);
    let system_config = if system.exists() {
        Some(read_trusted(system)?)
    } else {
        None
    };

    if let Some(ref cfg) = system_config {
        if cfg.mode == Mode::Production {
            if explicit.is_some() {
                warn!("Ignoring --config in production mode");
            }
            info!("Loaded production configuration from {SYSTEM_CONFIG_PATH}");
            cfg.validate()?;
            return Ok(cfg.clone());
        }
    }

    let user_path = explicit.map(Path::to_path_buf).or_else(|| {
        user_config_path().filter(|p| p.exists())
    });
    let mut config = match user_path {
        Some(path) => {
            debug!("Loading configuration from {}", path.display());
            read(&path)?
        }
        None => system_config.unwrap_or_default(),
    };
    // A user file cannot switch itself into production
    config.mode = Mode::Development;
    apply_env_overrides(&mut config, std::env::vars())?;
    config.validate()?;
    Ok(config)
}

fn read(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).map_err(|source| AegishError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text).map_err(|e| match e {
        AegishError::ConfigParse(msg) => {
            AegishError::ConfigParse(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

pub fn parse(text: &str) -> Result<Config> {
    toml::from_str(text).map_err(|e| AegishError::ConfigParse(e.to_string()))
}

fn read_trusted(path: &Path) -> Result<Config> {
    let meta = std::fs::metadata(path).map_err(|source| AegishError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let config = read(path)?;
    if config.mode == Mode::Production {
        check_ownership(path, meta.uid(), meta.mode())?;
    }
    Ok(config)
}

/// A production config must be root-owned and not writable by others.
pub fn check_ownership(path: &Path, uid: u32, mode: u32) -> Result<()> {
    if uid != 0 {
        return Err(AegishError::ConfigIntegrity {
            path: path.to_path_buf(),
            reason: format!("owned by uid {uid}, not root"),
        });
    }
    if mode & 0o002 != 0 {
        return Err(AegishError::ConfigIntegrity {
            path: path.to_path_buf(),
            reason: format!("world-writable (mode {:o})", mode & 0o7777),
        });
    }
    Ok(())
}

/// Apply `AEGISH_*` overrides. Unknown values are errors.
pub fn apply_env_overrides<I>(config: &mut Config, vars: I) -> Result<()>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(name) = key.strip_prefix("AEGISH_") else {
            continue;
        };
        let bad = || AegishError::ConfigParse(format!("invalid value '{value}' for {key}"));
        match name {
            "FAIL_MODE" => {
                config.policy.fail_mode = match value.as_str() {
                    "safe" => FailMode::Safe,
                    "open" => FailMode::Open,
                    _ => return Err(bad()),
                }
            }
            "ROLE" => {
                config.policy.role = match value.as_str() {
                    "default" => Role::Default,
                    "sysadmin" => Role::Sysadmin,
                    "restricted" => Role::Restricted,
                    _ => return Err(bad()),
                }
            }
            "VAR_CMD_ACTION" => {
                config.policy.var_cmd_action = match value.as_str() {
                    "block" => VarCmdAction::Block,
                    "warn" => VarCmdAction::Warn,
                    _ => return Err(bad()),
                }
            }
            "IFS_POLICY" => {
                config.policy.ifs_policy = match value.as_str() {
                    "normalize" => IfsPolicy::Normalize,
                    "delegate" => IfsPolicy::Delegate,
                    _ => return Err(bad()),
                }
            }
            "CONFIDENCE_THRESHOLD" => {
                config.policy.confidence_threshold = value.parse().map_err(|_| bad())?
            }
            "MAX_DEPTH" => config.resolver.max_depth = value.parse().map_err(|_| bad())?,
            "MAX_SUBSTITUTIONS" => {
                config.resolver.max_substitutions = value.parse().map_err(|_| bad())?
            }
            "MAX_TIME" => config.resolver.max_time_secs = value.parse().map_err(|_| bad())?,
            "CLASSIFIER" => config.classifier.command = Some(PathBuf::from(value)),
            "RUNNER" => config.sandbox.runner_path = Some(PathBuf::from(value)),
            _ => debug!("Ignoring unknown override {key}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn vars(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_ownership_rules() {
        let p = Path::new(SYSTEM_CONFIG_PATH);
        assert!(check_ownership(p, 0, 0o100644).is_ok());
        assert!(matches!(
            check_ownership(p, 1000, 0o100644),
            Err(AegishError::ConfigIntegrity { .. })
        ));
        assert!(matches!(
            check_ownership(p, 0, 0o100666),
            Err(AegishError::ConfigIntegrity { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = Config::default();
        apply_env_overrides(
            &mut cfg,
            vars(&[
                ("AEGISH_FAIL_MODE", "open"),
                ("AEGISH_ROLE", "restricted"),
                ("AEGISH_MAX_DEPTH", "5"),
                ("AEGISH_IFS_POLICY", "delegate"),
                ("HOME", "/home/u"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.policy.fail_mode, FailMode::Open);
        assert_eq!(cfg.policy.role, Role::Restricted);
        assert_eq!(cfg.resolver.max_depth, 5);
        assert_eq!(cfg.policy.ifs_policy, IfsPolicy::Delegate);
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut cfg = Config::default();
        let err = apply_env_overrides(&mut cfg, vars(&[("AEGISH_FAIL_MODE", "yolo")]));
        assert!(err.is_err());
    }

    #[test]
    fn test_read_file_and_parse_error_names_path() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.toml");
        fs::write(&good, "[policy]\nrole = \"sysadmin\"\n").unwrap();
        assert_eq!(read(&good).unwrap().policy.role, Role::Sysadmin);

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "[policy]\nrole = 3\n").unwrap();
        let err = read(&bad).unwrap_err().to_string();
        assert!(err.contains("bad.toml"));
    }

    #[test]
    fn test_missing_file() {
        let err = read(Path::new("/nonexistent/aegish.toml")).unwrap_err();
        assert!(matches!(err, AegishError::ConfigRead { .. }));
    }
}
