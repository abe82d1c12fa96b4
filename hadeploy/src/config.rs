use crate::error::Error;
use crate::models::HostTarget;
use crate::vault::Vault;
use crate::Result;

use chrono::Local;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_VERSION: &str = "1.0";

/// On-disk cluster config. Passwords are stored as vault envelopes and
/// only ever decrypted on the way back in; everything else is plain JSON.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredConfig {
    version: String,
    last_modified: String,
    vms: Vec<StoredVm>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredVm {
    index: u8,
    ip: String,
    hostname: String,
    username: String,
    password: String,
    ssh_port: u16,
    timeout: u64,
}

pub fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").ok_or_else(|| {
        Error::validation("config", "HOME is not set, cannot locate the config file")
    })?;
    Ok(PathBuf::from(home).join(".hadeploy").join("config.json"))
}

pub fn save(path: &Path, targets: &[HostTarget], vault: &Vault) -> Result<()> {
    info!("saving cluster config to {}", path.display());

    let vms = targets
        .iter()
        .map(|target| {
            Ok(StoredVm {
                index: target.index,
                ip: target.ip.clone(),
                hostname: target.hostname.clone(),
                username: target.username.clone(),
                password: vault.encrypt(&target.password)?,
                ssh_port: target.ssh_port,
                timeout: target.timeout_ms,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let config = StoredConfig {
        version: CONFIG_VERSION.to_string(),
        last_modified: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        vms,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&config)?)?;

    info!("cluster config saved, {} hosts", targets.len());
    Ok(())
}

/// Load the cluster config, decrypting each password through the vault.
/// A missing file is an empty cluster, not an error; a malformed file is.
pub fn load(path: &Path, vault: &Vault) -> Result<Vec<HostTarget>> {
    if !path.exists() {
        warn!("config file {} does not exist", path.display());
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(path)?;
    let config: StoredConfig = serde_json::from_str(&raw)?;

    let targets = config
        .vms
        .into_iter()
        .map(|vm| {
            Ok(HostTarget {
                index: vm.index,
                ip: vm.ip,
                hostname: vm.hostname,
                username: vm.username,
                password: vault.decrypt(&vm.password)?,
                ssh_port: vm.ssh_port,
                timeout_ms: vm.timeout,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        "loaded cluster config from {}, {} hosts",
        path.display(),
        targets.len()
    );
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_targets() -> Vec<HostTarget> {
        (1..=3)
            .map(|i| HostTarget {
                index: i,
                ip: format!("192.168.10.10{}", i),
                hostname: format!("hadoop10{}", i),
                username: "hadoop".into(),
                password: format!("secret-{}", i),
                ssh_port: 22,
                timeout_ms: 30_000,
            })
            .collect()
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path().join("keys"));
        let path = dir.path().join("config.json");

        let targets = sample_targets();
        save(&path, &targets, &vault).unwrap();

        let loaded = load(&path, &vault).unwrap();
        assert_eq!(loaded, targets);
    }

    #[test]
    fn passwords_are_not_stored_in_cleartext() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path().join("keys"));
        let path = dir.path().join("config.json");

        save(&path, &sample_targets(), &vault).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("secret-1"));
        assert!(raw.contains("sshPort"));
        assert!(raw.contains("lastModified"));
        assert!(raw.contains(CONFIG_VERSION));
    }

    #[test]
    fn missing_file_is_an_empty_cluster() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path().join("keys"));

        let loaded = load(&dir.path().join("nope.json"), &vault).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path().join("keys"));
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(load(&path, &vault).is_err());
    }
}
