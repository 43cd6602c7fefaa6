//! CLI-only preferences: the default safe path and worker backend, kept
//! outside the safe file itself since they have nothing to do with its
//! on-disk format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CliConfig {
    pub safe_path: String,
    pub workers: usize,
    pub process_workers: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        CliConfig {
            safe_path: shellexpand::tilde("~/.quietsafe/safe.qss").to_string(),
            workers: crate::executor::default_worker_count(),
            process_workers: false,
        }
    }
}

fn path() -> PathBuf {
    let home = shellexpand::tilde("~/.quietsafe").to_string();
    PathBuf::from(home).join("config.json")
}

pub fn load() -> Result<CliConfig> {
    let p = path();
    if !p.exists() {
        return Ok(CliConfig::default());
    }
    let data = std::fs::read(&p)?;
    Ok(serde_json::from_slice(&data)?)
}

pub fn save(cfg: &CliConfig) -> Result<()> {
    let p = path();
    std::fs::create_dir_all(p.parent().unwrap())?;
    std::fs::write(p, serde_json::to_vec_pretty(cfg)?)?;
    Ok(())
}

pub fn set(key: &str, value: &str) -> Result<CliConfig> {
    let mut cfg = load()?;
    match key {
        "safe-path" => cfg.safe_path = value.into(),
        "workers" => cfg.workers = value.parse()?,
        "process-workers" => cfg.process_workers = value.parse()?,
        _ => return Err(anyhow::anyhow!("unknown config key: {key}")),
    }
    save(&cfg)?;
    Ok(cfg)
}
