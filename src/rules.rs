use serde::{Deserialize, Serialize};
use crate::classifier::Classifier;
use crate::rewriter::Rewriter;

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RulesConfig {
    pub package_caches: Option<Vec<String>>, // extra package-cache roots, e.g. D:\Installers\Cache
    pub quiet_flag: Option<String>,          // word appended after the uninstall token, default "quiet"
    pub norestart_flag: Option<String>,
}

impl RulesConfig {
    pub fn classifier(&self) -> Result<Classifier, regex::Error> { Classifier::new(self.package_caches.as_deref().unwrap_or(&[])) }

    pub fn rewriter(&self) -> Result<Rewriter, regex::Error> {
        Rewriter::new(self.quiet_flag.as_deref().unwrap_or("quiet"), self.norestart_flag.as_deref().unwrap_or("norestart"))
    }
}

pub fn load_rules(path_opt: Option<&str>) -> Option<RulesConfig> {
    let explicit = path_opt
        .map(|s| s.to_string())
        .or_else(|| std::env::var("WINUNINSTALL_RULES_PATH").ok());
    let p = std::path::PathBuf::from(explicit.clone().unwrap_or_else(|| "rules.json".to_string()));
    let data = match std::fs::read(&p) {
        Ok(d) => d,
        Err(e) => {
            // the implicit default is optional
            if explicit.is_some() { log::warn!("Failed to read rules file {}: {}", p.to_string_lossy(), e); } else { log::debug!("No rules file {}: {}", p.to_string_lossy(), e); }
            return None
        }
    };
    let cfg: RulesConfig = match serde_json::from_slice(&data) { Ok(c) => c, Err(e) => { log::warn!("Failed to parse rules file {}: {}", p.to_string_lossy(), e); return None } };
    Some(cfg)
}
