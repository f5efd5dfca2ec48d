//! Configuration loader and validator for the merchant feed services.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub server: Server,
    pub source: Source,
    pub export: Export,
    #[serde(default)]
    pub merchant: Merchant,
    pub catalog: Catalog,
}

/// Feed server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub bind: String,
}

/// Upstream product catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub products_url: String,
    pub timeout_secs: u64,
}

/// CSV export settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Export {
    pub output_dir: String,
    /// URL prefix under which `output_dir` is served.
    pub public_path: String,
    pub valid_file: String,
    pub invalid_file: String,
    pub run_timeout_secs: u64,
    pub required_fields: Vec<String>,
}

/// Merchant feed settings. Only used for logging the upload intent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Merchant {
    #[serde(default)]
    pub merchant_id: Option<String>,
}

/// In-memory catalog service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Catalog {
    pub bind: String,
    #[serde(default)]
    pub seed_file: Option<String>,
}

impl Config {
    /// Ensure required directories exist (creates `export.output_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.export.output_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.export.output_dir)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.export.run_timeout_secs)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.server.bind.trim().is_empty() {
        return Err(ConfigError::Invalid("server.bind must be non-empty"));
    }

    if cfg.source.products_url.trim().is_empty() {
        return Err(ConfigError::Invalid("source.products_url must be non-empty"));
    }
    if cfg.source.timeout_secs == 0 {
        return Err(ConfigError::Invalid("source.timeout_secs must be > 0"));
    }

    let ex = &cfg.export;
    if ex.output_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("export.output_dir must be non-empty"));
    }
    if !ex.public_path.starts_with('/') || ex.public_path.trim_end_matches('/').is_empty() {
        return Err(ConfigError::Invalid(
            "export.public_path must start with '/' and name a path below the root",
        ));
    }
    if ex.valid_file.trim().is_empty() {
        return Err(ConfigError::Invalid("export.valid_file must be non-empty"));
    }
    if ex.invalid_file.trim().is_empty() {
        return Err(ConfigError::Invalid("export.invalid_file must be non-empty"));
    }
    if ex.valid_file == ex.invalid_file {
        return Err(ConfigError::Invalid(
            "export.valid_file and export.invalid_file must differ",
        ));
    }
    if ex.run_timeout_secs == 0 {
        return Err(ConfigError::Invalid("export.run_timeout_secs must be > 0"));
    }
    if ex.required_fields.is_empty() {
        return Err(ConfigError::Invalid("export.required_fields must be non-empty"));
    }
    let mut seen = HashSet::new();
    for field in &ex.required_fields {
        if field.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "export.required_fields must not contain blank names",
            ));
        }
        if !seen.insert(field.as_str()) {
            return Err(ConfigError::Invalid(
                "export.required_fields must not contain duplicates",
            ));
        }
    }

    if cfg.catalog.bind.trim().is_empty() {
        return Err(ConfigError::Invalid("catalog.bind must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML configuration.
pub fn example() -> &'static str {
    r#"server:
  bind: "127.0.0.1:4000"

source:
  products_url: "http://localhost:3000/api/products"
  timeout_secs: 30

export:
  output_dir: "./output"
  public_path: "/output"
  valid_file: "valid_products.csv"
  invalid_file: "invalid_products.csv"
  run_timeout_secs: 120
  required_fields:
    - id
    - title
    - description
    - link
    - image_link
    - price
    - availability
    - brand
    - condition

merchant:
  merchant_id: null

catalog:
  bind: "127.0.0.1:3000"
  seed_file: null
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.export.required_fields.len(), 9);
        assert_eq!(cfg.export.required_fields[0], "id");
        assert_eq!(cfg.export.required_fields[8], "condition");
        assert!(cfg.merchant.merchant_id.is_none());
    }

    #[test]
    fn merchant_section_is_optional() {
        let yaml = example().replace("merchant:\n  merchant_id: null\n", "");
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg.merchant, Merchant::default());
    }

    #[test]
    fn invalid_required_fields() {
        let mut cfg = example_cfg();
        cfg.export.required_fields.clear();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("required_fields")), _ => panic!("wrong error") }

        let mut cfg = example_cfg();
        cfg.export.required_fields.push("id".into());
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("duplicates")), _ => panic!("wrong error") }

        let mut cfg = example_cfg();
        cfg.export.required_fields.push("  ".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_export_files() {
        let mut cfg = example_cfg();
        cfg.export.invalid_file = cfg.export.valid_file.clone();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("must differ")), _ => panic!("wrong error") }

        let mut cfg = example_cfg();
        cfg.export.valid_file = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.export.public_path = "output".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.export.public_path = "/".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_timeouts() {
        let mut cfg = example_cfg();
        cfg.source.timeout_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.export.run_timeout_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_output_dir() {
        let td = tempdir().unwrap();
        let out = td.path().join("nested").join("output");
        let mut cfg = example_cfg();
        cfg.export.output_dir = out.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(out.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:4000");
        assert_eq!(cfg.run_timeout(), Duration::from_secs(120));
    }
}
