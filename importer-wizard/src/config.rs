// Application configuration
//
// Layering (lowest first): built-in defaults, optional TOML file, FRAPPE_IMPORTER_* env vars.

use crate::selection::Recommendations;
use crate::utils::path_resolver;
use crate::utils::validation::{validate_batch_size, validate_site_url};
use crate::wizard::StepLayout;
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "FRAPPE_IMPORTER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend_url: String,
    pub request_timeout_secs: u64,
    /// `POST /import` answers only after the last batch, so it gets its own budget.
    pub import_timeout_secs: u64,
    pub default_batch_size: u32,
    pub poll_interval_ms: u64,
    pub step_layout: StepLayout,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
    /// Target type -> recommended field keys (`fieldname` or `table.fieldname`).
    pub recommended_fields: BTreeMap<String, Vec<String>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5000/api".to_string(),
            request_timeout_secs: 30,
            import_timeout_secs: 3600,
            default_batch_size: 100,
            poll_interval_ms: 2000,
            step_layout: StepLayout::FourStep,
            session_file: None,
            template_dir: None,
            recommended_fields: default_recommended_fields(),
        }
    }
}

fn default_recommended_fields() -> BTreeMap<String, Vec<String>> {
    let customer = [
        "customer_name",
        "customer_type",
        "customer_group",
        "territory",
        "address.address_line1",
        "address.city",
        "address.state",
        "address.country",
        "address.pincode",
        "address.address_type",
        "address.is_primary_address",
        "tax_id",
        "gstin",
    ];
    let mut map = BTreeMap::new();
    map.insert(
        "Customer".to_string(),
        customer.iter().map(|s| s.to_string()).collect(),
    );
    map
}

impl AppConfig {
    /// Load from `path` (must exist) or the default config file (optional), then env.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Same as [`AppConfig::load`] with an explicit environment map instead of the process env.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(p) => {
                builder = builder.add_source(config::File::from(p.to_path_buf()).required(true));
            }
            None => {
                if let Some(default) = path_resolver::default_config_file() {
                    builder = builder.add_source(config::File::from(default).required(false));
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        let cfg: AppConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        cfg.validate()?;

        info!(
            "[PHASE: config] [STEP: load] backend {} layout {:?} poll {}ms",
            crate::utils::logging::mask_url_credentials(&cfg.backend_url),
            cfg.step_layout,
            cfg.poll_interval_ms
        );
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        validate_site_url(&self.backend_url).context("backend_url")?;
        validate_batch_size(self.default_batch_size).context("default_batch_size")?;
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        if self.import_timeout_secs < self.request_timeout_secs {
            anyhow::bail!("import_timeout_secs must not be shorter than request_timeout_secs");
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn import_timeout(&self) -> Duration {
        Duration::from_secs(self.import_timeout_secs)
    }

    pub fn session_path(&self) -> PathBuf {
        self.session_file
            .clone()
            .unwrap_or_else(path_resolver::default_session_file)
    }

    pub fn template_folder(&self) -> PathBuf {
        self.template_dir
            .clone()
            .unwrap_or_else(path_resolver::default_template_folder)
    }

    pub fn recommendations(&self) -> Recommendations {
        let raw: HashMap<String, Vec<String>> = self
            .recommended_fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Recommendations::from_config(&raw)
    }
}
