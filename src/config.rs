//! Process settings and extraction profiles.
//!
//! Settings come from the environment (a `.env` file is honoured). Profiles
//! describe the prompt and column mappings for one invoice layout; the
//! built-in `arabic_vat` profile is always available and additional ones can
//! be loaded from a `CONFIG_DIR` of JSON files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::schema::FIELD_NAMES;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-04-17";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_PROFILE: &str = "arabic_vat";

/// Process-wide settings resolved once at start-up.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub upload_dir: PathBuf,
    pub bind_addr: String,
    pub max_upload_bytes: usize,
    pub config_dir: Option<PathBuf>,
}

impl Settings {
    /// Read settings from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("GEMINI_API_KEY").context("GEMINI_API_KEY environment variable not set")?;

        let temperature = match get("GEMINI_TEMPERATURE") {
            Some(raw) => raw
                .trim()
                .parse::<f32>()
                .with_context(|| format!("GEMINI_TEMPERATURE is not a number: {:?}", raw))?,
            None => DEFAULT_TEMPERATURE,
        };

        let max_upload_bytes = match get("MAX_UPLOAD_BYTES") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("MAX_UPLOAD_BYTES is not a byte count: {:?}", raw))?,
            None => 20 * 1024 * 1024,
        };

        Ok(Self {
            api_key,
            model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: get("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            temperature,
            upload_dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            max_upload_bytes,
            config_dir: get("CONFIG_DIR").map(PathBuf::from),
        })
    }
}

/// Prompt and column mapping for one invoice layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub name: String,
    pub description: String,
    pub prompts: Prompts,
    pub field_mappings: Vec<FieldMapping>,
    /// Overrides the process-wide sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompts {
    /// Opening lines of the system instruction (role and input description)
    pub preamble: String,
    /// Output rules appended after the column mappings
    pub rules: String,
}

/// Maps a column label printed on the invoice to an item field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field: String,
    pub source_label: String,
}

impl ExtractionConfig {
    fn check_fields(&self) -> Result<()> {
        for mapping in &self.field_mappings {
            if !FIELD_NAMES.contains(&mapping.field.as_str()) {
                anyhow::bail!(
                    "Config '{}' maps unknown field '{}'. Known fields: {:?}",
                    self.name,
                    mapping.field,
                    FIELD_NAMES
                );
            }
        }
        Ok(())
    }
}

/// Listing entry for `GET /configs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSummary {
    pub name: String,
    pub description: String,
}

/// In-memory store of extraction profiles.
#[derive(Debug)]
pub struct ConfigStore {
    configs: HashMap<String, ExtractionConfig>,
}

impl ConfigStore {
    /// A store holding only the built-in profile.
    pub fn builtin() -> Self {
        let default = create_default_config();
        Self {
            configs: HashMap::from([(default.name.clone(), default)]),
        }
    }

    /// Load every `*.json` profile in `dir` on top of the built-in one.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            anyhow::bail!("Config directory does not exist: {:?}", dir);
        }

        let mut store = Self::builtin();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config: {:?}", path))?;

                let config: ExtractionConfig = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse config: {:?}", path))?;
                config.check_fields()?;

                info!("Loaded config: {} from {:?}", config.name, path);
                store.configs.insert(config.name.clone(), config);
            }
        }

        Ok(store)
    }

    pub fn get(&self, name: &str) -> Option<&ExtractionConfig> {
        self.configs.get(name)
    }

    /// The requested profile, or the built-in default when none is named.
    pub fn resolve(&self, name: Option<&str>) -> Option<&ExtractionConfig> {
        self.get(name.unwrap_or(DEFAULT_PROFILE))
    }

    /// Name and description of every profile, sorted by name.
    pub fn summaries(&self) -> Vec<ConfigSummary> {
        let mut summaries: Vec<ConfigSummary> = self
            .configs
            .values()
            .map(|c| ConfigSummary {
                name: c.name.clone(),
                description: c.description.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// List all available profile names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }
}

/// The Arabic VAT invoice profile.
pub fn create_default_config() -> ExtractionConfig {
    let mapping = |field: &str, source_label: &str| FieldMapping {
        field: field.to_string(),
        source_label: source_label.to_string(),
    };

    ExtractionConfig {
        name: DEFAULT_PROFILE.to_string(),
        description: "Line items from Arabic VAT invoices".to_string(),
        prompts: Prompts {
            preamble: "You are a helpful assistant specialized in extracting structured data from images of Arabic VAT invoices.\n\
                       The user will provide an image of an invoice."
                .to_string(),
            rules: "Return the extracted information in strict JSON format under a key called 'items'.\n\
                    Ensure Unit Price, Quantity, Tax Amount, and Total Amount are numeric values (not strings) and exclude currency symbols.\n\
                    Do not include any explanations, comments, or additional text. Only return the JSON object."
                .to_string(),
        },
        field_mappings: vec![
            mapping("Item ID", "رقم الصنف"),
            mapping("Item Description", "الوصف"),
            mapping("Unit Price", "السعر"),
            mapping("Quantity", "الكميه"),
            mapping("Tax Amount", "15%الضريبة%"),
            mapping("Total Amount", "الاجمالي"),
        ],
        temperature: None,
    }
}
