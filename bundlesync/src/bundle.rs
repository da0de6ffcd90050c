//! Bundle descriptors.
//!
//! A bundle is supplied by the caller and never modified. It can be built in
//! code or loaded from JSON:
//!
//! ```json
//! {
//!   "id": "survival-plus",
//!   "archive": "https://cdn.example.com/packs/survival-plus.zip",
//!   "files": ["https://cdn.example.com/mods/sodium.jar"],
//!   "preload": [{ "url": "https://cdn.example.com/mods/optifine.jar", "name": "OptiFine.jar" }]
//! }
//! ```

use std::fs;
use std::path::Path;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, ProvisionResult};
use crate::items::filename_from_url;

/// A file downloaded alongside the bundle, optionally under another name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadItem {
    /// Remote address.
    pub url: String,
    /// Local file name; derived from the URL when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PreloadItem {
    /// Create an item named after its URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
        }
    }

    /// Give the item an explicit local name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Local file name.
    pub fn file_name(&self) -> Option<String> {
        match &self.name {
            Some(name) => Some(name.clone()),
            None => filename_from_url(&self.url),
        }
    }
}

/// One installable content set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedBundle {
    /// Bundle identifier.
    pub id: String,
    /// Packaged archive address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    /// Individually addressed files.
    #[serde(default)]
    pub files: Vec<String>,
    /// Preload files.
    #[serde(default)]
    pub preload: Vec<PreloadItem>,
}

impl ManagedBundle {
    /// Create an empty bundle.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Declare a packaged archive.
    pub fn with_archive(mut self, url: impl Into<String>) -> Self {
        self.archive = Some(url.into());
        self
    }

    /// Declare individual files.
    pub fn with_files<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(urls.into_iter().map(Into::into));
        self
    }

    /// Declare a preload item.
    pub fn with_preload(mut self, item: PreloadItem) -> Self {
        self.preload.push(item);
        self
    }

    /// Parse and validate a JSON descriptor.
    pub fn from_json(text: &str) -> ProvisionResult<Self> {
        let bundle: Self = serde_json::from_str(text)
            .map_err(|e| ProvisionError::InvalidBundle(format!("malformed descriptor: {}", e)))?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Load and validate a JSON descriptor file.
    pub fn load(path: &Path) -> ProvisionResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| ProvisionError::io(path, e))?;
        Self::from_json(&text)
    }

    /// Check the id, every address and every preload name.
    pub fn validate(&self) -> ProvisionResult<()> {
        if self.id.trim().is_empty() {
            return Err(ProvisionError::InvalidBundle("bundle id is empty".to_string()));
        }

        let addresses = self
            .archive
            .iter()
            .chain(&self.files)
            .chain(self.preload.iter().map(|p| &p.url));
        for address in addresses {
            Url::parse(address).map_err(|e| {
                ProvisionError::InvalidBundle(format!("invalid address '{}': {}", address, e))
            })?;
        }

        for item in &self.preload {
            if let Some(name) = &item.name {
                if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
                    return Err(ProvisionError::InvalidBundle(format!(
                        "invalid preload name '{}'",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}
