//! Remote list of selectable templates.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::FetchError;
use crate::http::fetch_json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateCatalogEntry {
    pub description: String,
    pub url: String,
}

/// Whether the catalog is available. `UploadOnly` leaves local files as the
/// only way to pick a template.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CatalogMode {
    Remote(Vec<TemplateCatalogEntry>),
    #[default]
    UploadOnly,
}

/// One entry of the template picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateChoice {
    Entry(usize),
    Custom,
}

impl CatalogMode {
    /// Falls back to upload-only mode when the fetch failed.
    pub fn from_result(result: Result<Vec<TemplateCatalogEntry>, FetchError>) -> Self {
        match result {
            Ok(entries) => {
                info!(entries = entries.len(), "template catalog loaded");
                CatalogMode::Remote(entries)
            }
            Err(err) => {
                warn!(error = %err, "template catalog unavailable, falling back to upload only");
                CatalogMode::UploadOnly
            }
        }
    }

    pub fn entries(&self) -> &[TemplateCatalogEntry] {
        match self {
            CatalogMode::Remote(entries) => entries,
            CatalogMode::UploadOnly => &[],
        }
    }

    pub fn entry(&self, index: usize) -> Option<&TemplateCatalogEntry> {
        self.entries().get(index)
    }

    /// Catalog entries followed by the custom upload option.
    pub fn choices(&self) -> Vec<TemplateChoice> {
        (0..self.entries().len())
            .map(TemplateChoice::Entry)
            .chain(std::iter::once(TemplateChoice::Custom))
            .collect()
    }

    pub fn label(&self, choice: TemplateChoice) -> &str {
        match choice {
            TemplateChoice::Entry(index) => self.entry(index).map_or("", |e| e.description.as_str()),
            TemplateChoice::Custom => "Template personnalisé",
        }
    }
}

pub async fn fetch_catalog(client: &Client, url: &str) -> Result<Vec<TemplateCatalogEntry>, FetchError> {
    fetch_json(client, url).await
}

/// Fetches the catalog when one is configured.
pub async fn load_catalog(client: &Client, url: Option<&str>) -> CatalogMode {
    match url {
        Some(url) => CatalogMode::from_result(fetch_catalog(client, url).await),
        None => {
            info!("no catalog configured, upload only");
            CatalogMode::UploadOnly
        }
    }
}
