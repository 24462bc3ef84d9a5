//! Decides which bytes are the template: a local upload or a catalog entry.

use bytes::Bytes;
use file_format::FileFormat;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogMode, TemplateChoice};
use crate::error::{FetchError, SourceError};
use crate::http::fetch_bytes;

/// The active template. Selecting a new one replaces the previous variant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TemplateSource {
    #[default]
    None,
    LocalFile {
        bytes: Bytes,
        name: String,
        size: u64,
    },
    RemoteBuffer {
        bytes: Bytes,
        description: String,
        url: String,
    },
}

impl TemplateSource {
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            TemplateSource::None => None,
            TemplateSource::LocalFile { bytes, .. } | TemplateSource::RemoteBuffer { bytes, .. } => Some(bytes),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TemplateSource::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading(String),
    Loaded(String),
    Failed { description: String, message: String },
}

impl LoadStatus {
    pub fn text(&self) -> String {
        match self {
            LoadStatus::Idle => "Aucun template sélectionné".to_string(),
            LoadStatus::Loading(description) => format!("⏳ Chargement de {description}..."),
            LoadStatus::Loaded(label) => format!("✅ {label}"),
            LoadStatus::Failed { description, message } => {
                format!("❌ Impossible de charger {description} : {message}")
            }
        }
    }
}

/// Human readable size, base 1024 with at most two decimals: `12.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

fn is_docx(bytes: &[u8]) -> bool {
    FileFormat::from_bytes(bytes).extension() == "docx"
}

#[derive(Debug, Default)]
pub struct TemplateResolver {
    catalog: CatalogMode,
    choice: Option<TemplateChoice>,
    pending: Option<usize>,
    source: TemplateSource,
    status: LoadStatus,
}

impl TemplateResolver {
    pub fn new(catalog: CatalogMode) -> Self {
        Self {
            catalog,
            ..Self::default()
        }
    }

    pub fn catalog(&self) -> &CatalogMode {
        &self.catalog
    }

    /// Replaces the catalog, keeping a template that is already loaded.
    pub fn set_catalog(&mut self, catalog: CatalogMode) {
        if let Some(index) = self.pending.take() {
            debug!(index, "catalog replaced while a template was loading");
            self.status = LoadStatus::Idle;
        }
        if matches!(self.source, TemplateSource::RemoteBuffer { .. }) {
            self.source = TemplateSource::None;
            self.status = LoadStatus::Idle;
        }
        self.catalog = catalog;
    }

    pub fn choices(&self) -> Vec<TemplateChoice> {
        self.catalog.choices()
    }

    pub fn choice(&self) -> Option<TemplateChoice> {
        self.choice
    }

    pub fn source(&self) -> &TemplateSource {
        &self.source
    }

    pub fn status(&self) -> &LoadStatus {
        &self.status
    }

    pub fn status_text(&self) -> String {
        self.status.text()
    }

    /// Switches to the custom upload option. A remote buffer is dropped until a
    /// local file is chosen.
    pub fn select_custom(&mut self) {
        self.choice = Some(TemplateChoice::Custom);
        self.pending = None;
        if !matches!(self.source, TemplateSource::LocalFile { .. }) {
            self.source = TemplateSource::None;
            self.status = LoadStatus::Idle;
        }
    }

    /// On rejection the previous source is kept.
    pub fn select_local_file(&mut self, name: &str, bytes: impl Into<Bytes>) -> Result<(), SourceError> {
        let bytes = bytes.into();
        if !name.to_ascii_lowercase().ends_with(".docx") {
            return Err(SourceError::NotDocxName(name.to_string()));
        }
        if !is_docx(&bytes) {
            return Err(SourceError::NotDocxContent(name.to_string()));
        }

        let size = bytes.len() as u64;
        info!(name, size, "local template selected");
        self.choice = Some(TemplateChoice::Custom);
        self.pending = None;
        self.status = LoadStatus::Loaded(format!("{name} (Taille: {})", format_file_size(size)));
        self.source = TemplateSource::LocalFile {
            bytes,
            name: name.to_string(),
            size,
        };
        Ok(())
    }

    /// Starts loading catalog entry `index` and returns the URL to fetch.
    pub fn begin_remote(&mut self, index: usize) -> Result<String, SourceError> {
        let entry = self.catalog.entry(index).ok_or(SourceError::UnknownEntry(index))?;
        let url = entry.url.clone();
        self.status = LoadStatus::Loading(entry.description.clone());
        self.choice = Some(TemplateChoice::Entry(index));
        self.pending = Some(index);
        self.source = TemplateSource::None;
        Ok(url)
    }

    /// Applies the outcome of the fetch started by [`begin_remote`](Self::begin_remote).
    /// Returns `false` when the entry is no longer the pending selection.
    pub fn finish_remote(&mut self, index: usize, result: Result<Bytes, FetchError>) -> bool {
        if self.pending != Some(index) {
            debug!(index, "ignoring stale template download");
            return false;
        }
        self.pending = None;
        let Some(entry) = self.catalog.entry(index) else {
            return false;
        };

        match result {
            Ok(bytes) => {
                info!(url = %entry.url, size = bytes.len(), "remote template loaded");
                self.status = LoadStatus::Loaded(entry.description.clone());
                self.source = TemplateSource::RemoteBuffer {
                    bytes,
                    description: entry.description.clone(),
                    url: entry.url.clone(),
                };
            }
            Err(err) => {
                warn!(url = %entry.url, error = %err, "remote template failed to load");
                self.status = LoadStatus::Failed {
                    description: entry.description.clone(),
                    message: err.to_string(),
                };
                self.source = TemplateSource::None;
            }
        }
        true
    }

    pub async fn load_remote(&mut self, client: &Client, index: usize) -> Result<(), SourceError> {
        let url = self.begin_remote(index)?;
        let result = fetch_bytes(client, &url).await;
        self.finish_remote(index, result);
        Ok(())
    }
}
