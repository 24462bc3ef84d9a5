//! Turns the active template and data into `rapport.docx`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use rapport_template::{create_report, Delimiters, ReportOptions, TemplateError};
use serde_json::Value;
use tracing::{error, info};

use crate::data::ReportData;
use crate::error::GenerateError;
use crate::resolver::TemplateSource;

pub const REPORT_FILE_NAME: &str = "rapport.docx";
pub const DOCX_MEDIA_TYPE: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Fills a template with data.
pub trait TemplateEngine: Send + Sync {
    fn create_report(&self, template: &[u8], data: &Value) -> Result<Vec<u8>, TemplateError>;
}

/// Delimiters `{` `}` with the sandbox disabled.
pub fn engine_options() -> ReportOptions {
    ReportOptions {
        cmd_delimiter: Delimiters::new("{", "}"),
        no_sandbox: true,
        ..ReportOptions::default()
    }
}

#[derive(Debug, Clone)]
pub struct DocxEngine {
    options: ReportOptions,
}

impl Default for DocxEngine {
    fn default() -> Self {
        Self {
            options: engine_options(),
        }
    }
}

impl TemplateEngine for DocxEngine {
    fn create_report(&self, template: &[u8], data: &Value) -> Result<Vec<u8>, TemplateError> {
        create_report(template, data, &self.options)
    }
}

/// A generated document ready to be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub file_name: &'static str,
    pub media_type: &'static str,
    pub bytes: Vec<u8>,
}

impl Report {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            file_name: REPORT_FILE_NAME,
            media_type: DOCX_MEDIA_TYPE,
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Writes the report into `dir`, creating it if needed. The bytes go to a
    /// hidden `.part` file first and are renamed into place once complete.
    pub async fn save(&self, dir: &Path) -> Result<PathBuf, GenerateError> {
        let failed = |source| GenerateError::Save {
            file_name: self.file_name,
            source,
        };
        tokio::fs::create_dir_all(dir).await.map_err(failed)?;
        let path = dir.join(self.file_name);
        let partial = dir.join(format!(".{}.part", self.file_name));
        if let Err(err) = tokio::fs::write(&partial, &self.bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(failed(err));
        }
        tokio::fs::rename(&partial, &path).await.map_err(failed)?;
        Ok(path)
    }
}

/// Drives the generate button. `Succeeded` lasts for the confirmation window
/// and `Failed` until its alert is dismissed, then the state is `Idle` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl GenerationState {
    pub fn accepts_requests(self) -> bool {
        self == GenerationState::Idle
    }

    pub fn button_label(self) -> &'static str {
        match self {
            GenerationState::Idle | GenerationState::Failed => "🚀 Générer le rapport",
            GenerationState::Running => "⏳ Génération en cours...",
            GenerationState::Succeeded => "✅ Rapport généré !",
        }
    }
}

/// Checks that both a template and valid data are present.
pub fn prepare(source: &TemplateSource, data: &ReportData) -> Result<(Bytes, Value), GenerateError> {
    let template = source.bytes().ok_or(GenerateError::MissingTemplate)?;
    let data = data.value().ok_or(GenerateError::InvalidData)?;
    Ok((template.clone(), data.clone()))
}

#[derive(Clone)]
pub struct ReportGenerator {
    engine: Arc<dyn TemplateEngine>,
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::new(DocxEngine::default())
    }
}

impl std::fmt::Debug for ReportGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportGenerator").finish_non_exhaustive()
    }
}

impl ReportGenerator {
    pub fn new(engine: impl TemplateEngine + 'static) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Runs the engine once. Engine errors are logged and surface as the
    /// generic user message.
    pub fn generate(&self, template: &[u8], data: &Value) -> Result<Report, GenerateError> {
        match self.engine.create_report(template, data) {
            Ok(bytes) => {
                info!(size = bytes.len(), "report generated");
                Ok(Report::new(bytes))
            }
            Err(err) => {
                error!(error = %err, "report generation failed");
                Err(GenerateError::Engine(err))
            }
        }
    }

    pub fn run(&self, source: &TemplateSource, data: &ReportData) -> Result<Report, GenerateError> {
        let (template, data) = prepare(source, data)?;
        self.generate(&template, &data)
    }
}
