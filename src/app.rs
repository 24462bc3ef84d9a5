//! Application state and its transitions.
//!
//! Front ends send [`Action`]s into [`AppState::update`] and execute the
//! returned [`Effect`]s, feeding their outcome back as new actions.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogMode, TemplateCatalogEntry};
use crate::data::DataEditor;
use crate::error::{FetchError, GenerateError};
use crate::generator::{prepare, GenerationState, Report};
use crate::resolver::TemplateResolver;

pub const DEFAULT_CONFIRMATION: Duration = Duration::from_millis(2000);

#[derive(Debug)]
pub enum Action {
    CatalogLoaded(Result<Vec<TemplateCatalogEntry>, FetchError>),
    CustomSelected,
    LocalFileChosen { name: String, bytes: Bytes },
    RemoteSelected(usize),
    RemoteLoaded { index: usize, result: Result<Bytes, FetchError> },
    DefaultDataLoaded(Value),
    DataEdited(String),
    GenerateRequested,
    ReportFinished(Result<Report, GenerateError>),
    ReportSaved(Result<PathBuf, GenerateError>),
    AlertDismissed,
    ConfirmationElapsed,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchTemplate { index: usize, url: String },
    RunEngine { template: Bytes, data: Value },
    Download(Report),
    ScheduleReset(Duration),
    Alert(String),
}

#[derive(Debug)]
pub struct AppState {
    pub resolver: TemplateResolver,
    pub editor: DataEditor,
    pub generation: GenerationState,
    /// Last message shown to the user.
    pub notice: Option<String>,
    confirmation: Duration,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRMATION)
    }
}

impl AppState {
    pub fn new(confirmation: Duration) -> Self {
        Self {
            resolver: TemplateResolver::new(CatalogMode::UploadOnly),
            editor: DataEditor::new(),
            generation: GenerationState::Idle,
            notice: None,
            confirmation,
        }
    }

    pub fn confirmation(&self) -> Duration {
        self.confirmation
    }

    fn alert(&mut self, message: String) -> Vec<Effect> {
        self.notice = Some(message.clone());
        vec![Effect::Alert(message)]
    }

    pub fn update(mut self, action: Action) -> (Self, Vec<Effect>) {
        let effects = match action {
            Action::CatalogLoaded(result) => {
                self.resolver.set_catalog(CatalogMode::from_result(result));
                Vec::new()
            }
            Action::CustomSelected => {
                self.resolver.select_custom();
                Vec::new()
            }
            Action::LocalFileChosen { name, bytes } => match self.resolver.select_local_file(&name, bytes) {
                Ok(()) => Vec::new(),
                Err(err) => {
                    warn!(name = %name, error = %err, "template rejected");
                    self.alert(err.to_string())
                }
            },
            Action::RemoteSelected(index) => match self.resolver.begin_remote(index) {
                Ok(url) => vec![Effect::FetchTemplate { index, url }],
                Err(err) => self.alert(err.to_string()),
            },
            Action::RemoteLoaded { index, result } => {
                self.resolver.finish_remote(index, result);
                Vec::new()
            }
            Action::DefaultDataLoaded(value) => {
                self.editor.load(value);
                Vec::new()
            }
            Action::DataEdited(text) => {
                self.editor.set_text(text);
                Vec::new()
            }
            Action::GenerateRequested => self.request_generation(),
            Action::ReportFinished(Ok(report)) => {
                info!(size = report.len(), "report ready");
                vec![Effect::Download(report)]
            }
            Action::ReportSaved(Ok(path)) => {
                info!(path = %path.display(), "report saved");
                self.generation = GenerationState::Succeeded;
                vec![Effect::ScheduleReset(self.confirmation)]
            }
            Action::ReportFinished(Err(err)) | Action::ReportSaved(Err(err)) => {
                error!(error = ?err, "generation failed");
                self.generation = GenerationState::Failed;
                self.alert(err.to_string())
            }
            Action::AlertDismissed => {
                if self.generation == GenerationState::Failed {
                    self.generation = GenerationState::Idle;
                }
                Vec::new()
            }
            Action::ConfirmationElapsed => {
                if self.generation == GenerationState::Succeeded {
                    self.generation = GenerationState::Idle;
                }
                Vec::new()
            }
        };
        (self, effects)
    }

    fn request_generation(&mut self) -> Vec<Effect> {
        if !self.generation.accepts_requests() {
            debug!(state = ?self.generation, "generation already in progress");
            return Vec::new();
        }
        match prepare(self.resolver.source(), self.editor.data()) {
            Ok((template, data)) => {
                self.generation = GenerationState::Running;
                self.notice = None;
                vec![Effect::RunEngine { template, data }]
            }
            Err(err) => {
                warn!(error = %err, "generation refused");
                self.alert(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TemplateChoice;
    use crate::data::EditorFlag;
    use crate::resolver::tests::docx_bytes;
    use crate::resolver::TemplateSource;
    use serde_json::json;

    fn apply(state: AppState, actions: Vec<Action>) -> (AppState, Vec<Effect>) {
        actions.into_iter().fold((state, Vec::new()), |(state, _), action| state.update(action))
    }

    fn entries() -> Vec<TemplateCatalogEntry> {
        vec![TemplateCatalogEntry {
            description: "Cardio".into(),
            url: "https://templates.example/cardio.docx".into(),
        }]
    }

    #[test]
    fn generate_without_template_alerts() {
        let (state, effects) = apply(
            AppState::default(),
            vec![Action::DefaultDataLoaded(json!({})), Action::GenerateRequested],
        );
        assert_eq!(effects, vec![Effect::Alert("Merci de sélectionner un template DOCX".into())]);
        assert_eq!(state.generation, GenerationState::Idle);
        assert_eq!(state.notice.as_deref(), Some("Merci de sélectionner un template DOCX"));
    }

    #[test]
    fn invalid_json_blocks_generation() {
        let (state, effects) = apply(
            AppState::default(),
            vec![
                Action::LocalFileChosen {
                    name: "t.docx".into(),
                    bytes: docx_bytes().into(),
                },
                Action::DataEdited("{ \"patient\": ".into()),
                Action::GenerateRequested,
            ],
        );
        assert_eq!(state.editor.flag(), Some(EditorFlag::Invalid));
        assert_eq!(effects, vec![Effect::Alert("Merci de fournir des données JSON valides".into())]);

        let (state, effects) = state.update(Action::DataEdited("{}".into()));
        assert!(effects.is_empty());
        assert_eq!(state.editor.flag(), Some(EditorFlag::Valid));
    }

    #[test]
    fn successful_generation_cycle() {
        let template: Bytes = docx_bytes().into();
        let (state, effects) = apply(
            AppState::new(Duration::from_millis(10)),
            vec![
                Action::DefaultDataLoaded(json!({ "a": 1 })),
                Action::LocalFileChosen {
                    name: "t.docx".into(),
                    bytes: template.clone(),
                },
                Action::GenerateRequested,
            ],
        );
        assert_eq!(
            effects,
            vec![Effect::RunEngine {
                template,
                data: json!({ "a": 1 })
            }]
        );
        assert_eq!(state.generation, GenerationState::Running);

        let (state, effects) = state.update(Action::GenerateRequested);
        assert!(effects.is_empty());

        let report = Report::new(b"out".to_vec());
        let (state, effects) = state.update(Action::ReportFinished(Ok(report.clone())));
        assert_eq!(effects, vec![Effect::Download(report)]);
        assert_eq!(state.generation, GenerationState::Running);

        let (state, effects) = state.update(Action::ReportSaved(Ok(PathBuf::from("rapport.docx"))));
        assert_eq!(effects, vec![Effect::ScheduleReset(Duration::from_millis(10))]);
        assert_eq!(state.generation, GenerationState::Succeeded);

        let (state, _) = state.update(Action::ConfirmationElapsed);
        assert_eq!(state.generation, GenerationState::Idle);
    }

    #[test]
    fn engine_failure_reenables_generation() {
        let (state, _) = apply(
            AppState::default(),
            vec![
                Action::DefaultDataLoaded(json!({})),
                Action::LocalFileChosen {
                    name: "t.docx".into(),
                    bytes: docx_bytes().into(),
                },
                Action::GenerateRequested,
            ],
        );
        let failure = GenerateError::Engine(rapport_template::TemplateError::Structure("x".into()));
        let (state, effects) = state.update(Action::ReportFinished(Err(failure)));

        assert_eq!(
            effects,
            vec![Effect::Alert(
                "Erreur lors de la génération du rapport. Vérifiez le template et les données.".into()
            )]
        );
        assert_eq!(state.generation, GenerationState::Failed);
        assert!(!state.generation.accepts_requests());

        let (state, _) = state.update(Action::AlertDismissed);
        assert_eq!(state.generation, GenerationState::Idle);
        let (_, effects) = state.update(Action::GenerateRequested);
        assert!(matches!(effects.as_slice(), [Effect::RunEngine { .. }]));
    }

    #[test]
    fn save_failure_is_reported_without_confirmation() {
        let (state, _) = apply(
            AppState::default(),
            vec![
                Action::DefaultDataLoaded(json!({})),
                Action::LocalFileChosen {
                    name: "t.docx".into(),
                    bytes: docx_bytes().into(),
                },
                Action::GenerateRequested,
                Action::ReportFinished(Ok(Report::new(b"out".to_vec()))),
            ],
        );
        let failure = GenerateError::Save {
            file_name: "rapport.docx",
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        let (state, effects) = state.update(Action::ReportSaved(Err(failure)));

        assert!(matches!(effects.as_slice(), [Effect::Alert(message)] if message.starts_with("Impossible d'enregistrer rapport.docx")));
        assert_eq!(state.generation, GenerationState::Failed);
        assert_ne!(state.generation.button_label(), "✅ Rapport généré !");

        let (state, _) = state.update(Action::AlertDismissed);
        assert_eq!(state.generation, GenerationState::Idle);
    }

    #[test]
    fn remote_selection_replaces_local_file() {
        let (state, effects) = apply(
            AppState::default(),
            vec![
                Action::CatalogLoaded(Ok(entries())),
                Action::LocalFileChosen {
                    name: "t.docx".into(),
                    bytes: docx_bytes().into(),
                },
                Action::RemoteSelected(0),
            ],
        );
        assert_eq!(
            effects,
            vec![Effect::FetchTemplate {
                index: 0,
                url: "https://templates.example/cardio.docx".into()
            }]
        );
        assert!(state.resolver.source().is_none());

        let (state, _) = state.update(Action::RemoteLoaded {
            index: 0,
            result: Ok(Bytes::from_static(b"remote")),
        });
        assert!(matches!(state.resolver.source(), TemplateSource::RemoteBuffer { .. }));
        assert_eq!(state.resolver.choice(), Some(TemplateChoice::Entry(0)));
    }

    #[test]
    fn rejected_file_alerts_and_keeps_state() {
        let (state, effects) = apply(
            AppState::default(),
            vec![Action::LocalFileChosen {
                name: "photo.png".into(),
                bytes: Bytes::from_static(b"png"),
            }],
        );
        assert_eq!(effects, vec![Effect::Alert("Veuillez sélectionner un fichier .docx".into())]);
        assert!(state.resolver.source().is_none());
    }

    #[test]
    fn catalog_failure_means_upload_only() {
        let not_found = FetchError::Status {
            url: "https://templates.example/templates.json".into(),
            status: reqwest::StatusCode::NOT_FOUND,
        };
        let (state, effects) = apply(
            AppState::default(),
            vec![Action::CatalogLoaded(Err(not_found)), Action::RemoteSelected(0)],
        );
        assert!(matches!(effects.as_slice(), [Effect::Alert(_)]));
        assert_eq!(state.resolver.catalog(), &CatalogMode::UploadOnly);
    }
}
