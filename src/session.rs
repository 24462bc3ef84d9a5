//! Executes the effects requested by [`AppState::update`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use reqwest::Client;
use tracing::{error, info, warn};

use crate::app::{Action, AppState, Effect};
use crate::generator::ReportGenerator;
use crate::http::fetch_bytes;

pub struct Session {
    state: AppState,
    client: Client,
    generator: ReportGenerator,
    output_dir: PathBuf,
    timers: Vec<Instant>,
    alerts: Vec<String>,
    downloads: Vec<PathBuf>,
}

impl Session {
    pub fn new(state: AppState, client: Client, generator: ReportGenerator, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            state,
            client,
            generator,
            output_dir: output_dir.into(),
            timers: Vec::new(),
            alerts: Vec::new(),
            downloads: Vec::new(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Messages shown to the user since the last call.
    pub fn take_alerts(&mut self) -> Vec<String> {
        std::mem::take(&mut self.alerts)
    }

    pub fn downloads(&self) -> &[PathBuf] {
        &self.downloads
    }

    /// Earliest pending reset, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.iter().min().copied()
    }

    /// Applies `action` and every action its effects lead to.
    pub async fn dispatch(&mut self, action: Action) {
        let mut queue = VecDeque::from([action]);
        while let Some(action) = queue.pop_front() {
            let (state, effects) = std::mem::take(&mut self.state).update(action);
            self.state = state;
            for effect in effects {
                if let Some(next) = self.execute(effect).await {
                    queue.push_back(next);
                }
            }
        }
    }

    /// Fires the resets whose deadline is at or before `now`.
    pub async fn poll_timers(&mut self, now: Instant) {
        let (due, pending): (Vec<Instant>, Vec<Instant>) = self.timers.iter().partition(|&&deadline| deadline <= now);
        self.timers = pending;
        for _ in due {
            self.dispatch(Action::ConfirmationElapsed).await;
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<Action> {
        match effect {
            Effect::FetchTemplate { index, url } => {
                let result = fetch_bytes(&self.client, &url).await;
                Some(Action::RemoteLoaded { index, result })
            }
            Effect::RunEngine { template, data } => Some(Action::ReportFinished(self.generator.generate(&template, &data))),
            Effect::Download(report) => {
                let result = report.save(&self.output_dir).await;
                match &result {
                    Ok(path) => {
                        info!(path = %path.display(), "report written");
                        self.downloads.push(path.clone());
                    }
                    Err(err) => error!(dir = %self.output_dir.display(), error = %err, "unable to write report"),
                }
                Some(Action::ReportSaved(result))
            }
            Effect::ScheduleReset(after) => {
                self.timers.push(Instant::now() + after);
                None
            }
            Effect::Alert(message) => {
                warn!(%message, "alert");
                self.alerts.push(message);
                Some(Action::AlertDismissed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::tests::RecordingEngine;
    use crate::generator::GenerationState;
    use crate::resolver::tests::docx_bytes;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn session(dir: &Path, engine: Arc<RecordingEngine>) -> Session {
        Session::new(
            AppState::new(Duration::from_millis(50)),
            Client::new(),
            ReportGenerator::new(engine),
            dir,
        )
    }

    #[tokio::test]
    async fn generation_writes_report_and_resets_button() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let mut session = session(dir.path(), engine.clone());

        session.dispatch(Action::DefaultDataLoaded(json!({ "a": 1 }))).await;
        session
            .dispatch(Action::LocalFileChosen {
                name: "t.docx".into(),
                bytes: docx_bytes().into(),
            })
            .await;
        session.dispatch(Action::GenerateRequested).await;

        assert!(session.take_alerts().is_empty());
        assert_eq!(session.downloads(), &[dir.path().join("rapport.docx")]);
        assert_eq!(std::fs::read(dir.path().join("rapport.docx")).unwrap(), b"generated report");
        assert_eq!(session.state().generation, GenerationState::Succeeded);
        assert_eq!(engine.calls.lock().unwrap().len(), 1);

        let deadline = session.next_deadline().unwrap();
        session.poll_timers(deadline - Duration::from_millis(1)).await;
        assert_eq!(session.state().generation, GenerationState::Succeeded);
        session.poll_timers(deadline).await;
        assert_eq!(session.state().generation, GenerationState::Idle);
        assert!(session.next_deadline().is_none());
    }

    #[tokio::test]
    async fn save_failure_leaves_no_confirmation_behind() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("sorties");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let mut session = session(&blocker, engine);

        session.dispatch(Action::DefaultDataLoaded(json!({ "a": 1 }))).await;
        session
            .dispatch(Action::LocalFileChosen {
                name: "t.docx".into(),
                bytes: docx_bytes().into(),
            })
            .await;
        session.dispatch(Action::GenerateRequested).await;

        let alerts = session.take_alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].starts_with("Impossible d'enregistrer rapport.docx : "));
        assert!(session.downloads().is_empty());
        assert!(session.next_deadline().is_none());
        assert_eq!(session.state().generation, GenerationState::Idle);
        assert_eq!(session.state().generation.button_label(), "🚀 Générer le rapport");
        assert_eq!(std::fs::read(&blocker).unwrap(), b"not a directory");
    }

    #[tokio::test]
    async fn missing_template_is_alerted_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let mut session = session(dir.path(), engine.clone());

        session.dispatch(Action::DefaultDataLoaded(json!({}))).await;
        session.dispatch(Action::GenerateRequested).await;

        assert_eq!(session.take_alerts(), vec!["Merci de sélectionner un template DOCX".to_string()]);
        assert!(session.downloads().is_empty());
        assert!(engine.calls.lock().unwrap().is_empty());
        assert!(!dir.path().join("rapport.docx").exists());
    }

    #[tokio::test]
    async fn remote_template_is_fetched_then_used() {
        let template = docx_bytes();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/templates.json")
            .with_status(200)
            .with_body(format!(
                r#"[{{ "description": "Cardio", "url": "{}/cardio.docx" }}]"#,
                server.url()
            ))
            .create_async()
            .await;
        server
            .mock("GET", "/cardio.docx")
            .with_status(200)
            .with_body(&template)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let mut session = session(dir.path(), engine.clone());
        let client = Client::new();

        let catalog = crate::catalog::fetch_catalog(&client, &format!("{}/templates.json", server.url())).await;
        session.dispatch(Action::CatalogLoaded(catalog)).await;
        session.dispatch(Action::DefaultDataLoaded(json!({ "b": 2 }))).await;
        session.dispatch(Action::RemoteSelected(0)).await;
        session.dispatch(Action::GenerateRequested).await;

        assert!(session.take_alerts().is_empty());
        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls[0].0, template);
        assert_eq!(calls[0].1, json!({ "b": 2 }));
    }
}
