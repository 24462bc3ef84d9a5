//! Fill `.docx` report templates with JSON data.
//!
//! A template is picked from a remote catalog or a local file
//! ([`resolver`]), the data is edited as JSON text ([`data`]) and the
//! [`generator`] produces `rapport.docx` through the `rapport-template`
//! engine. [`app`] ties these together as a state machine that [`session`]
//! drives.

pub mod app;
pub mod catalog;
pub mod config;
pub mod data;
pub mod error;
pub mod generator;
pub mod http;
pub mod inspect;
pub mod resolver;
pub mod session;

pub use app::{Action, AppState, Effect};
pub use catalog::{CatalogMode, TemplateCatalogEntry, TemplateChoice};
pub use config::Settings;
pub use data::{DataEditor, EditorFlag, ReportData};
pub use error::{ConfigError, DataError, FetchError, GenerateError, InspectError, SourceError};
pub use generator::{DocxEngine, GenerationState, Report, ReportGenerator, TemplateEngine};
pub use resolver::{LoadStatus, TemplateResolver, TemplateSource};
pub use session::Session;
