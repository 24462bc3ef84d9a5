use rapport_template::TemplateError;
use thiserror::Error;

/// Failure of an HTTP GET issued for the catalog, a template or the default data.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("{url} did not return valid JSON: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Rejected template selection.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Veuillez sélectionner un fichier .docx")]
    NotDocxName(String),
    #[error("{0} n'est pas un document DOCX")]
    NotDocxContent(String),
    #[error("aucun template n'existe à l'index {0}")]
    UnknownEntry(usize),
}

/// Why a generation attempt produced no report. The messages are the ones
/// shown to the user.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Merci de sélectionner un template DOCX")]
    MissingTemplate,
    #[error("Merci de fournir des données JSON valides")]
    InvalidData,
    #[error("Une génération est déjà en cours")]
    Busy,
    #[error("Erreur lors de la génération du rapport. Vérifiez le template et les données.")]
    Engine(#[source] TemplateError),
    #[error("Impossible d'enregistrer {file_name} : {source}")]
    Save {
        file_name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to obtain the default editor data.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("unable to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("`{key}` must be an http(s) URL, got `{value}`")]
    InvalidUrl { key: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("unable to read template: {0}")]
    Docx(#[from] docx_rs::ReaderError),
    #[error("invalid delimiters: {0}")]
    Pattern(String),
    #[error(transparent)]
    Template(#[from] TemplateError),
}
