//! The JSON the report is filled with, as edited by the user.

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::DataError;
use crate::http::fetch_json;

/// Result of parsing the editor text.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ReportData {
    #[default]
    Missing,
    Valid(Value),
    Invalid(String),
}

impl ReportData {
    pub fn value(&self) -> Option<&Value> {
        match self {
            ReportData::Valid(value) => Some(value),
            ReportData::Missing | ReportData::Invalid(_) => None,
        }
    }
}

/// Border colour of the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorFlag {
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Default)]
pub struct DataEditor {
    text: String,
    data: ReportData,
}

impl DataEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn data(&self) -> &ReportData {
        &self.data
    }

    /// `None` until the editor holds any text.
    pub fn flag(&self) -> Option<EditorFlag> {
        match self.data {
            ReportData::Missing => None,
            ReportData::Valid(_) => Some(EditorFlag::Valid),
            ReportData::Invalid(_) => Some(EditorFlag::Invalid),
        }
    }

    pub fn set_text(&mut self, text: impl Into<String>) -> EditorFlag {
        self.text = text.into();
        self.data = match serde_json::from_str(&self.text) {
            Ok(value) => ReportData::Valid(value),
            Err(err) => ReportData::Invalid(err.to_string()),
        };
        match self.data {
            ReportData::Valid(_) => EditorFlag::Valid,
            _ => EditorFlag::Invalid,
        }
    }

    pub fn load(&mut self, value: Value) {
        self.text = serde_json::to_string_pretty(&value).unwrap_or_default();
        self.data = ReportData::Valid(value);
    }
}

/// Consultation fixture used when no data file is available.
pub fn sample_data() -> Value {
    json!({
        "consultation": {
            "roomName": "Salle-Consultation-001",
            "date": "2025-07-21",
            "time": "14:30",
            "connectionStatus": "Connecté"
        },
        "doctor": {
            "firstName": "Marie",
            "name": "Dubois",
            "occupation": "Cardiologue"
        },
        "patient": {
            "firstName": "Jean",
            "name": "Martin",
            "birthDate": "1980-05-15",
            "gender": "Masculin",
            "patientNumber": "PAT-2025-0123",
            "consultationReason": "Contrôle de routine cardiaque"
        },
        "measures": {
            "tensiometre": [
                {
                    "systolique": "120 mmHg",
                    "diastolique": "80 mmHg",
                    "frequence": "72 bpm",
                    "heure": "14:35"
                }
            ],
            "oxymetre": [
                {
                    "saturation": "98%",
                    "frequence": "74 bpm",
                    "heure": "14:37"
                }
            ],
            "thermometre": [
                {
                    "temperature": "36.8°C",
                    "heure": "14:38"
                }
            ]
        },
        "generation": {
            "date": "2025-07-21",
            "time": "15:00"
        }
    })
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Reads JSON from a file path or an http(s) URL.
pub async fn read_data(client: &Client, location: &str) -> Result<Value, DataError> {
    if is_url(location) {
        return Ok(fetch_json(client, location).await?);
    }
    let raw = tokio::fs::read(location).await.map_err(|source| DataError::Read {
        path: location.to_string(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| DataError::Parse {
        path: location.to_string(),
        source,
    })
}

/// The data the editor starts with: `location` when it can be read, the
/// sample otherwise.
pub async fn load_default_data(client: &Client, location: &str) -> Value {
    match read_data(client, location).await {
        Ok(value) => {
            info!(location, "default data loaded");
            value
        }
        Err(err) => {
            warn!(location, error = %err, "unable to load default data, using the embedded sample");
            sample_data()
        }
    }
}
