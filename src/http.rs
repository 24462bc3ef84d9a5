use bytes::Bytes;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::FetchError;

/// GETs `url` and returns the body. Any non-2xx status is an error.
pub async fn fetch_bytes(client: &Client, url: &str) -> Result<Bytes, FetchError> {
    let request_error = |source| FetchError::Request {
        url: url.to_string(),
        source,
    };

    let response = client.get(url).send().await.map_err(request_error)?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status,
        });
    }
    let body = response.bytes().await.map_err(request_error)?;
    debug!(url, bytes = body.len(), "fetched");
    Ok(body)
}

pub async fn fetch_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T, FetchError> {
    let body = fetch_bytes(client, url).await?;
    serde_json::from_slice(&body).map_err(|source| FetchError::Json {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/missing.docx").with_status(404).create_async().await;

        let url = format!("{}/missing.docx", server.url());
        let err = fetch_bytes(&Client::new(), &url).await.unwrap_err();

        mock.assert_async().await;
        match err {
            FetchError::Status { status, .. } => assert_eq!(status.as_u16(), 404),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_json_reports_bad_payloads() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/data.json")
            .with_status(200)
            .with_body("{ pas du json")
            .create_async()
            .await;

        let url = format!("{}/data.json", server.url());
        let err = fetch_json::<Value>(&Client::new(), &url).await.unwrap_err();
        assert!(matches!(err, FetchError::Json { .. }));
    }
}
