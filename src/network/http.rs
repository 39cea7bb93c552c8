//! JSON over HTTP
//!
//! Thin wrapper around `reqwest` mapping transport failures, error statuses
//! and undecodable bodies onto [`ExplorerError`].

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::network::explorer::ExplorerError;
use crate::network::service::ServiceConfig;

/// Shared HTTP client; cheap to clone
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, ExplorerError> {
        let inner = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExplorerError::Fetch(e.to_string()))?;
        Ok(Self { inner })
    }

    /// GET `url` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ExplorerError> {
        log::debug!("GET {}", url);
        let response = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| ExplorerError::Fetch(e.to_string()))?;
        read_json(response).await
    }

    /// POST `body` as JSON to `url` and decode the JSON answer
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, ExplorerError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        log::debug!("POST {}", url);
        let response = self
            .inner
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ExplorerError::Fetch(e.to_string()))?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ExplorerError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ExplorerError::Fetch(e.to_string()))?;

    if !status.is_success() {
        return Err(ExplorerError::Server {
            status: status.as_u16(),
            body,
        });
    }

    decode_body(&body)
}

/// Decode a success body
pub(crate) fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T, ExplorerError> {
    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(120).collect();
        ExplorerError::Unexpected(format!("{} in {:?}", e, preview))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Sample {
        txid: String,
    }

    #[test]
    fn test_decode_body() {
        let ok: Sample = decode_body(r#"{"txid":"ab"}"#).unwrap();
        assert_eq!(ok.txid, "ab");

        let err = decode_body::<Sample>("<html>502 Bad Gateway</html>").unwrap_err();
        match err {
            ExplorerError::Unexpected(msg) => assert!(msg.contains("502 Bad Gateway")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_client_builds_from_config() {
        assert!(HttpClient::new(&ServiceConfig::default()).is_ok());
    }
}
