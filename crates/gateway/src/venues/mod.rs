pub mod binance;
pub mod coinbase;
pub mod kraken;

use reqwest::Response;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::TransportError;

/// Shared HTTP response handling: venue error payloads become typed errors,
/// success bodies decode into the caller's record type.
pub(crate) async fn decode_json<T: DeserializeOwned>(resp: Response) -> Result<T, TransportError> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        #[derive(Deserialize)]
        struct ApiMessage {
            #[serde(alias = "msg")]
            message: String,
        }
        let message = serde_json::from_str::<ApiMessage>(&text)
            .map(|m| m.message)
            .unwrap_or(text);
        return Err(match status.as_u16() {
            401 | 403 => TransportError::Auth(message),
            418 | 429 => TransportError::RateLimited {
                retry_after: Duration::from_secs(1),
            },
            _ => TransportError::VenueRejected {
                code: status.as_u16().to_string(),
                text: message,
            },
        });
    }
    serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
}
