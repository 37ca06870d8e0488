// src/backend/services/notifier.rs
// Release notices, sent through an HTTPS outcall to a transactional mail API.

use crate::models::VaultId;
use crate::storage::config::get_config;
use candid::Nat;
use ic_cdk::api::management_canister::http_request::{
    http_request, CanisterHttpRequestArgument, HttpHeader, HttpMethod, HttpResponse,
    TransformContext,
};
use thiserror::Error;

const MAX_RESPONSE_BYTES: u64 = 1024 * 4; // Only the status matters
/// Query method the replicas run on the mailer response before agreeing on it.
const TRANSFORM_METHOD: &str = "transform_release_notice";

/// Keeps only the status. Headers (dates, request ids) and the body differ per replica and
/// would keep the outcall from reaching consensus.
pub fn strip_mailer_response(response: HttpResponse) -> HttpResponse {
    HttpResponse {
        status: response.status,
        headers: Vec::new(),
        body: Vec::new(),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("no mailer endpoint configured")]
    Disabled,

    #[error("mailer rejected the notice: {0}")]
    Rejected(String),

    #[error("mailer unreachable: {0}")]
    Transport(String),
}

/// One-shot notification sent when a buried vault opens.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn send_release_notice(&self, email: &str, vault_id: VaultId) -> Result<(), NotifyError>;
}

/// Mailer reading its endpoint and sender from the canister config at send time.
#[derive(Clone, Default)]
pub struct HttpsMailer;

impl Notifier for HttpsMailer {
    async fn send_release_notice(&self, email: &str, vault_id: VaultId) -> Result<(), NotifyError> {
        let config = get_config();
        let endpoint = config.mailer_endpoint.ok_or(NotifyError::Disabled)?;

        let body = serde_json::json!({
            "from": config.mailer_sender,
            "to": email,
            "subject": "Your time capsule is open",
            "text": format!(
                "The vault #{} you buried has reached its unlock date and is open again.",
                vault_id
            ),
        });
        let request_body = serde_json::to_vec(&body)
            .map_err(|e| NotifyError::Transport(format!("failed to encode notice: {}", e)))?;

        let request_arg = CanisterHttpRequestArgument {
            url: endpoint,
            method: HttpMethod::POST,
            body: Some(request_body),
            max_response_bytes: Some(MAX_RESPONSE_BYTES),
            transform: Some(TransformContext::from_name(
                TRANSFORM_METHOD.to_string(),
                Vec::new(),
            )),
            headers: vec![
                HttpHeader {
                    name: "Content-Type".to_string(),
                    value: "application/json".to_string(),
                },
                // Replicas each send the request; the mail API deduplicates on this key.
                HttpHeader {
                    name: "Idempotency-Key".to_string(),
                    value: format!("release-{}", vault_id),
                },
            ],
        };

        match http_request(request_arg, config.outcall_cycles).await {
            Ok((response,)) => {
                if response.status >= Nat::from(200u64) && response.status < Nat::from(300u64) {
                    crate::log_info!("Release notice for vault {} accepted", vault_id);
                    Ok(())
                } else {
                    Err(NotifyError::Rejected(format!("status {}", response.status)))
                }
            }
            Err((code, msg)) => Err(NotifyError::Transport(format!("{:?} - {}", code, msg))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_keeps_only_the_status() {
        let response = HttpResponse {
            status: Nat::from(202u64),
            headers: vec![HttpHeader {
                name: "Date".to_string(),
                value: "Sun, 18 Oct 2026 10:00:00 GMT".to_string(),
            }],
            body: br#"{"id":"msg_81c2"}"#.to_vec(),
        };
        let stripped = strip_mailer_response(response);
        assert_eq!(stripped.status, Nat::from(202u64));
        assert!(stripped.headers.is_empty());
        assert!(stripped.body.is_empty());
    }
}
