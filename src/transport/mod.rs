//! HTTP execution: a minimal client abstraction plus the retrying transport
//! that wraps it with timeout, backoff and outcome classification.

mod error;
#[cfg(feature = "tokio-http")]
pub mod tokio;

use std::sync::Arc;

use bytes::Bytes;
pub use error::HttpError;
use futures_util::future::BoxFuture;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::BodyExt;

use crate::{config::RetryPolicy, error::Error, signer::SignedRequest};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, HttpError>;

pub(crate) fn full_body(bytes: Bytes) -> BoxBody {
    BoxBody::new(http_body_util::Full::new(bytes).map_err(|never| match never {}))
}

/// The one capability this crate needs from an HTTP stack: send a request,
/// get back status/headers/body. Implementations are injected at connector
/// construction; there is no ambient/global client lookup.
///
/// Request bodies are plain [`Bytes`] so the transport can re-send them on
/// retry without a re-readable-source contract.
pub trait HttpClient: Send + Sync {
    fn send_request(
        &self,
        request: Request<Bytes>,
    ) -> BoxFuture<'_, Result<Response<BoxBody>, HttpError>>;
}

/// A fully collected response. The bodies this crate inspects (upload ids,
/// commit receipts, error envelopes) are small, so buffering them keeps the
/// retry loop simple.
#[derive(Debug)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Outcome of one transport attempt. A 4xx is always terminal; a 5xx or
/// network-level failure is always retryable up to the attempt ceiling.
enum AttemptResult {
    Success(TransportResponse),
    RetryableStatus { status: StatusCode, body: String },
    RetryableNetwork(HttpError),
    Terminal(Error),
}

/// Executes signed requests with exponential backoff and a per-attempt
/// timeout. Only server (5xx) and network failures are retried; everything
/// else propagates immediately without consuming remaining attempts.
#[derive(Clone)]
pub struct RetryingTransport {
    client: Arc<dyn HttpClient>,
    policy: RetryPolicy,
}

impl RetryingTransport {
    pub fn new(client: Arc<dyn HttpClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub async fn execute(&self, request: &SignedRequest) -> Result<TransportResponse, Error> {
        let mut last: Option<AttemptResult> = None;
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.base_backoff * 2u32.pow(attempt as u32 - 1);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "backing off before retry"
                );
                ::tokio::time::sleep(delay).await;
            }

            let http_request = request.to_http()?;
            let result = ::tokio::time::timeout(
                self.policy.call_timeout,
                self.client.send_request(http_request),
            )
            .await;

            let outcome = match result {
                Err(_) => AttemptResult::RetryableNetwork(HttpError::Timeout),
                Ok(Err(e)) => AttemptResult::RetryableNetwork(e),
                Ok(Ok(response)) => classify(response).await,
            };

            match outcome {
                AttemptResult::Success(response) => return Ok(response),
                AttemptResult::Terminal(err) => return Err(err),
                retryable => {
                    match &retryable {
                        AttemptResult::RetryableStatus { status, .. } => {
                            tracing::warn!(%status, attempt, "retryable server failure")
                        }
                        AttemptResult::RetryableNetwork(e) => {
                            tracing::warn!(error = %e, attempt, "retryable network failure")
                        }
                        _ => unreachable!(),
                    }
                    last = Some(retryable);
                }
            }
        }

        // Attempts exhausted: surface the last cause, never a generic
        // exhaustion error.
        Err(match last {
            Some(AttemptResult::RetryableStatus { status, body }) => Error::Server {
                status,
                body,
                attempts,
            },
            Some(AttemptResult::RetryableNetwork(source)) => Error::Network { source, attempts },
            _ => unreachable!("loop ran at least once"),
        })
    }
}

async fn classify(response: Response<BoxBody>) -> AttemptResult {
    let status = response.status();
    let headers = response.headers().clone();
    let body = match response.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        // The connection died mid-body; same class as any other network
        // failure.
        Err(e) => return AttemptResult::RetryableNetwork(e),
    };

    if status.is_success() || status.is_redirection() {
        return AttemptResult::Success(TransportResponse {
            status,
            headers,
            body,
        });
    }

    let body_text = String::from_utf8_lossy(&body).to_string();
    if status.is_server_error() {
        AttemptResult::RetryableStatus {
            status,
            body: body_text,
        }
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        AttemptResult::Terminal(Error::Authentication {
            status,
            body: body_text,
        })
    } else if status == StatusCode::NOT_FOUND {
        AttemptResult::Terminal(Error::NotFound)
    } else {
        AttemptResult::Terminal(Error::Http(HttpError::HttpNotSuccess {
            status,
            body: body_text,
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use bytes::Bytes;
    use futures_util::future::BoxFuture;
    use http::{HeaderMap, Method, Request, Response, StatusCode};
    use url::Url;

    // `super::*` would pull in the `tokio` submodule and shadow the tokio
    // crate in `#[tokio::test]` paths.
    use super::{full_body, BoxBody, HttpClient, HttpError, RetryingTransport};
    use crate::{config::RetryPolicy, error::Error, signer::SignedRequest};

    /// Replays a scripted sequence of responses and counts attempts.
    pub(crate) struct ScriptedClient {
        responses: Mutex<VecDeque<Result<(StatusCode, HeaderMap, Bytes), ()>>>,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedClient {
        pub(crate) fn new(
            responses: Vec<Result<(StatusCode, HeaderMap, Bytes), ()>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn status(status: StatusCode) -> Result<(StatusCode, HeaderMap, Bytes), ()> {
            Ok((status, HeaderMap::new(), Bytes::new()))
        }
    }

    impl HttpClient for ScriptedClient {
        fn send_request(
            &self,
            _request: Request<Bytes>,
        ) -> BoxFuture<'_, Result<Response<BoxBody>, HttpError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted client ran out of responses");
            Box::pin(async move {
                match next {
                    Ok((status, headers, body)) => {
                        let mut response = Response::builder().status(status);
                        *response.headers_mut().unwrap() = headers;
                        Ok(response.body(full_body(body))?)
                    }
                    Err(()) => Err(HttpError::Timeout),
                }
            })
        }
    }

    pub(crate) fn request() -> SignedRequest {
        SignedRequest {
            method: Method::GET,
            url: Url::parse("https://store.example.com/obj.txt").unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::ZERO,
            call_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn retry_ceiling_surfaces_last_server_error() {
        let client = ScriptedClient::new(vec![
            ScriptedClient::status(StatusCode::SERVICE_UNAVAILABLE),
            ScriptedClient::status(StatusCode::SERVICE_UNAVAILABLE),
            ScriptedClient::status(StatusCode::SERVICE_UNAVAILABLE),
        ]);
        let transport = RetryingTransport::new(client.clone(), fast_policy(3));

        let err = transport.execute(&request()).await.unwrap_err();
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        match err {
            Error::Server {
                status, attempts, ..
            } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected Server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_retry_on_4xx() {
        let client = ScriptedClient::new(vec![ScriptedClient::status(StatusCode::NOT_FOUND)]);
        let transport = RetryingTransport::new(client.clone(), fast_policy(3));

        let err = transport.execute(&request()).await.unwrap_err();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn auth_rejection_is_terminal_with_raw_status() {
        let client = ScriptedClient::new(vec![ScriptedClient::status(StatusCode::FORBIDDEN)]);
        let transport = RetryingTransport::new(client.clone(), fast_policy(3));

        let err = transport.execute(&request()).await.unwrap_err();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(
            matches!(err, Error::Authentication { status, .. } if status == StatusCode::FORBIDDEN)
        );
    }

    #[tokio::test]
    async fn network_failure_retries_then_succeeds() {
        let client = ScriptedClient::new(vec![Err(()), ScriptedClient::status(StatusCode::OK)]);
        let transport = RetryingTransport::new(client.clone(), fast_policy(3));

        let response = transport.execute(&request()).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn exhausted_network_failures_report_attempt_count() {
        let client = ScriptedClient::new(vec![Err(()), Err(())]);
        let transport = RetryingTransport::new(client.clone(), fast_policy(2));

        let err = transport.execute(&request()).await.unwrap_err();
        assert!(matches!(err, Error::Network { attempts: 2, .. }));
    }
}
