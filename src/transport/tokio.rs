use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Request, Response};
use http_body_util::BodyExt;

use super::{BoxBody, HttpClient, HttpError};

/// reqwest-backed client for the tokio runtime.
pub struct TokioClient {
    client: reqwest::Client,
}

impl Default for TokioClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl HttpClient for TokioClient {
    fn send_request(
        &self,
        request: Request<Bytes>,
    ) -> BoxFuture<'_, Result<Response<BoxBody>, HttpError>> {
        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let request = Request::from_parts(parts, reqwest::Body::from(body));
            let request = reqwest::Request::try_from(request)?;
            let response: Response<reqwest::Body> = self.client.execute(request).await?.into();
            let (parts, body) = response.into_parts();
            Ok(Response::from_parts(
                parts,
                BoxBody::new(body.map_err(HttpError::from)),
            ))
        })
    }
}
