use crate::errors::RelayError;
use crate::orchestrator::Orchestrator;
use crate::protocol::AttachmentRequest;
use http_body_util::BodyExt;
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE, HeaderValue,
};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use shared::http::{ResponseBody, empty_body, full_body, make_error_response};
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl ErrorBody {
    fn new(error: impl Into<String>) -> Self {
        ErrorBody {
            success: false,
            error: error.into(),
        }
    }
}

/// HTTP boundary of the relay. Parses the request, hands it to the
/// [`Orchestrator`] and always answers with well-formed JSON.
#[derive(Clone)]
pub struct RelayService {
    orchestrator: Arc<Orchestrator>,
    path: Arc<str>,
}

impl RelayService {
    pub fn new(orchestrator: Arc<Orchestrator>, path: &str) -> Self {
        RelayService {
            orchestrator,
            path: Arc::from(path),
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display,
    {
        if req.method() == Method::OPTIONS {
            return preflight_response();
        }

        if req.method() == Method::GET && req.uri().path() == "/health" {
            return with_cors(Response::new(full_body("ok\n")));
        }

        if req.method() != Method::POST {
            tracing::debug!(method = %req.method(), "rejecting method");
            return json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &ErrorBody::new("Method not allowed"),
            );
        }

        if req.uri().path() != &*self.path {
            tracing::debug!(path = %req.uri().path(), "no route matched");
            return json_response(StatusCode::NOT_FOUND, &ErrorBody::new("Not found"));
        }

        match self.attach(req).await {
            Ok(response) => response,
            Err(e) => {
                let status = e.status_code();
                if status.is_server_error() {
                    tracing::error!(error = %e, "relay request failed");
                } else {
                    tracing::info!(error = %e, "rejecting relay request");
                }
                json_response(status, &ErrorBody::new(e.to_string()))
            }
        }
    }

    async fn attach<B>(&self, req: Request<B>) -> Result<Response<ResponseBody>, RelayError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display,
    {
        let bytes = req
            .into_body()
            .collect()
            .await
            .map_err(|e| RelayError::RequestBodyError(e.to_string()))?
            .to_bytes();

        let request: AttachmentRequest =
            serde_json::from_slice(&bytes).map_err(|e| RelayError::InvalidJson(e.to_string()))?;

        let result = self.orchestrator.attach(request).await?;

        // Business failures are still a completed relay: 200 either way.
        Ok(json_response(StatusCode::OK, &result))
    }
}

impl Service<Request<Incoming>> for RelayService {
    type Response = Response<ResponseBody>;
    type Error = RelayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

fn with_cors(mut response: Response<ResponseBody>) -> Response<ResponseBody> {
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn preflight_response() -> Response<ResponseBody> {
    let mut response = with_cors(Response::new(empty_body()));
    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    let bytes = match serde_json::to_vec(value) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response");
            return with_cors(make_error_response(StatusCode::INTERNAL_SERVER_ERROR));
        }
    };

    let mut response = with_cors(Response::new(full_body(bytes)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
