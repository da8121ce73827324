//! Request and response stages shared by every call.
//!
//! The request stage attaches the bearer credential and encodes JSON bodies
//! into the wire convention. The response stage decodes success and error
//! bodies back into the application convention and classifies the result
//! so the client can intercept 401s.

use reqwest::{header, multipart, Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::ApiError;
use crate::codec::FieldCodec;

/// Body of an outbound call.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    /// Application-convention JSON; encoded before sending.
    Json(Value),
    /// Sent as-is, never key-rewritten.
    Multipart(Vec<FormField>),
}

/// One field of a multipart upload.
#[derive(Debug, Clone)]
pub enum FormField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
}

/// The original parameters of a logical call.
///
/// Kept by value so the call can be re-issued after a refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: RequestBody,
    /// Attach the bearer credential.
    pub authenticated: bool,
    /// A 401 triggers the refresh protocol rather than failing directly.
    pub recoverable: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            authenticated: true,
            recoverable: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, fields: Vec<FormField>) -> Self {
        self.body = RequestBody::Multipart(fields);
        self
    }

    /// Credential exchange calls (login, signup): a 401 is a plain failure.
    pub fn credential_exchange(mut self) -> Self {
        self.recoverable = false;
        self
    }

    /// Send without the bearer credential; used by the refresh call, which
    /// authenticates with the session cookie instead.
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self.recoverable = false;
        self
    }
}

/// A call in flight together with its single-use retry marker.
#[derive(Debug)]
pub struct PendingCall {
    pub request: ApiRequest,
    pub retried: bool,
}

impl PendingCall {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            retried: false,
        }
    }
}

/// Outbound stage: credential + body encoding.
#[derive(Debug, Clone)]
pub struct RequestPipeline {
    base_url: String,
    codec: FieldCodec,
}

impl RequestPipeline {
    pub fn new(base_url: impl Into<String>, codec: FieldCodec) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            codec,
        }
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Build the transport request. `token` is attached only when the
    /// request is authenticated.
    pub fn build(
        &self,
        client: &Client,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<RequestBuilder, ApiError> {
        let mut builder = client
            .request(request.method.clone(), self.url(&request.path))
            .header(header::ACCEPT, "application/json");

        if request.authenticated {
            if let Some(token) = token {
                builder = builder.bearer_auth(token);
            }
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&self.codec.encode(value.clone())),
            RequestBody::Multipart(fields) => builder.multipart(build_form(fields)?),
        };

        Ok(builder)
    }
}

fn build_form(fields: &[FormField]) -> Result<multipart::Form, ApiError> {
    let mut form = multipart::Form::new();
    for field in fields {
        form = match field {
            FormField::Text { name, value } => form.text(name.clone(), value.clone()),
            FormField::File {
                name,
                file_name,
                mime,
                bytes,
            } => {
                let mut part = multipart::Part::bytes(bytes.clone()).file_name(file_name.clone());
                if let Some(mime) = mime {
                    part = part.mime_str(mime)?;
                }
                form.part(name.clone(), part)
            }
        };
    }
    Ok(form)
}

/// Result of the inbound stage, bodies already decoded.
#[derive(Debug)]
pub enum ResponseClass {
    Success(Value),
    /// 401; whether it is recoverable is the client's decision.
    AuthorizationExpired(Value),
    Failure { status: StatusCode, payload: Value },
}

/// Inbound stage: body decoding + classification.
#[derive(Debug, Clone)]
pub struct ResponsePipeline {
    codec: FieldCodec,
}

impl ResponsePipeline {
    pub fn new(codec: FieldCodec) -> Self {
        Self { codec }
    }

    pub async fn classify(&self, response: Response) -> Result<ResponseClass, ApiError> {
        let status = response.status();
        let is_json = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("json"))
            .unwrap_or(false);
        let text = response.text().await?;
        debug!(status = %status, bytes = text.len(), "Response received");

        if status.is_success() {
            return self.decode_body(&text, is_json).map(ResponseClass::Success);
        }

        // Error bodies that fail to parse are still worth surfacing as text
        let payload = self
            .decode_body(&text, is_json)
            .unwrap_or_else(|_| Value::String(text));

        if status == StatusCode::UNAUTHORIZED {
            Ok(ResponseClass::AuthorizationExpired(payload))
        } else {
            Ok(ResponseClass::Failure { status, payload })
        }
    }

    /// Decode a raw body. Empty bodies become `Null`. A body without a JSON
    /// content type is still decoded when it parses, otherwise it is a string.
    pub fn decode_body(&self, text: &str, is_json: bool) -> Result<Value, ApiError> {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        if !is_json {
            return Ok(match serde_json::from_str::<Value>(text) {
                Ok(value) => self.codec.decode(value),
                Err(_) => Value::String(text.to_string()),
            });
        }
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ApiError::InvalidResponse(format!("Malformed JSON body: {}", e)))?;
        Ok(self.codec.decode(value))
    }
}
