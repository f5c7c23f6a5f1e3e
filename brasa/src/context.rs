use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use parking_lot::Mutex;

use crate::binder::{Binder, RequestBody};
use crate::error::{Error, ValidationError};
use crate::security::Claims;
use crate::template::Templates;

/// Status and headers a controller set before returning.
#[derive(Debug, Default)]
pub(crate) struct ResponseHead {
    pub(crate) status: Option<StatusCode>,
    pub(crate) headers: HeaderMap,
}

/// Everything about the current request except its body.
///
/// Transform hooks and renderers receive this; controllers reach it through
/// [`Context`], which derefs to it.
#[derive(Debug)]
pub struct RequestContext {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    path_params: HashMap<String, String>,
    query: Vec<(String, String)>,
    claims: Option<Claims>,
    templates: Option<Templates>,
    head: Mutex<ResponseHead>,
}

impl RequestContext {
    pub(crate) fn new(parts: &Parts, path_params: HashMap<String, String>, templates: Option<Templates>) -> Self {
        let query = parts
            .uri
            .query()
            .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
            .unwrap_or_default();
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            path_params,
            query,
            claims: parts.extensions.get::<Claims>().cloned(),
            templates,
            head: Mutex::new(ResponseHead::default()),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as text; `None` when absent or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn query_param_int(&self, name: &str) -> Result<Option<i64>, Error> {
        self.query_param(name)
            .map(|raw| {
                raw.trim()
                    .parse::<i64>()
                    .map_err(|_| Error::from(ValidationError::field(name, format!("expected an integer, got `{raw}`"))))
            })
            .transpose()
    }

    pub fn query_param_bool(&self, name: &str) -> Result<Option<bool>, Error> {
        self.query_param(name)
            .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(Error::from(ValidationError::field(name, format!("expected a boolean, got `{raw}`")))),
            })
            .transpose()
    }

    /// Token claims when the request carried a valid token.
    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_ref()
    }

    pub fn templates(&self) -> Option<&Templates> {
        self.templates.as_ref()
    }

    /// Sets the response status. The dispatcher keeps it for successful replies.
    pub fn set_status(&self, status: StatusCode) {
        self.head.lock().status = Some(status);
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.head.lock().headers.insert(name, value);
    }

    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.head.lock().headers.append(name, value);
    }

    pub(crate) fn take_head(&self) -> ResponseHead {
        std::mem::take(&mut *self.head.lock())
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        let (parts, _) = axum::http::Request::new(()).into_parts();
        Self::new(&parts, HashMap::new(), None)
    }
}

/// Per-request handle given to typed controllers.
///
/// The body is decoded on first access and the outcome, success or failure,
/// is cached for the rest of the request.
pub struct Context<B = crate::binder::NoBody> {
    request: Arc<RequestContext>,
    raw: Option<Body>,
    binder: Arc<Binder>,
    outcome: Option<Result<B, Error>>,
}

impl<B: RequestBody> Context<B> {
    pub(crate) fn new(request: Arc<RequestContext>, raw: Body, binder: Arc<Binder>) -> Self {
        Self {
            request,
            raw: Some(raw),
            binder,
            outcome: None,
        }
    }

    async fn bind(&mut self) -> &mut Result<B, Error> {
        let outcome = match self.outcome.take() {
            Some(outcome) => outcome,
            None => {
                let raw = self.raw.take().unwrap_or_else(Body::empty);
                self.binder.bind::<B>(&self.request, raw).await
            }
        };
        self.outcome.insert(outcome)
    }

    /// The decoded (and in-transformed) body.
    pub async fn body(&mut self) -> Result<&B, Error> {
        match self.bind().await {
            Ok(body) => Ok(&*body),
            Err(err) => Err(err.clone()),
        }
    }

    pub async fn body_mut(&mut self) -> Result<&mut B, Error> {
        match self.bind().await {
            Ok(body) => Ok(body),
            Err(err) => Err(err.clone()),
        }
    }

    pub async fn into_body(mut self) -> Result<B, Error> {
        self.bind().await;
        match self.outcome {
            Some(outcome) => outcome,
            None => Err(Error::msg("request body was not bound")),
        }
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }
}

impl<B> Deref for Context<B> {
    type Target = RequestContext;

    fn deref(&self) -> &RequestContext {
        &self.request
    }
}
