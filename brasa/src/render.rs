//! Output capabilities: what a controller may return and how it is written.

use std::io;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use serde::Serialize;
use serde_json::Value;
use utoipa::openapi::schema::ObjectBuilder;
use utoipa::openapi::{RefOr, Schema};
use utoipa::ToSchema;

use crate::context::RequestContext;
use crate::error::Error;
use crate::schema::{SchemaError, SchemaRegistry};
use crate::transform::OutTransform;

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const TEXT_HTML: &str = "text/html; charset=utf-8";

/// Buffered response sink handed to renderers and serializers.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_headers(headers: HeaderMap) -> Self {
        Self {
            headers,
            ..Self::default()
        }
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Sets `Content-Type`; values that are not valid header text are ignored.
    pub fn set_content_type(&mut self, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(header::CONTENT_TYPE, value);
            }
            Err(_) => tracing::warn!(content_type = value, "ignoring invalid content type"),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn write_str(&mut self, text: &str) {
        self.body.extend_from_slice(text.as_bytes());
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn into_response(self, default_status: StatusCode) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status.unwrap_or(default_status);
        *response.headers_mut() = self.headers;
        response
    }
}

impl io::Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A value that writes its own body. `Content-Type` defaults to HTML.
pub trait Renderer: Send {
    fn render(&self, w: &mut ResponseWriter) -> Result<(), Error>;
}

/// Like [`Renderer`], with access to the request.
pub trait ContextRenderer: Send {
    fn render_with(&self, ctx: &RequestContext, w: &mut ResponseWriter) -> Result<(), Error>;
}

/// How a reply is turned into bytes, in dispatch priority order.
pub enum Rendering {
    Context(Box<dyn ContextRenderer>),
    Plain(Box<dyn Renderer>),
    Text(String),
    Value(Value),
    Null,
}

/// What the OpenAPI document says about a successful response.
#[derive(Debug, Clone)]
pub enum OutputDoc {
    /// Encoded by the configured serializer.
    Serialized(RefOr<Schema>),
    Text,
    Html,
}

/// A value a typed controller may return.
pub trait Reply: Send + 'static {
    fn apply_out_transform(&mut self, _ctx: &RequestContext) -> Result<(), Error> {
        Ok(())
    }

    fn into_rendering(self) -> Result<Rendering, Error>;

    fn describe(registry: &mut SchemaRegistry) -> Result<OutputDoc, SchemaError>
    where
        Self: Sized;
}

impl<T> Reply for T
where
    T: Serialize + ToSchema + OutTransform + Send + 'static,
{
    fn apply_out_transform(&mut self, ctx: &RequestContext) -> Result<(), Error> {
        self.out_transform(ctx)
    }

    fn into_rendering(self) -> Result<Rendering, Error> {
        serde_json::to_value(&self)
            .map(Rendering::Value)
            .map_err(|e| Error::render(e.to_string()))
    }

    fn describe(registry: &mut SchemaRegistry) -> Result<OutputDoc, SchemaError> {
        registry.register::<T>().map(OutputDoc::Serialized)
    }
}

/// Every item runs its out transform; the document shows an array of the
/// element's component.
impl<T> Reply for Vec<T>
where
    T: Serialize + ToSchema + OutTransform + Send + 'static,
{
    fn apply_out_transform(&mut self, ctx: &RequestContext) -> Result<(), Error> {
        self.iter_mut().try_for_each(|item| item.out_transform(ctx))
    }

    fn into_rendering(self) -> Result<Rendering, Error> {
        serde_json::to_value(&self)
            .map(Rendering::Value)
            .map_err(|e| Error::render(e.to_string()))
    }

    fn describe(registry: &mut SchemaRegistry) -> Result<OutputDoc, SchemaError> {
        registry.register_array::<T>().map(OutputDoc::Serialized)
    }
}

/// `None` is written as a null body and skips the out transform.
impl<T: Reply> Reply for Option<T> {
    fn apply_out_transform(&mut self, ctx: &RequestContext) -> Result<(), Error> {
        match self {
            Some(inner) => inner.apply_out_transform(ctx),
            None => Ok(()),
        }
    }

    fn into_rendering(self) -> Result<Rendering, Error> {
        match self {
            Some(inner) => inner.into_rendering(),
            None => Ok(Rendering::Null),
        }
    }

    fn describe(registry: &mut SchemaRegistry) -> Result<OutputDoc, SchemaError> {
        T::describe(registry)
    }
}

impl Reply for String {
    fn into_rendering(self) -> Result<Rendering, Error> {
        Ok(Rendering::Text(self))
    }

    fn describe(_: &mut SchemaRegistry) -> Result<OutputDoc, SchemaError> {
        Ok(OutputDoc::Text)
    }
}

impl Reply for &'static str {
    fn into_rendering(self) -> Result<Rendering, Error> {
        Ok(Rendering::Text(self.to_string()))
    }

    fn describe(_: &mut SchemaRegistry) -> Result<OutputDoc, SchemaError> {
        Ok(OutputDoc::Text)
    }
}

impl Reply for Value {
    fn into_rendering(self) -> Result<Rendering, Error> {
        Ok(Rendering::Value(self))
    }

    fn describe(_: &mut SchemaRegistry) -> Result<OutputDoc, SchemaError> {
        Ok(OutputDoc::Serialized(RefOr::T(Schema::Object(ObjectBuilder::new().build()))))
    }
}

impl Reply for Box<dyn Renderer> {
    fn into_rendering(self) -> Result<Rendering, Error> {
        Ok(Rendering::Plain(self))
    }

    fn describe(_: &mut SchemaRegistry) -> Result<OutputDoc, SchemaError> {
        Ok(OutputDoc::Html)
    }
}

impl Reply for Box<dyn ContextRenderer> {
    fn into_rendering(self) -> Result<Rendering, Error> {
        Ok(Rendering::Context(self))
    }

    fn describe(_: &mut SchemaRegistry) -> Result<OutputDoc, SchemaError> {
        Ok(OutputDoc::Html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn writer_keeps_status_headers_and_body() {
        let mut w = ResponseWriter::new();
        w.set_content_type(TEXT_PLAIN);
        w.write_str("hello ");
        write!(w, "{}", 42).unwrap();

        let response = w.into_response(StatusCode::OK);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], TEXT_PLAIN);
    }

    #[test]
    fn explicit_writer_status_wins_over_default() {
        let mut w = ResponseWriter::new();
        w.set_status(StatusCode::ACCEPTED);
        assert_eq!(w.into_response(StatusCode::OK).status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn missing_optional_reply_renders_null() {
        let reply: Option<String> = None;
        assert!(matches!(reply.into_rendering(), Ok(Rendering::Null)));
        let reply = Some("text".to_string());
        assert!(matches!(reply.into_rendering(), Ok(Rendering::Text(t)) if t == "text"));
    }
}
