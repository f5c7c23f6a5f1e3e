//! Request body binding: size limit, decoding, unknown-field policy and the
//! input transform.

use std::error::Error as StdError;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap};
use http_body_util::LengthLimitError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use utoipa::openapi::{RefOr, Schema};
use utoipa::ToSchema;

use crate::context::RequestContext;
use crate::error::{BindingError, Error};
use crate::schema::{BodyShape, SchemaError, SchemaRegistry};
use crate::transform::InTransform;

/// Default maximum request body size (1 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Input type of routes that take no body. Binding it never reads the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoBody;

/// A type a request body can be bound to.
///
/// Implemented for every `DeserializeOwned + ToSchema + InTransform` type,
/// for `Vec`s of them and for [`NoBody`].
pub trait RequestBody: Sized + Send + 'static {
    const EXPECTS_BODY: bool = true;

    fn from_json(value: Value) -> Result<Self, BindingError>;

    fn from_xml(text: &str) -> Result<Self, BindingError>;

    fn apply_in_transform(&mut self, ctx: &RequestContext) -> Result<(), Error>;

    /// Schema of the body for the OpenAPI document; `None` when there is no body.
    fn describe(registry: &mut SchemaRegistry) -> Result<Option<RefOr<Schema>>, SchemaError>;

    fn without_body() -> Option<Self> {
        None
    }
}

impl<T> RequestBody for T
where
    T: DeserializeOwned + ToSchema + InTransform + Send + 'static,
{
    fn from_json(value: Value) -> Result<Self, BindingError> {
        decode_json(value)
    }

    fn from_xml(text: &str) -> Result<Self, BindingError> {
        decode_xml(text)
    }

    fn apply_in_transform(&mut self, ctx: &RequestContext) -> Result<(), Error> {
        self.in_transform(ctx)
    }

    fn describe(registry: &mut SchemaRegistry) -> Result<Option<RefOr<Schema>>, SchemaError> {
        registry.register::<T>().map(Some)
    }
}

impl<T> RequestBody for Vec<T>
where
    T: DeserializeOwned + ToSchema + InTransform + Send + 'static,
{
    fn from_json(value: Value) -> Result<Self, BindingError> {
        decode_json(value)
    }

    fn from_xml(text: &str) -> Result<Self, BindingError> {
        decode_xml(text)
    }

    fn apply_in_transform(&mut self, ctx: &RequestContext) -> Result<(), Error> {
        self.iter_mut().try_for_each(|item| item.in_transform(ctx))
    }

    fn describe(registry: &mut SchemaRegistry) -> Result<Option<RefOr<Schema>>, SchemaError> {
        registry.register_array::<T>().map(Some)
    }
}

fn decode_json<T: DeserializeOwned>(value: Value) -> Result<T, BindingError> {
    serde_json::from_value(value).map_err(|e| BindingError::Decode(e.to_string()))
}

fn decode_xml<T: DeserializeOwned>(text: &str) -> Result<T, BindingError> {
    quick_xml::de::from_str(text).map_err(|e| BindingError::Decode(e.to_string()))
}

impl RequestBody for NoBody {
    const EXPECTS_BODY: bool = false;

    fn from_json(_: Value) -> Result<Self, BindingError> {
        Ok(NoBody)
    }

    fn from_xml(_: &str) -> Result<Self, BindingError> {
        Ok(NoBody)
    }

    fn apply_in_transform(&mut self, _: &RequestContext) -> Result<(), Error> {
        Ok(())
    }

    fn describe(_: &mut SchemaRegistry) -> Result<Option<RefOr<Schema>>, SchemaError> {
        Ok(None)
    }

    fn without_body() -> Option<Self> {
        Some(NoBody)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFormat {
    Json,
    Xml,
}

impl BodyFormat {
    fn of(headers: &HeaderMap) -> Self {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mime = content_type.split(';').next().unwrap_or_default().trim();
        if mime == "application/xml" || mime == "text/xml" || mime.ends_with("+xml") {
            BodyFormat::Xml
        } else {
            BodyFormat::Json
        }
    }
}

/// Per-route binding settings, fixed at registration.
#[derive(Debug, Clone)]
pub(crate) struct Binder {
    max_body_size: usize,
    disallow_unknown_fields: bool,
    shape: Option<BodyShape>,
}

impl Binder {
    pub(crate) fn new(max_body_size: usize, disallow_unknown_fields: bool, shape: Option<BodyShape>) -> Self {
        Self {
            max_body_size,
            disallow_unknown_fields,
            shape,
        }
    }

    pub(crate) async fn bind<B: RequestBody>(&self, ctx: &RequestContext, body: Body) -> Result<B, Error> {
        if let Some(empty) = B::without_body() {
            return Ok(empty);
        }

        let bytes = self.read(ctx.headers(), body).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(BindingError::Empty.into());
        }

        let mut value = match BodyFormat::of(ctx.headers()) {
            BodyFormat::Xml => {
                let text = std::str::from_utf8(&bytes).map_err(|e| BindingError::Decode(e.to_string()))?;
                B::from_xml(text)?
            }
            BodyFormat::Json => {
                let json: Value =
                    serde_json::from_slice(&bytes).map_err(|e| BindingError::Decode(e.to_string()))?;
                if self.disallow_unknown_fields {
                    if let Some(shape) = &self.shape {
                        let unknown = shape.unknown_fields(&json);
                        if !unknown.is_empty() {
                            return Err(BindingError::UnknownFields(unknown).into());
                        }
                    }
                }
                B::from_json(json)?
            }
        };

        value.apply_in_transform(ctx).map_err(Error::into_transform)?;
        Ok(value)
    }

    async fn read(&self, headers: &HeaderMap, body: Body) -> Result<Bytes, BindingError> {
        let limit = self.max_body_size;
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(BindingError::PayloadTooLarge { limit });
        }

        axum::body::to_bytes(body, limit).await.map_err(|err| {
            let inner = err.into_inner();
            if exceeded_limit(inner.as_ref()) {
                BindingError::PayloadTooLarge { limit }
            } else {
                BindingError::Read(inner.to_string())
            }
        })
    }
}

fn exceeded_limit(err: &(dyn StdError + Send + Sync + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}
