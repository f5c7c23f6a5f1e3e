//! Wire encoders for success values and for normalized errors, and the
//! mapping from [`Error`] to [`HttpError`].

use std::io;

use axum::http::StatusCode;
use quick_xml::events::{BytesDecl, BytesText, Event};
use quick_xml::Writer;
use serde_json::Value;

use crate::error::{BindingError, Error, FieldError, HttpError};
use crate::render::{ResponseWriter, TEXT_PLAIN};

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_XML: &str = "application/xml";

/// Encodes successful results.
pub trait Serializer: Send + Sync {
    fn serialize(&self, w: &mut ResponseWriter, value: &Value) -> Result<(), Error>;

    /// Content type advertised in the OpenAPI document.
    fn content_type(&self) -> &str {
        APPLICATION_JSON
    }
}

impl<F> Serializer for F
where
    F: Fn(&mut ResponseWriter, &Value) -> Result<(), Error> + Send + Sync,
{
    fn serialize(&self, w: &mut ResponseWriter, value: &Value) -> Result<(), Error> {
        self(w, value)
    }
}

/// Encodes error responses. It cannot fail: there is nothing left to report to.
pub trait ErrorSerializer: Send + Sync {
    fn serialize_error(&self, w: &mut ResponseWriter, err: &HttpError);

    fn content_type(&self) -> &str {
        APPLICATION_JSON
    }
}

impl<F> ErrorSerializer for F
where
    F: Fn(&mut ResponseWriter, &HttpError) + Send + Sync,
{
    fn serialize_error(&self, w: &mut ResponseWriter, err: &HttpError) {
        self(w, err)
    }
}

/// Maps any pipeline failure to the normalized error shape.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, err: &Error) -> HttpError;
}

impl<F> ErrorHandler for F
where
    F: Fn(&Error) -> HttpError + Send + Sync,
{
    fn handle(&self, err: &Error) -> HttpError {
        self(err)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, w: &mut ResponseWriter, value: &Value) -> Result<(), Error> {
        w.set_content_type(APPLICATION_JSON);
        serde_json::to_writer(w, value).map_err(|e| Error::render(e.to_string()))
    }
}

impl ErrorSerializer for JsonSerializer {
    fn serialize_error(&self, w: &mut ResponseWriter, err: &HttpError) {
        match serde_json::to_vec(err) {
            Ok(bytes) => {
                w.set_content_type(APPLICATION_JSON);
                io::Write::write_all(w, &bytes).ok();
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to encode error body as JSON");
                w.set_content_type(TEXT_PLAIN);
                w.write_str(&err.error);
            }
        }
    }
}

/// XML encoding. Success values are wrapped in a `<response>` root.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlSerializer;

impl Serializer for XmlSerializer {
    fn serialize(&self, w: &mut ResponseWriter, value: &Value) -> Result<(), Error> {
        let xml = quick_xml::se::to_string_with_root("response", value)
            .map_err(|e| Error::render(e.to_string()))?;
        w.set_content_type(APPLICATION_XML);
        w.write_str(&xml);
        Ok(())
    }

    fn content_type(&self) -> &str {
        APPLICATION_XML
    }
}

impl ErrorSerializer for XmlSerializer {
    fn serialize_error(&self, w: &mut ResponseWriter, err: &HttpError) {
        let mut buf = Vec::with_capacity(128);
        match write_error_xml(&mut buf, err) {
            Ok(()) => {
                w.set_content_type(APPLICATION_XML);
                io::Write::write_all(w, &buf).ok();
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to encode error body as XML");
                w.set_content_type(TEXT_PLAIN);
                w.write_str(&err.error);
            }
        }
    }

    fn content_type(&self) -> &str {
        APPLICATION_XML
    }
}

fn write_error_xml(buf: &mut Vec<u8>, err: &HttpError) -> io::Result<()> {
    let mut writer = Writer::new(buf);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    writer.create_element("HTTPError").write_inner_content(|w| {
        w.create_element("error")
            .write_text_content(BytesText::new(&err.error))?;
        for detail in &err.details {
            w.create_element("details").write_inner_content(|d| {
                d.create_element("field")
                    .write_text_content(BytesText::new(&detail.field))?;
                d.create_element("message")
                    .write_text_content(BytesText::new(&detail.message))?;
                Ok(())
            })?;
        }
        Ok(())
    })?;

    Ok(())
}

/// Default mapping. Unclassified errors keep their raw text in the body; pass
/// a custom [`ErrorHandler`] to hide it.
pub fn default_error_handler(err: &Error) -> HttpError {
    match err {
        Error::Binding(BindingError::PayloadTooLarge { .. }) => {
            HttpError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
        }
        Error::Binding(BindingError::UnknownFields(fields)) => {
            let details = fields
                .iter()
                .map(|field| FieldError {
                    field: field.clone(),
                    message: "unknown field".to_string(),
                })
                .collect();
            HttpError::new(StatusCode::BAD_REQUEST, err.to_string()).with_details(details)
        }
        Error::Binding(_) => HttpError::new(StatusCode::BAD_REQUEST, err.to_string()),
        Error::Validation(validation) => {
            HttpError::new(StatusCode::BAD_REQUEST, validation.message.clone())
                .with_details(validation.details.clone())
        }
        Error::Transform(_) => HttpError::new(StatusCode::BAD_REQUEST, err.to_string()),
        Error::NotFound(_) => HttpError::new(StatusCode::NOT_FOUND, err.to_string()),
        Error::Unauthorized(_) => HttpError::new(StatusCode::UNAUTHORIZED, err.to_string()),
        Error::Forbidden(_) => HttpError::new(StatusCode::FORBIDDEN, err.to_string()),
        Error::Render(_) => HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        Error::Status { status, message } => HttpError::new(*status, message.clone()),
        Error::Other(_) => HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use serde_json::json;

    fn body_of(w: &ResponseWriter) -> &str {
        std::str::from_utf8(w.body()).unwrap()
    }

    #[test]
    fn json_error_omits_empty_details() {
        let mut w = ResponseWriter::new();
        JsonSerializer.serialize_error(&mut w, &HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "error happened!"));
        assert_eq!(body_of(&w), r#"{"error":"error happened!"}"#);
        assert_eq!(w.content_type(), Some(APPLICATION_JSON));
    }

    #[test]
    fn json_success_keeps_field_order() {
        let mut w = ResponseWriter::new();
        JsonSerializer
            .serialize(&mut w, &json!({"name": "M. John", "ans": "redacted"}))
            .unwrap();
        assert_eq!(body_of(&w), r#"{"name":"M. John","ans":"redacted"}"#);
    }

    #[test]
    fn xml_error_lists_details() {
        let mut w = ResponseWriter::new();
        let err = HttpError::new(StatusCode::BAD_REQUEST, "invalid dosing")
            .with_details(vec![FieldError { field: "unit".into(), message: "unknown unit".into() }]);
        XmlSerializer.serialize_error(&mut w, &err);
        let xml = body_of(&w);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<HTTPError><error>invalid dosing</error>"));
        assert!(xml.contains("<details><field>unit</field><message>unknown unit</message></details>"));
        assert_eq!(w.content_type(), Some(APPLICATION_XML));
    }

    #[test]
    fn xml_success_is_wrapped_in_response_root() {
        let mut w = ResponseWriter::new();
        XmlSerializer.serialize(&mut w, &json!({"ans": "Hello World"})).unwrap();
        assert_eq!(body_of(&w), "<response><ans>Hello World</ans></response>");
    }

    #[test]
    fn default_mapping_by_kind() {
        let cases = [
            (Error::not_found("no recipe"), StatusCode::NOT_FOUND),
            (Error::unauthorized("login first"), StatusCode::UNAUTHORIZED),
            (Error::forbidden("nope"), StatusCode::FORBIDDEN),
            (Error::msg("error happened!"), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::status(StatusCode::CONFLICT, "taken"), StatusCode::CONFLICT),
            (BindingError::PayloadTooLarge { limit: 1 }.into(), StatusCode::PAYLOAD_TOO_LARGE),
            (BindingError::Decode("eof".into()).into(), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(default_error_handler(&err).status, status, "{err}");
        }
    }

    #[test]
    fn validation_details_are_carried_over() {
        let err: Error = ValidationError::field("quantity", "must be positive").into();
        let mapped = default_error_handler(&err);
        assert_eq!(mapped.status, StatusCode::BAD_REQUEST);
        assert_eq!(mapped.details[0].field, "quantity");
    }

    #[test]
    fn closures_are_serializers() {
        let custom = |w: &mut ResponseWriter, err: &HttpError| {
            w.set_content_type("text/html");
            w.write_str(&format!("<p>{}</p>", err.error));
        };
        let mut w = ResponseWriter::new();
        custom.serialize_error(&mut w, &HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "boom"));
        assert_eq!(body_of(&w), "<p>boom</p>");
    }
}
