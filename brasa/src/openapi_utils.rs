//! Helpers that build and edit operations of the live OpenAPI document.

use axum::http::Method;
use utoipa::openapi::path::{Operation, OperationBuilder, ParameterBuilder, ParameterIn};
use utoipa::openapi::request_body::RequestBodyBuilder;
use utoipa::openapi::schema::{ObjectBuilder, Type};
use utoipa::openapi::tag::TagBuilder;
use utoipa::openapi::{self, ContentBuilder, Ref, RefOr, Required, ResponseBuilder, ResponsesBuilder, Schema};

use crate::render::{OutputDoc, TEXT_HTML, TEXT_PLAIN};

/// Scalar kinds a declared query parameter may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamKind {
    fn schema(self) -> RefOr<Schema> {
        let ty = match self {
            ParamKind::String => Type::String,
            ParamKind::Integer => Type::Integer,
            ParamKind::Number => Type::Number,
            ParamKind::Boolean => Type::Boolean,
        };
        RefOr::T(Schema::Object(ObjectBuilder::new().schema_type(ty).build()))
    }
}

/// Everything the registrar knows about a route's types.
pub(crate) struct OperationDoc<'a> {
    pub(crate) method: &'a Method,
    pub(crate) path: &'a str,
    pub(crate) body: Option<RefOr<Schema>>,
    pub(crate) output: Option<OutputDoc>,
    pub(crate) content_type: &'a str,
    pub(crate) error_content_type: &'a str,
}

/// `{name}` and `{*name}` segments of an axum route path.
pub(crate) fn path_params(path: &str) -> Vec<&str> {
    path.split('/')
        .filter_map(|segment| segment.strip_prefix('{')?.strip_suffix('}'))
        .map(|name| name.trim_start_matches('*'))
        .filter(|name| !name.is_empty())
        .collect()
}

/// `GET /recipes/{id}/dosings` → `get_recipes_by_id_dosings`.
pub(crate) fn operation_id(method: &Method, path: &str) -> String {
    let mut id = method.as_str().to_ascii_lowercase();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        id.push('_');
        match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(param) => {
                id.push_str("by_");
                id.push_str(&sanitize(param.trim_start_matches('*')));
            }
            None => id.push_str(&sanitize(segment)),
        }
    }
    id
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

fn error_response(description: &str, content_type: &str) -> openapi::Response {
    ResponseBuilder::new()
        .description(description)
        .content(
            content_type,
            ContentBuilder::new()
                .schema(Some(RefOr::Ref(Ref::from_schema_name("HTTPError"))))
                .build(),
        )
        .build()
}

pub(crate) fn build_operation(doc: OperationDoc<'_>) -> Operation {
    let mut operation_builder = OperationBuilder::new().operation_id(Some(operation_id(doc.method, doc.path)));

    // 1) 路径参数
    for name in path_params(doc.path) {
        let parameter = ParameterBuilder::new()
            .name(name)
            .required(Required::True)
            .parameter_in(ParameterIn::Path)
            .schema(Some(ParamKind::String.schema()))
            .build();
        operation_builder = operation_builder.parameter(parameter);
    }

    // 2) 请求体
    if let Some(schema) = doc.body {
        let request_body = RequestBodyBuilder::new()
            .required(Some(Required::True))
            .content("application/json", ContentBuilder::new().schema(Some(schema)).build())
            .build();
        operation_builder = operation_builder.request_body(Some(request_body));
    }

    // 3) 响应
    let mut success = ResponseBuilder::new().description("Successful response");
    match doc.output {
        Some(OutputDoc::Serialized(schema)) => {
            success = success.content(doc.content_type, ContentBuilder::new().schema(Some(schema)).build());
        }
        Some(OutputDoc::Text) => {
            success = success.content(TEXT_PLAIN, ContentBuilder::new().schema(Some(ParamKind::String.schema())).build());
        }
        Some(OutputDoc::Html) => {
            success = success.content(TEXT_HTML, ContentBuilder::new().schema(Some(ParamKind::String.schema())).build());
        }
        None => {}
    }
    let responses = ResponsesBuilder::new()
        .response("200", success.build())
        .response("400", error_response("Bad request", doc.error_content_type))
        .response("500", error_response("Internal server error", doc.error_content_type))
        .build();

    operation_builder.responses(responses).build()
}

/// A bare operation for routes whose types are unknown.
pub(crate) fn bare_operation(method: &Method, path: &str) -> Operation {
    let mut operation_builder = OperationBuilder::new().operation_id(Some(operation_id(method, path)));
    for name in path_params(path) {
        let parameter = ParameterBuilder::new()
            .name(name)
            .required(Required::True)
            .parameter_in(ParameterIn::Path)
            .schema(Some(ParamKind::String.schema()))
            .build();
        operation_builder = operation_builder.parameter(parameter);
    }
    let responses = ResponsesBuilder::new()
        .response("200", ResponseBuilder::new().description("Successful response").build())
        .build();
    operation_builder.responses(responses).build()
}

/// Stores `operation` at `paths[path][method]`, replacing any previous one.
pub(crate) fn set_operation(doc: &mut openapi::OpenApi, path: &str, method: &Method, operation: Operation) -> bool {
    let path_item = doc.paths.paths.entry(path.to_string()).or_default();
    let slot = match *method {
        Method::GET => &mut path_item.get,
        Method::POST => &mut path_item.post,
        Method::PUT => &mut path_item.put,
        Method::DELETE => &mut path_item.delete,
        Method::PATCH => &mut path_item.patch,
        Method::OPTIONS => &mut path_item.options,
        Method::HEAD => &mut path_item.head,
        Method::TRACE => &mut path_item.trace,
        _ => return false,
    };
    if slot.is_some() {
        tracing::warn!(%method, path, "replacing existing OpenAPI operation");
    }
    *slot = Some(operation);
    true
}

pub(crate) fn operation_mut<'a>(doc: &'a mut openapi::OpenApi, path: &str, method: &Method) -> Option<&'a mut Operation> {
    let path_item = doc.paths.paths.get_mut(path)?;
    match *method {
        Method::GET => path_item.get.as_mut(),
        Method::POST => path_item.post.as_mut(),
        Method::PUT => path_item.put.as_mut(),
        Method::DELETE => path_item.delete.as_mut(),
        Method::PATCH => path_item.patch.as_mut(),
        Method::OPTIONS => path_item.options.as_mut(),
        Method::HEAD => path_item.head.as_mut(),
        Method::TRACE => path_item.trace.as_mut(),
        _ => None,
    }
}

/// Adds `name` to the document's tag list unless present.
pub(crate) fn ensure_tag(doc: &mut openapi::OpenApi, name: &str) {
    let tags = doc.tags.get_or_insert_with(Vec::new);
    if !tags.iter().any(|tag| tag.name == name) {
        tags.push(TagBuilder::new().name(name).build());
    }
}

pub(crate) fn query_parameter(name: &str, kind: ParamKind, required: bool, description: Option<&str>) -> openapi::path::Parameter {
    ParameterBuilder::new()
        .name(name)
        .required(if required { Required::True } else { Required::False })
        .description(description)
        .parameter_in(ParameterIn::Query)
        .schema(Some(kind.schema()))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_params_are_read_from_braces() {
        assert_eq!(path_params("/recipes/{id}/dosings/{dosing_id}"), vec!["id", "dosing_id"]);
        assert_eq!(path_params("/files/{*rest}"), vec!["rest"]);
        assert!(path_params("/recipes").is_empty());
    }

    #[test]
    fn operation_ids_follow_method_and_path() {
        assert_eq!(operation_id(&Method::GET, "/recipes/{id}"), "get_recipes_by_id");
        assert_eq!(operation_id(&Method::POST, "/api/auth-login"), "post_api_auth_login");
    }

    #[test]
    fn operations_are_replaced_in_place() {
        let mut doc = openapi::OpenApiBuilder::new().paths(openapi::Paths::new()).build();
        assert!(set_operation(&mut doc, "/a", &Method::GET, bare_operation(&Method::GET, "/a")));
        let replacement = OperationBuilder::new().operation_id(Some("second")).build();
        assert!(set_operation(&mut doc, "/a", &Method::GET, replacement));

        let op = operation_mut(&mut doc, "/a", &Method::GET).unwrap();
        assert_eq!(op.operation_id.as_deref(), Some("second"));
        assert!(operation_mut(&mut doc, "/a", &Method::POST).is_none());
    }

    #[test]
    fn tags_are_unique() {
        let mut doc = openapi::OpenApiBuilder::new().build();
        ensure_tag(&mut doc, "dosing");
        ensure_tag(&mut doc, "dosing");
        assert_eq!(doc.tags.unwrap().len(), 1);
    }
}
