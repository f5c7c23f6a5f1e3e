//! Route registration: attaches handlers to the router and records their
//! operations in the OpenAPI document.

use std::future::Future;
use std::sync::Arc;

use axum::handler::Handler;
use axum::http::Method;
use utoipa::openapi::path::Operation;
use utoipa::openapi::Deprecated;

use crate::binder::{Binder, RequestBody};
use crate::context::Context;
use crate::error::Error;
use crate::handler::typed_handler;
use crate::openapi_utils::{self, OperationDoc, ParamKind};
use crate::render::Reply;
use crate::schema::{BodyShape, SchemaRegistry};
use crate::server::Server;

#[derive(Debug, Clone)]
struct QueryParam {
    name: String,
    kind: ParamKind,
    required: bool,
    description: Option<String>,
}

/// Documentation options applied when a route is registered.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    tags: Vec<String>,
    summary: Option<String>,
    description: Option<String>,
    deprecated: bool,
    operation_id: Option<String>,
    query: Vec<QueryParam>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, kind: ParamKind, required: bool) -> Self {
        self.query.push(QueryParam {
            name: name.into(),
            kind,
            required,
            description: None,
        });
        self
    }

    pub fn query_param_with_description(
        mut self,
        name: impl Into<String>,
        kind: ParamKind,
        required: bool,
        description: impl Into<String>,
    ) -> Self {
        self.query.push(QueryParam {
            name: name.into(),
            kind,
            required,
            description: Some(description.into()),
        });
        self
    }
}

/// Handle to a registered route; further calls edit its OpenAPI operation.
pub struct RouteHandle<'a> {
    server: &'a mut Server,
    method: Method,
    path: String,
}

impl RouteHandle<'_> {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full path, base path included.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn edit(&mut self, f: impl FnOnce(&mut Operation)) {
        if let Some(operation) = openapi_utils::operation_mut(&mut self.server.openapi, &self.path, &self.method) {
            f(operation);
        }
    }

    pub fn tag(self, tag: impl Into<String>) -> Self {
        let tag: String = tag.into();
        self.tags([tag])
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        for tag in &tags {
            openapi_utils::ensure_tag(&mut self.server.openapi, tag);
        }
        self.edit(|op| {
            let existing = op.tags.get_or_insert_with(Vec::new);
            for tag in tags {
                if !existing.contains(&tag) {
                    existing.push(tag);
                }
            }
        });
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        let summary = summary.into();
        self.edit(|op| op.summary = Some(summary));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.edit(|op| op.description = Some(description));
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.edit(|op| op.deprecated = Some(Deprecated::True));
        self
    }

    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.edit(|op| op.operation_id = Some(id));
        self
    }

    pub fn query_param(self, name: impl Into<String>, kind: ParamKind, required: bool) -> Self {
        self.add_query(QueryParam {
            name: name.into(),
            kind,
            required,
            description: None,
        })
    }

    fn add_query(mut self, param: QueryParam) -> Self {
        let parameter = openapi_utils::query_parameter(&param.name, param.kind, param.required, param.description.as_deref());
        self.edit(|op| op.parameters.get_or_insert_with(Vec::new).push(parameter));
        self
    }

    fn apply(mut self, options: RouteOptions) -> Self {
        if !options.tags.is_empty() {
            self = self.tags(options.tags);
        }
        if let Some(summary) = options.summary {
            self = self.summary(summary);
        }
        if let Some(description) = options.description {
            self = self.description(description);
        }
        if options.deprecated {
            self = self.deprecated();
        }
        if let Some(id) = options.operation_id {
            self = self.operation_id(id);
        }
        for param in options.query {
            self = self.add_query(param);
        }
        self
    }
}

/// Registers a typed controller under `method` + `path`.
///
/// The operation is derived from `B` and `T` once, here. Schema problems are
/// logged and leave the operation incomplete; the route still serves.
/// Registering the same method and path twice replaces the documented
/// operation, while axum itself refuses the duplicate route with a panic.
pub fn register<'a, B, T, F, Fut>(
    server: &'a mut Server,
    method: Method,
    path: &str,
    controller: F,
    options: RouteOptions,
) -> RouteHandle<'a>
where
    B: RequestBody,
    T: Reply,
    F: Fn(Context<B>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    let full_path = server.full_path(path);

    let body = match B::describe(&mut server.registry) {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(%method, path = %full_path, error = %err, "could not document request body");
            None
        }
    };
    let output = match T::describe(&mut server.registry) {
        Ok(output) => Some(output),
        Err(err) => {
            tracing::warn!(%method, path = %full_path, error = %err, "could not document response");
            None
        }
    };

    let shape = match &body {
        Some(root) => Some(server.registry.shape(root.clone())),
        None => detached_shape::<B>(),
    };
    let binder = Arc::new(Binder::new(
        server.settings.max_body_size,
        server.settings.disallow_unknown_fields,
        shape,
    ));
    let handler = typed_handler(server.pipeline.clone(), binder, controller);
    server.route(&method, &full_path, handler);

    let operation = openapi_utils::build_operation(OperationDoc {
        method: &method,
        path: &full_path,
        body,
        output,
        content_type: server.pipeline.serializer.content_type(),
        error_content_type: server.pipeline.error_serializer.content_type(),
    });
    openapi_utils::set_operation(&mut server.openapi, &full_path, &method, operation);
    tracing::debug!(%method, path = %full_path, "registered route");

    RouteHandle {
        server,
        method,
        path: full_path,
    }
    .apply(options)
}

/// Shape of `B` from a registry of its own, for when the shared one could not
/// take it (a name clash with another route's type, say). Unknown-field
/// checks must not depend on the document.
fn detached_shape<B: RequestBody>() -> Option<BodyShape> {
    if !B::EXPECTS_BODY {
        return None;
    }
    let mut registry = SchemaRegistry::new();
    match B::describe(&mut registry) {
        Ok(root) => root.map(|root| registry.shape(root)),
        Err(err) => {
            tracing::warn!(error = %err, "request body shape unavailable, unknown fields are not checked");
            None
        }
    }
}

/// Registers any axum handler; it is documented with a bare operation.
pub fn register_std<'a, H, M>(server: &'a mut Server, method: Method, path: &str, handler: H, options: RouteOptions) -> RouteHandle<'a>
where
    H: Handler<M, ()>,
    M: 'static,
{
    let full_path = server.full_path(path);
    server.route(&method, &full_path, handler);
    let operation = openapi_utils::bare_operation(&method, &full_path);
    openapi_utils::set_operation(&mut server.openapi, &full_path, &method, operation);
    tracing::debug!(%method, path = %full_path, "registered plain route");

    RouteHandle {
        server,
        method,
        path: full_path,
    }
    .apply(options)
}

macro_rules! typed_routes {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Registers a typed `", stringify!($method), "` route.")]
            pub fn $name<'a, B, T, F, Fut>(server: &'a mut Server, path: &str, controller: F, options: RouteOptions) -> RouteHandle<'a>
            where
                B: RequestBody,
                T: Reply,
                F: Fn(Context<B>) -> Fut + Clone + Send + Sync + 'static,
                Fut: Future<Output = Result<T, Error>> + Send + 'static,
            {
                register(server, Method::$method, path, controller, options)
            }
        )*
    };
}

macro_rules! std_routes {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Registers a plain axum handler for `", stringify!($method), "`.")]
            pub fn $name<'a, H, M>(server: &'a mut Server, path: &str, handler: H, options: RouteOptions) -> RouteHandle<'a>
            where
                H: Handler<M, ()>,
                M: 'static,
            {
                register_std(server, Method::$method, path, handler, options)
            }
        )*
    };
}

typed_routes!(get => GET, post => POST, put => PUT, patch => PATCH, delete => DELETE);
std_routes!(get_std => GET, post_std => POST, put_std => PUT, patch_std => PATCH, delete_std => DELETE);
