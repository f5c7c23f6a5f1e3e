//! The dispatch core: turns a typed controller into a plain axum handler.
//!
//! Per request: bind → in-transform → controller → out-transform → render.
//! Any failure on the way goes through the error handler and the error
//! serializer, never the success serializer.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::rejection::PathRejection;
use axum::extract::{FromRequestParts, Path, Request};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use serde_json::Value;

use crate::binder::{Binder, RequestBody};
use crate::context::{Context, RequestContext};
use crate::error::{BindingError, Error};
use crate::render::{Rendering, Reply, ResponseWriter, TEXT_HTML, TEXT_PLAIN};
use crate::serialize::{ErrorHandler, ErrorSerializer, Serializer};
use crate::template::Templates;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Server-wide encoders and error mapping shared by every typed route.
#[derive(Clone)]
pub(crate) struct Pipeline {
    pub(crate) serializer: Arc<dyn Serializer>,
    pub(crate) error_serializer: Arc<dyn ErrorSerializer>,
    pub(crate) error_handler: Arc<dyn ErrorHandler>,
    pub(crate) templates: Option<Templates>,
}

impl Pipeline {
    fn render(&self, rendering: Rendering, request: &RequestContext, w: &mut ResponseWriter) -> Result<(), Error> {
        match rendering {
            Rendering::Context(renderer) => {
                default_content_type(w, TEXT_HTML);
                renderer.render_with(request, w)
            }
            Rendering::Plain(renderer) => {
                default_content_type(w, TEXT_HTML);
                renderer.render(w)
            }
            Rendering::Text(text) => {
                w.set_content_type(TEXT_PLAIN);
                w.write_str(&text);
                Ok(())
            }
            Rendering::Value(value) => self.serializer.serialize(w, &value),
            Rendering::Null => self.serializer.serialize(w, &Value::Null),
        }
    }

    /// Maps `err` and writes it with the error serializer. Output already
    /// produced for the failed response is dropped; controller headers stay.
    fn fail(&self, method: &Method, path: &str, err: Error, headers: HeaderMap) -> Response {
        let mapped = self.error_handler.handle(&err);
        if mapped.status.is_server_error() {
            tracing::error!(%method, path, status = mapped.status.as_u16(), error = %err, "request failed");
        } else {
            tracing::debug!(%method, path, status = mapped.status.as_u16(), error = %err, "request rejected");
        }
        let mut w = ResponseWriter::with_headers(headers);
        self.error_serializer.serialize_error(&mut w, &mapped);
        w.into_response(mapped.status)
    }
}

fn default_content_type(w: &mut ResponseWriter, content_type: &str) {
    if w.content_type().is_none() {
        w.set_content_type(content_type);
    }
}

/// Wraps `controller` into a handler usable with `axum::routing::on`.
pub(crate) fn typed_handler<B, T, F, Fut>(
    pipeline: Arc<Pipeline>,
    binder: Arc<Binder>,
    controller: F,
) -> impl Fn(Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    B: RequestBody,
    T: Reply,
    F: Fn(Context<B>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    move |req: Request| {
        let pipeline = pipeline.clone();
        let binder = binder.clone();
        let controller = controller.clone();
        Box::pin(async move { dispatch(&pipeline, binder, &controller, req).await })
    }
}

pub(crate) async fn dispatch<B, T, F, Fut>(pipeline: &Pipeline, binder: Arc<Binder>, controller: &F, req: Request) -> Response
where
    B: RequestBody,
    T: Reply,
    F: Fn(Context<B>) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let (mut parts, body) = req.into_parts();

    let path_params = match Path::<HashMap<String, String>>::from_request_parts(&mut parts, &()).await {
        Ok(Path(params)) => params,
        Err(PathRejection::MissingPathParams(_)) => HashMap::new(),
        Err(rejection) => {
            let err = BindingError::Path(rejection.body_text()).into();
            return pipeline.fail(&parts.method, parts.uri.path(), err, HeaderMap::new());
        }
    };

    let request = Arc::new(RequestContext::new(&parts, path_params, pipeline.templates.clone()));
    let ctx = Context::<B>::new(request.clone(), body, binder);

    let outcome = invoke(&request, ctx, controller).await;
    let head = request.take_head();

    let rendering = match outcome {
        Ok(rendering) => rendering,
        Err(err) => return pipeline.fail(&parts.method, parts.uri.path(), err, head.headers),
    };

    let mut w = ResponseWriter::with_headers(head.headers.clone());
    match pipeline.render(rendering, &request, &mut w) {
        Ok(()) => w.into_response(head.status.unwrap_or(StatusCode::OK)),
        Err(err) => pipeline.fail(&parts.method, parts.uri.path(), err.into_render(), head.headers),
    }
}

async fn invoke<B, T, F, Fut>(request: &RequestContext, mut ctx: Context<B>, controller: &F) -> Result<Rendering, Error>
where
    B: RequestBody,
    T: Reply,
    F: Fn(Context<B>) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    // 先绑定请求体：入参变换失败时不会调用 controller
    if B::EXPECTS_BODY {
        ctx.body().await?;
    }
    let mut reply = controller(ctx).await?;
    reply.apply_out_transform(request).map_err(Error::into_render)?;
    reply.into_rendering()
}
