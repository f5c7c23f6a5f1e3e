//! # Brasa - typed handlers and live OpenAPI on top of axum
//!
//! `brasa` lets a service declare its routes as plain async functions over
//! typed input and output. Each registration derives the OpenAPI operation
//! from those types, and every request runs through the same pipeline:
//!
//! bind body → in-transform → controller → out-transform → render / serialize
//!
//! with any failure mapped to one error shape and written by the error
//! serializer.
//!
//! ## Core Features:
//!
//! - **Typed controllers**: `async fn(Context<B>) -> Result<T, Error>`; `B` is
//!   decoded lazily (once per request) and `T` picks how it is written: a
//!   serialized value, plain text, a renderer or a template.
//! - **Capability hooks**: [`InTransform`] and [`OutTransform`] normalize,
//!   validate or redact values around the controller.
//! - **`#[api_dto]`** / **`#[api]`**: derive serde + `utoipa::ToSchema` with
//!   default hooks, and generate registration functions documented from doc
//!   comments.
//! - **Docs**: the JSON document and a Swagger UI page are served next to the
//!   API and saved locally when the server starts.
//!
//! ```rust,ignore
//! use brasa::{Context, Error, RouteOptions, Server};
//!
//! async fn hello(_ctx: Context) -> Result<String, Error> {
//!     Ok("Hello World".to_string())
//! }
//!
//! let mut server = Server::builder().addr(":8080").build();
//! brasa::get(&mut server, "/hello", hello, RouteOptions::new().tag("demo"));
//! server.run().await?;
//! ```

extern crate self as brasa;

pub mod binder;
mod bootstrap;
pub mod context;
pub mod docs;
pub mod error;
pub mod handler;
pub mod openapi_utils;
pub mod render;
pub mod route;
pub mod schema;
pub mod security;
pub mod serialize;
pub mod server;
pub mod template;
pub mod transform;

pub use axum::http::{header, HeaderValue, Method, StatusCode};

pub use binder::{NoBody, RequestBody, DEFAULT_MAX_BODY_SIZE};
pub use context::{Context, RequestContext};
pub use error::{BindingError, Error, FieldError, HttpError, StartupError, ValidationError};
pub use openapi_utils::ParamKind;
pub use render::{ContextRenderer, OutputDoc, Renderer, Rendering, Reply, ResponseWriter};
pub use route::{delete, delete_std, get, get_std, patch, patch_std, post, post_std, put, put_std, register, register_std, RouteHandle, RouteOptions};
pub use schema::{SchemaError, SchemaRegistry};
pub use security::{Claims, LoginPayload, Security, TokenResponse};
pub use serialize::{default_error_handler, ErrorHandler, ErrorSerializer, JsonSerializer, Serializer, XmlSerializer};
pub use server::{OpenApiConfig, Server, ServerBuilder, DEFAULT_ADDR, DEFAULT_TIMEOUT};
pub use template::{Template, Templates};
pub use transform::{InTransform, OutTransform};

#[cfg(feature = "macros")]
pub use brasa_macros::{api, api_dto};

// Same versions brasa is built against.
pub use serde;
pub use utoipa;
