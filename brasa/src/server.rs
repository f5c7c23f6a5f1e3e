//! Server construction and lifecycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::handler::Handler;
use axum::http::Method;
use axum::middleware;
use axum::routing::{on, MethodFilter};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tracing::Dispatch;
use utoipa::openapi::{self, OpenApi};

use crate::binder::DEFAULT_MAX_BODY_SIZE;
use crate::bootstrap::{self, LogSetup};
use crate::docs;
use crate::error::{Error, HttpError, StartupError};
use crate::handler::Pipeline;
use crate::route::{self, RouteOptions};
use crate::schema::SchemaRegistry;
use crate::security::{self, Claims, Security, VerifyUser};
use crate::serialize::{default_error_handler, ErrorHandler, ErrorSerializer, JsonSerializer, Serializer, XmlSerializer};
use crate::template::Templates;

pub const DEFAULT_ADDR: &str = ":9999";

/// Upper bound on handling one request, body read included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and whether the OpenAPI document is exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenApiConfig {
    pub disable_swagger: bool,
    pub disable_spec_route: bool,
    pub disable_local_save: bool,
    pub swagger_url: String,
    pub json_spec_url: String,
    pub json_spec_local_path: String,
}

impl Default for OpenApiConfig {
    fn default() -> Self {
        Self {
            disable_swagger: false,
            disable_spec_route: false,
            disable_local_save: false,
            swagger_url: "/swagger".to_string(),
            json_spec_url: "/swagger/openapi.json".to_string(),
            json_spec_local_path: "doc/openapi.json".to_string(),
        }
    }
}

fn valid_url(url: &str) -> bool {
    url.starts_with('/') && !url.chars().any(char::is_whitespace)
}

fn valid_local_path(path: &str) -> bool {
    path.ends_with(".json") && !path.chars().any(char::is_whitespace)
}

impl OpenApiConfig {
    /// Empty values take the default; invalid ones are logged and replaced.
    pub(crate) fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.swagger_url.is_empty() {
            self.swagger_url = defaults.swagger_url.clone();
        } else if !valid_url(&self.swagger_url) {
            tracing::error!(url = %self.swagger_url, "invalid swagger_url, using default");
            self.swagger_url = defaults.swagger_url.clone();
        }
        if self.json_spec_url.is_empty() {
            self.json_spec_url = defaults.json_spec_url.clone();
        } else if !valid_url(&self.json_spec_url) {
            tracing::error!(url = %self.json_spec_url, "invalid json_spec_url, using default");
            self.json_spec_url = defaults.json_spec_url.clone();
        }
        if self.json_spec_local_path.is_empty() {
            self.json_spec_local_path = defaults.json_spec_local_path;
        } else if !valid_local_path(&self.json_spec_local_path) {
            tracing::error!(file = %self.json_spec_local_path, "invalid json_spec_local_path, using default");
            self.json_spec_local_path = defaults.json_spec_local_path;
        }
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) addr: String,
    pub(crate) base_path: String,
    pub(crate) max_body_size: usize,
    pub(crate) disallow_unknown_fields: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) openapi: OpenApiConfig,
}

/// Configures a [`Server`]. Every option is independent; unset ones keep
/// their defaults.
pub struct ServerBuilder {
    addr: String,
    base_path: String,
    max_body_size: usize,
    disallow_unknown_fields: bool,
    timeout: Option<Duration>,
    serializer: Arc<dyn Serializer>,
    error_serializer: Arc<dyn ErrorSerializer>,
    error_handler: Arc<dyn ErrorHandler>,
    templates: Option<Templates>,
    auto_auth: Option<VerifyUser>,
    jwt_secret: Option<Vec<u8>>,
    log: LogSetup,
    openapi: OpenApiConfig,
    title: String,
    version: String,
    description: Option<String>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            base_path: String::new(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            disallow_unknown_fields: true,
            timeout: Some(DEFAULT_TIMEOUT),
            serializer: Arc::new(JsonSerializer),
            error_serializer: Arc::new(JsonSerializer),
            error_handler: Arc::new(default_error_handler),
            templates: None,
            auto_auth: None,
            jwt_secret: None,
            log: LogSetup::Default,
            openapi: OpenApiConfig::default(),
            title: "OpenAPI".to_string(),
            version: "0.0.1".to_string(),
            description: None,
        }
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen address; `:8080` listens on every interface.
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Reads `HOST` and `PORT`; missing variables keep the current address parts.
    pub fn addr_from_env(mut self) -> Self {
        self.addr = bootstrap::addr_from_env(&self.addr);
        self
    }

    /// Prefix for every route registered afterwards; `api` and `/api/` both mean `/api`.
    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        let base_path = base_path.into();
        let trimmed = base_path.trim_matches('/');
        self.base_path = if trimmed.is_empty() { String::new() } else { format!("/{trimmed}") };
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn disallow_unknown_fields(mut self, disallow: bool) -> Self {
        self.disallow_unknown_fields = disallow;
        self
    }

    /// Requests still running after `timeout` are answered with
    /// `408 Request Timeout`. Defaults to [`DEFAULT_TIMEOUT`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn error_serializer(mut self, serializer: impl ErrorSerializer + 'static) -> Self {
        self.error_serializer = Arc::new(serializer);
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// XML for both success and error bodies.
    pub fn xml(self) -> Self {
        self.serializer(XmlSerializer).error_serializer(XmlSerializer)
    }

    /// Loads view templates from `dir`; see [`Templates::load`].
    pub fn templates(mut self, dir: impl Into<PathBuf>, globs: &[&str]) -> Result<Self, StartupError> {
        self.templates = Some(Templates::load(dir.into(), globs)?);
        Ok(self)
    }

    pub fn with_templates(mut self, templates: Templates) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Enables `/auth/login`, `/auth/logout`, `/auth/refresh` and token
    /// extraction on every route. `verify` checks credentials at login.
    pub fn auto_auth<F>(mut self, verify: F) -> Self
    where
        F: Fn(&str, &str) -> Result<Claims, Error> + Send + Sync + 'static,
    {
        self.auto_auth = Some(Arc::new(verify));
        self
    }

    /// Signing secret for tokens; a random per-process secret is used otherwise.
    pub fn jwt_secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        self.jwt_secret = Some(secret.as_ref().to_vec());
        self
    }

    /// Installs `dispatch` as the global tracing subscriber instead of the default one.
    pub fn log_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.log = LogSetup::Custom(dispatch);
        self
    }

    pub fn without_logger(mut self) -> Self {
        self.log = LogSetup::Disabled;
        self
    }

    pub fn openapi_config(mut self, config: OpenApiConfig) -> Self {
        self.openapi = config;
        self
    }

    pub fn info(mut self, title: impl Into<String>, version: impl Into<String>, description: Option<&str>) -> Self {
        self.title = title.into();
        self.version = version.into();
        self.description = description.map(str::to_string);
        self
    }

    pub fn build(self) -> Server {
        bootstrap::init_logging(self.log);

        let openapi = openapi::OpenApiBuilder::new()
            .info(
                openapi::InfoBuilder::new()
                    .title(self.title)
                    .version(self.version)
                    .description(self.description)
                    .build(),
            )
            .paths(openapi::Paths::new())
            .build();

        let mut registry = SchemaRegistry::new();
        if let Err(err) = registry.register::<HttpError>() {
            tracing::warn!(error = %err, "could not document the error shape");
        }

        let security = self.auto_auth.as_ref().map(|_| {
            let security = match &self.jwt_secret {
                Some(secret) => Security::new(secret),
                None => Security::random(),
            };
            Arc::new(security)
        });

        let mut server = Server {
            router: Router::new(),
            openapi,
            registry,
            pipeline: Arc::new(Pipeline {
                serializer: self.serializer,
                error_serializer: self.error_serializer,
                error_handler: self.error_handler,
                templates: self.templates,
            }),
            settings: Settings {
                addr: self.addr,
                base_path: self.base_path,
                max_body_size: self.max_body_size,
                disallow_unknown_fields: self.disallow_unknown_fields,
                timeout: self.timeout,
                openapi: self.openapi.normalized(),
            },
            security: security.clone(),
        };

        if let (Some(security), Some(verify)) = (security, self.auto_auth) {
            server.register_auth_routes(security, verify);
        }

        server
    }
}

/// A configured server: router, live OpenAPI document and shared pipeline.
pub struct Server {
    pub(crate) router: Router,
    pub(crate) openapi: OpenApi,
    pub(crate) registry: SchemaRegistry,
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) settings: Settings,
    security: Option<Arc<Security>>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn full_path(&self, path: &str) -> String {
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };
        format!("{}{}", self.settings.base_path, path)
    }

    pub(crate) fn route<H, M>(&mut self, method: &Method, path: &str, handler: H)
    where
        H: Handler<M, ()>,
        M: 'static,
    {
        let Ok(filter) = MethodFilter::try_from(method.clone()) else {
            tracing::error!(%method, path, "unsupported method, route not attached");
            return;
        };
        self.router = std::mem::take(&mut self.router).route(path, on(filter, handler));
    }

    fn register_auth_routes(&mut self, security: Arc<Security>, verify: VerifyUser) {
        let login_security = security.clone();
        route::post(
            self,
            "/auth/login",
            move |ctx| security::login(login_security.clone(), verify.clone(), ctx),
            RouteOptions::new().tag("Auth").summary("Login"),
        );
        route::post_std(
            self,
            "/auth/logout",
            security::logout,
            RouteOptions::new().tag("Auth").summary("Logout"),
        );
        route::post(
            self,
            "/auth/refresh",
            move |ctx| security::refresh(security.clone(), ctx),
            RouteOptions::new().tag("Auth").summary("Refresh token"),
        );
    }

    /// The document as built so far, components included.
    pub fn openapi(&self) -> OpenApi {
        let mut doc = self.openapi.clone();
        doc.components = Some(
            openapi::ComponentsBuilder::new()
                .schemas_from_iter(self.registry.components().clone())
                .build(),
        );
        doc
    }

    pub fn openapi_json(&self) -> Result<String, StartupError> {
        Ok(self.openapi().to_pretty_json()?)
    }

    pub fn addr(&self) -> &str {
        &self.settings.addr
    }

    pub fn openapi_config(&self) -> &OpenApiConfig {
        &self.settings.openapi
    }

    /// Finalizes the router: documentation routes, token extraction and the
    /// request timeout.
    ///
    /// The OpenAPI JSON is encoded once here, so every fetch returns the same bytes.
    pub fn into_router(self) -> Result<Router, StartupError> {
        let config = self.settings.openapi.clone();
        let spec = self.openapi_json()?;
        let mut router = self.router;

        if !config.disable_spec_route {
            router = router.merge(docs::spec_router(&config.json_spec_url, spec));
        }
        if !config.disable_swagger {
            router = router.merge(docs::swagger_router(&config.swagger_url, &config.json_spec_url));
        }
        if let Some(security) = self.security {
            router = router.layer(middleware::from_fn_with_state(security, security::attach_claims));
        }
        if let Some(timeout) = self.settings.timeout {
            router = router.layer(TimeoutLayer::new(timeout));
        }
        Ok(router)
    }

    /// Saves the document locally (unless disabled), binds and serves.
    pub async fn run(self) -> Result<(), StartupError> {
        let config = self.settings.openapi.clone();
        if !config.disable_local_save {
            match self.openapi_json() {
                Ok(spec) => {
                    if let Err(err) = bootstrap::save_openapi(&config.json_spec_local_path, &spec) {
                        tracing::error!(file = %config.json_spec_local_path, error = %err, "could not save OpenAPI document");
                    }
                }
                Err(err) => tracing::error!(error = %err, "could not encode OpenAPI document"),
            }
        }

        let addr = bootstrap::socket_addr(&self.settings.addr)?;
        let router = self.into_router()?;
        let listener = TcpListener::bind(addr.as_str()).await?;
        tracing::info!(addr = %listener.local_addr()?, "server listening");
        if !config.disable_swagger {
            tracing::info!(url = %format!("http://{addr}{}", config.swagger_url), "swagger UI available");
        }
        axum::serve(listener, router).await?;
        Ok(())
    }
}
