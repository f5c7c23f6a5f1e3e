//! Routes serving the OpenAPI document and the Swagger UI page.

use axum::body::Bytes;
use axum::http::header;
use axum::response::Html;
use axum::routing::get;
use axum::Router;

const SWAGGER_UI_VERSION: &str = "5.18.2";

/// Serves `spec` at `url`. The bytes are fixed when the router is built.
pub(crate) fn spec_router(url: &str, spec: String) -> Router {
    let spec = Bytes::from(spec);
    Router::new().route(
        url,
        get(move || {
            let spec = spec.clone();
            async move { ([(header::CONTENT_TYPE, "application/json")], spec) }
        }),
    )
}

pub(crate) fn swagger_router(url: &str, spec_url: &str) -> Router {
    let page = swagger_html(spec_url);
    Router::new().route(
        url,
        get(move || {
            let page = page.clone();
            async move { Html(page) }
        }),
    )
}

/// A page loading Swagger UI from a CDN and pointing it at `spec_url`.
pub fn swagger_html(spec_url: &str) -> String {
    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Swagger UI</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@{version}/swagger-ui.css" />
    <style>
        body {{
            margin: 0;
            background: #fafafa;
        }}
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@{version}/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {{
            window.ui = SwaggerUIBundle({{
                url: "{spec_url}",
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [SwaggerUIBundle.presets.apis],
            }});
        }};
    </script>
</body>
</html>"##,
        version = SWAGGER_UI_VERSION,
        spec_url = html_escape(spec_url),
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
