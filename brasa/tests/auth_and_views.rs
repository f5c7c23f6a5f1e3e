use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use brasa::{Claims, Context, Error, RouteOptions, Security, Server, Template};
use serde::Serialize;
use serde_json::Value;
use tower::ServiceExt;

const SECRET: &str = "kitchen-secret";

fn verify(user: &str, password: &str) -> Result<Claims, Error> {
    if user == "chef" && password == "mise-en-place" {
        Ok(Claims::new().with("sub", user).with("role", "admin"))
    } else {
        Err(Error::unauthorized("invalid credentials"))
    }
}

async fn whoami(ctx: Context) -> Result<String, Error> {
    let claims = ctx.claims().ok_or_else(|| Error::unauthorized("login first"))?;
    Ok(claims.subject().unwrap_or_default().to_string())
}

fn auth_server() -> Router {
    let mut server = Server::builder().without_logger().auto_auth(verify).jwt_secret(SECRET).build();
    brasa::get(&mut server, "/me", whoami, RouteOptions::new());
    server.into_router().unwrap()
}

async fn send(router: Router, req: Request<Body>) -> (StatusCode, HeaderMap, String) {
    let response = router.oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

fn login(user: &str, password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(format!(r#"{{"user":"{user}","password":"{password}"}}"#)))
        .unwrap()
}

#[tokio::test]
async fn login_issues_a_token_and_cookie() {
    let router = auth_server();
    let (status, headers, body) = send(router.clone(), login("chef", "mise-en-place")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::SET_COOKIE].to_str().unwrap().starts_with("jwt_token="));

    let token = serde_json::from_str::<Value>(&body).unwrap()["token"].as_str().unwrap().to_string();
    let claims = Security::new(SECRET.as_bytes()).verify(&token).unwrap();
    assert_eq!(claims.get_str("role"), Some("admin"));

    let request = Request::builder()
        .uri("/me")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(router.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "chef");

    let request = Request::builder()
        .uri("/me")
        .header(header::COOKIE, format!("jwt_token={token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "chef");
}

#[tokio::test]
async fn wrong_credentials_are_401() {
    let (status, headers, body) = send(auth_server(), login("chef", "microwave")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(headers.get(header::SET_COOKIE).is_none());
    assert_eq!(body, r#"{"error":"invalid credentials"}"#);
}

#[tokio::test]
async fn refresh_needs_a_valid_token() {
    let router = auth_server();
    let refresh = |token: Option<&str>| {
        let mut builder = Request::builder().method("POST").uri("/auth/refresh");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    };

    let (status, _, _) = send(router.clone(), refresh(None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(router.clone(), refresh(Some("not-a-token"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = Security::new(SECRET.as_bytes())
        .issue(&Claims::new().with("sub", "chef"))
        .unwrap();
    let (status, headers, body) = send(router, refresh(Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.contains_key(header::SET_COOKIE));
    assert!(body.contains("\"token\""));
}

#[tokio::test]
async fn logout_clears_the_cookie() {
    let request = Request::builder().method("POST").uri("/auth/logout").body(Body::empty()).unwrap();
    let (status, headers, _) = send(auth_server(), request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(headers[header::SET_COOKIE].to_str().unwrap().contains("Max-Age=0"));
}

#[test]
fn auth_routes_are_documented() {
    let server = Server::builder().without_logger().auto_auth(verify).build();
    let doc = serde_json::to_value(server.openapi()).unwrap();
    assert_eq!(doc["paths"]["/auth/login"]["post"]["summary"], "Login");
    assert_eq!(doc["paths"]["/auth/logout"]["post"]["tags"][0], "Auth");
    assert!(doc["components"]["schemas"]["LoginPayload"].is_object());
}

#[derive(Serialize)]
struct Menu {
    title: String,
    dishes: Vec<&'static str>,
}

#[tokio::test]
async fn templates_render_as_html() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("views")).unwrap();
    std::fs::write(
        dir.path().join("views/menu.html"),
        "<h1>{{ title }}</h1>{% for d in dishes %}<li>{{ d }}</li>{% endfor %}",
    )
    .unwrap();
    std::fs::write(dir.path().join("views/notes.txt"), "ignored").unwrap();

    let mut server = Server::builder()
        .without_logger()
        .templates(dir.path(), &["views/*.html"])
        .unwrap()
        .build();
    brasa::get(
        &mut server,
        "/menu",
        |_ctx: Context| async {
            Ok(Template::new(
                "views/menu.html",
                &Menu {
                    title: "Tonight".into(),
                    dishes: vec!["moqueca", "farofa"],
                },
            ))
        },
        RouteOptions::new(),
    );
    brasa::get(
        &mut server,
        "/notes",
        |_ctx: Context| async { Ok(Template::new("views/notes.txt", &())) },
        RouteOptions::new(),
    );
    let router = server.into_router().unwrap();

    let request = Request::builder().uri("/menu").body(Body::empty()).unwrap();
    let (status, headers, body) = send(router.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(body, "<h1>Tonight</h1><li>moqueca</li><li>farofa</li>");

    let request = Request::builder().uri("/notes").body(Body::empty()).unwrap();
    let (status, _, _) = send(router, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
