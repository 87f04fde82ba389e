use std::net::SocketAddr;
use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use crate::state::AppState;
use crate::{auth, posts};

pub fn build_app(state: AppState) -> Router {
    let upload_max_bytes = state.config.posts.upload_max_bytes;
    Router::new()
        .nest("/api/v1",
              Router::new()
                  .merge(auth::router())
                  .merge(posts::router(upload_max_bytes))
                  .route("/health", get(|| async { "ok" }))
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
        .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const BOUNDARY: &str = "snapfeed-test-boundary";

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn json_req(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    fn empty_req(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        req.body(Body::empty()).unwrap()
    }

    fn upload_req(token: &str, caption: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"caption\"\r\n\r\n\
             {caption}\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"cat.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n\
             not-really-a-jpeg\r\n\
             --{b}--\r\n",
            b = BOUNDARY
        );
        Request::builder()
            .method(Method::POST)
            .uri("/api/v1/upload")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn register_and_login(app: &Router, email: &str, password: &str) -> String {
        let creds = json!({ "email": email, "password": password });
        let (status, _) = call(app, json_req(Method::POST, "/api/v1/auth/register", None, creds.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = call(app, json_req(Method::POST, "/api/v1/auth/login", None, creds)).await;
        assert_eq!(status, StatusCode::OK);
        body["access_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = build_app(AppState::fake());
        let res = app.oneshot(empty_req(Method::GET, "/api/v1/health", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn end_to_end_post_lifecycle() {
        let app = build_app(AppState::fake());
        let token = register_and_login(&app, "a@x.com", "pw123456").await;

        let (status, me) = call(&app, empty_req(Method::GET, "/api/v1/users/me", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "a@x.com");

        let (status, post) = call(&app, upload_req(&token, "hello")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(post["caption"], "hello");
        assert_eq!(post["file_type"], "image");
        let url = post["url"].as_str().unwrap();
        assert!(url.starts_with("https://fake.local/media/"));
        let post_id = post["id"].as_str().unwrap().to_string();

        let (status, feed) = call(&app, empty_req(Method::GET, "/api/v1/feed", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        let posts = feed["posts"].as_array().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["id"], post_id.as_str());
        assert_eq!(posts[0]["is_owner"], true);
        assert_eq!(posts[0]["email"], "a@x.com");

        let (status, body) = call(
            &app,
            empty_req(Method::DELETE, &format!("/api/v1/posts/{post_id}"), Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, feed) = call(&app, empty_req(Method::GET, "/api/v1/feed", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(feed["posts"].as_array().unwrap().is_empty());

        let (status, body) = call(
            &app,
            empty_req(Method::DELETE, &format!("/api/v1/posts/{post_id}"), Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn login_failures_look_identical() {
        let app = build_app(AppState::fake());
        register_and_login(&app, "a@x.com", "pw123456").await;

        let wrong = json!({ "email": "a@x.com", "password": "wrongpw" });
        let unknown = json!({ "email": "nouser@x.com", "password": "anything" });
        let (s1, b1) = call(&app, json_req(Method::POST, "/api/v1/auth/login", None, wrong)).await;
        let (s2, b2) = call(&app, json_req(Method::POST, "/api/v1/auth/login", None, unknown)).await;
        assert_eq!(s1, StatusCode::UNAUTHORIZED);
        assert_eq!(s1, s2);
        assert_eq!(b1, b2);
        assert_eq!(b1["error"]["code"], "invalid_credentials");
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let app = build_app(AppState::fake());
        register_and_login(&app, "a@x.com", "pw123456").await;
        let again = json!({ "email": "A@X.COM", "password": "pw123456" });
        let (status, body) = call(&app, json_req(Method::POST, "/api/v1/auth/register", None, again)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "duplicate_identity");
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let app = build_app(AppState::fake());
        let (status, body) = call(&app, empty_req(Method::GET, "/api/v1/feed", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "token_invalid");
    }

    #[tokio::test]
    async fn malformed_requests_render_as_validation_errors() {
        let app = build_app(AppState::fake());
        let token = register_and_login(&app, "a@x.com", "pw123456").await;

        let (status, body) = call(
            &app,
            empty_req(Method::DELETE, "/api/v1/posts/not-a-uuid", Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");

        let (status, body) = call(
            &app,
            json_req(Method::POST, "/api/v1/auth/register", None, json!({ "email": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");

        let raw = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = call(&app, raw).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");

        let (status, body) = call(
            &app,
            json_req(Method::POST, "/api/v1/upload", Some(&token), json!({ "caption": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");
    }

    #[tokio::test]
    async fn foreign_delete_is_forbidden() {
        let app = build_app(AppState::fake());
        let alice = register_and_login(&app, "alice@x.com", "pw123456").await;
        let bob = register_and_login(&app, "bob@x.com", "pw123456").await;

        let (_, post) = call(&app, upload_req(&bob, "bob's")).await;
        let post_id = post["id"].as_str().unwrap();

        let (status, body) = call(
            &app,
            empty_req(Method::DELETE, &format!("/api/v1/posts/{post_id}"), Some(&alice)),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "forbidden");
    }

    #[tokio::test]
    async fn feed_rejects_unknown_transforms() {
        let app = build_app(AppState::fake());
        let token = register_and_login(&app, "a@x.com", "pw123456").await;
        let (status, body) = call(
            &app,
            empty_req(Method::GET, "/api/v1/feed?width=100&rotate=90", Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "unsupported_transform");
    }

    #[tokio::test]
    async fn feed_applies_transforms_in_order() {
        let app = build_app(AppState::fake());
        let token = register_and_login(&app, "a@x.com", "pw123456").await;
        call(&app, upload_req(&token, "hello")).await;

        let (status, feed) = call(
            &app,
            empty_req(
                Method::GET,
                "/api/v1/feed?filter=grayscale&width=300&overlay=Hi%20there",
                Some(&token),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let url = feed["posts"][0]["url"].as_str().unwrap();
        assert!(url.starts_with(
            "https://fake.local/media/tr:e-grayscale:w-300:l-text,i-Hi%20there,l-end/images/"
        ));
    }

    #[tokio::test]
    async fn deactivated_account_token_is_rejected() {
        let app = build_app(AppState::fake());
        let token = register_and_login(&app, "a@x.com", "pw123456").await;

        let (status, _) = call(&app, empty_req(Method::DELETE, "/api/v1/users/me", Some(&token))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&app, empty_req(Method::GET, "/api/v1/feed", Some(&token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "user_deactivated");
    }

    #[tokio::test]
    async fn password_reset_via_mailed_token() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        register_and_login(&app, "a@x.com", "pw123456").await;

        let (status, _) = call(
            &app,
            json_req(Method::POST, "/api/v1/auth/forgot-password", None, json!({ "email": "nobody@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        // The token normally travels by mail; fetch it from the flow directly.
        let token = state.accounts.forgot_password("a@x.com").await.unwrap().unwrap();
        let (status, _) = call(
            &app,
            json_req(
                Method::POST,
                "/api/v1/auth/reset-password",
                None,
                json!({ "token": token, "password": "fresh-password" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let creds = json!({ "email": "a@x.com", "password": "fresh-password" });
        let (status, _) = call(&app, json_req(Method::POST, "/api/v1/auth/login", None, creds)).await;
        assert_eq!(status, StatusCode::OK);
    }
}
