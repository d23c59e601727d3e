//! In-process mock of the Cherry API for unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use serde_json::Value;
use tokio::net::TcpListener;

/// One request seen by the mock.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

/// Canned response for a path.
#[derive(Debug, Clone)]
pub(crate) struct MockRoute {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl MockRoute {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.to_string(),
        }
    }
}

pub(crate) struct MockApi {
    pub base: String,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockApi {
    /// Serve `routes` (keyed by path, any method); unknown paths answer 404.
    pub async fn start(routes: Vec<(&str, MockRoute)>) -> Self {
        let routes: Arc<HashMap<String, MockRoute>> = Arc::new(
            routes
                .into_iter()
                .map(|(path, route)| (path.to_string(), route))
                .collect(),
        );
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = Router::new().fallback(move |request: Request<Body>| {
                let routes = routes.clone();
                let recorded = recorded.clone();
                async move {
                    let method = request.method().to_string();
                    let path = request.uri().path().to_string();
                    let authorization = request
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let bytes = axum::body::to_bytes(request.into_body(), 1024 * 1024)
                        .await
                        .unwrap();
                    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                    recorded.lock().unwrap().push(RecordedCall {
                        method,
                        path: path.clone(),
                        authorization,
                        body,
                    });

                    match routes.get(&path) {
                        Some(route) => Response::builder()
                            .status(route.status)
                            .header("content-type", route.content_type)
                            .body(Body::from(route.body.clone()))
                            .unwrap(),
                        None => Response::builder()
                            .status(StatusCode::NOT_FOUND)
                            .body(Body::from("no route"))
                            .unwrap(),
                    }
                }
            });
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            calls,
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.path == path)
            .collect()
    }
}
