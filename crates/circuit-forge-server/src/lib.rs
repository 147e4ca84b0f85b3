//! Publication endpoint for generated input scripts.
//!
//! `GET /api/script/{id}/circuit_input` resolves `id` through a
//! [`CircuitStore`] and streams the circuit's bundled input-generation worker
//! back as JavaScript. The server only reads the output tree; building is the
//! pipeline's job.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use thiserror::Error;

use circuit_forge_core::artifacts::ArtifactLayout;
use circuit_forge_core::store::CircuitStore;
use circuit_forge_core::{ForgeConfig, ForgeError};

pub const JAVASCRIPT: &str = "application/javascript";

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn CircuitStore>,
    config: Arc<ForgeConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn CircuitStore>, config: ForgeConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Entry not found")]
    EntryNotFound(String),
    #[error("Script not found")]
    ScriptNotFound(PathBuf),
    #[error("lookup failed")]
    Lookup(#[source] ForgeError),
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PublishError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::EntryNotFound(_) | Self::ScriptNotFound(_) => StatusCode::NOT_FOUND,
            Self::Lookup(_) | Self::Read { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PublishError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::EntryNotFound(id) => tracing::debug!("no entry for id {id}"),
            Self::ScriptNotFound(path) => tracing::warn!("script missing: {}", path.display()),
            Self::Lookup(e) => tracing::error!("entry lookup failed: {e}"),
            Self::Read { path, source } => {
                tracing::error!("failed to read {}: {source}", path.display())
            }
        }
        let body = match status {
            StatusCode::NOT_FOUND => self.to_string(),
            _ => "Internal server error".to_string(),
        };
        (status, body).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/script/:id/circuit_input", get(circuit_input))
        .with_state(state)
}

async fn circuit_input(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Response, PublishError> {
    let identity = state
        .store
        .lookup(&id)
        .await
        .map_err(PublishError::Lookup)?
        .ok_or_else(|| PublishError::EntryNotFound(id.clone()))?;

    let path = ArtifactLayout::new(&state.config, &identity).worker_script();
    let content = match tokio::fs::read(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PublishError::ScriptNotFound(path))
        }
        Err(source) => return Err(PublishError::Read { path, source }),
    };

    tracing::debug!("serving {} ({} bytes) for {id}", path.display(), content.len());
    Ok((
        [
            (header::CONTENT_TYPE, JAVASCRIPT.to_string()),
            (header::CONTENT_LENGTH, content.len().to_string()),
        ],
        content,
    )
        .into_response())
}

/// Serve the router on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), axum::Error> {
    tracing::info!("publishing artifacts on http://{addr}");
    axum::Server::bind(&addr)
        .serve(router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(axum::Error::new)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use circuit_forge_core::store::MemoryStore;
    use circuit_forge_core::CircuitIdentity;
    use tower::ServiceExt;

    struct FailingStore;

    #[async_trait]
    impl CircuitStore for FailingStore {
        async fn lookup(&self, _id: &str) -> circuit_forge_core::Result<Option<CircuitIdentity>> {
            Err(ForgeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "database offline",
            )))
        }
    }

    struct CountingStore {
        inner: MemoryStore,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl CircuitStore for CountingStore {
        async fn lookup(&self, id: &str) -> circuit_forge_core::Result<Option<CircuitIdentity>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.lookup(id).await
        }
    }

    fn setup(root: &std::path::Path) -> (Arc<CountingStore>, ForgeConfig) {
        let mut inner = MemoryStore::new();
        inner.insert("42", CircuitIdentity::new("adder", "Adder").unwrap());
        let store = Arc::new(CountingStore {
            inner,
            lookups: AtomicUsize::new(0),
        });
        (store, ForgeConfig::default().with_output_dir(root))
    }

    async fn send_get(app: Router, uri: &str) -> Response {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_serves_worker_script() {
        let dir = tempfile::tempdir().unwrap();
        let (store, config) = setup(dir.path());
        let script = dir
            .path()
            .join("code/adder/generate_inputs_worker_bundled.js");
        std::fs::create_dir_all(script.parent().unwrap()).unwrap();
        std::fs::write(&script, b"self.onmessage = () => {};").unwrap();

        let response = send_get(router(AppState::new(store, config)), "/api/script/42/circuit_input").await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], JAVASCRIPT);
        assert_eq!(headers[header::CONTENT_LENGTH], "26");

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"self.onmessage = () => {};");
    }

    #[tokio::test]
    async fn test_unknown_entry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (store, config) = setup(&dir.path().join("never-created"));

        let app = router(AppState::new(store.clone(), config));
        let response = send_get(app, "/api/script/7/circuit_input").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("never-created").exists());

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"Entry not found");
    }

    #[tokio::test]
    async fn test_missing_script_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (store, config) = setup(dir.path());

        let response = send_get(router(AppState::new(store, config)), "/api/script/42/circuit_input").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"Script not found");
    }

    #[tokio::test]
    async fn test_lookup_error_is_internal() {
        let dir = tempfile::tempdir().unwrap();
        let config = ForgeConfig::default().with_output_dir(dir.path());

        let response = send_get(
            router(AppState::new(Arc::new(FailingStore), config)),
            "/api/script/42/circuit_input",
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
