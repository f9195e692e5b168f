//! `GET /health` reports live store connectivity.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::connections::StoreHandle;

/// Router exposing `GET /health` over `store`.
pub fn health_router(store: Arc<dyn StoreHandle>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(store)
}

/// # Health Check Endpoint
///
/// Runs the store's `SELECT 1` check: `200 OK` when it round-trips,
/// `500 Database connection failed` otherwise.
async fn health_handler(State(store): State<Arc<dyn StoreHandle>>) -> impl IntoResponse {
    if store.test_connection().await {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Database connection failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::DbError;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    struct SwitchableStore(AtomicBool);

    #[async_trait]
    impl StoreHandle for SwitchableStore {
        async fn open(&self) -> Result<(), DbError> {
            Ok(())
        }

        async fn close(&self) {}

        async fn test_connection(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    async fn call(router: Router) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn reports_store_connectivity() {
        let store = Arc::new(SwitchableStore(AtomicBool::new(true)));
        let router = health_router(store.clone());

        assert_eq!(call(router.clone()).await, (StatusCode::OK, "OK".to_string()));

        store.0.store(false, Ordering::SeqCst);
        assert_eq!(
            call(router).await,
            (StatusCode::INTERNAL_SERVER_ERROR, "Database connection failed".to_string())
        );
    }
}
