//! Wires a [`zerver_core::Runtime`] and a route table into a listening
//! `axum` service, wrapped in the same `tower-http` middleware stack the
//! teacher gateway ships (`trace, compression-gzip, cors, timeout, limit,
//! request-id, util`) and served through `axum-server` rather than bare
//! `axum::serve`, matching the teacher's `axum-server` dependency.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Path, Query, Request};
use axum::http::Method;
use axum::response::Response as AxumResponse;
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use zerver_core::{Priority, Runtime};

use crate::config::ZerverHttpConfig;
use crate::convert::{to_axum_response, to_parsed_request};
use crate::route::Route;

/// A configured-but-not-yet-listening `zerver` HTTP server. Build one with
/// [`ZerverServer::new`], add routes with [`ZerverServer::route`], then
/// consume it with [`ZerverServer::serve`].
pub struct ZerverServer {
    runtime: Arc<Runtime>,
    routes: Vec<Route>,
    config: ZerverHttpConfig,
}

impl ZerverServer {
    pub fn new(runtime: Arc<Runtime>, config: ZerverHttpConfig) -> Self {
        Self {
            runtime,
            routes: Vec::new(),
            config,
        }
    }

    /// Registers a route, consuming and returning `self` for chaining.
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Consumes the registered routes into an `axum::Router`, grouping
    /// routes that share a path pattern into one `MethodRouter` the way
    /// `axum::Router::route` requires (one router per path, many methods).
    fn build_router(self) -> Router {
        let mut by_path: Vec<(String, MethodRouter)> = Vec::new();
        let max_body_bytes = self.config.max_body_bytes;

        for route in self.routes {
            let handler = make_handler(
                self.runtime.clone(),
                route.pipeline.clone(),
                route.priority,
                max_body_bytes,
            );
            let filter = method_filter(&route.method);
            let entry = by_path.iter_mut().find(|(path, _)| *path == route.path);
            match entry {
                Some((_, existing)) => {
                    *existing = std::mem::replace(existing, MethodRouter::new())
                        .on(filter, handler);
                }
                None => {
                    by_path.push((route.path.clone(), MethodRouter::new().on(filter, handler)));
                }
            }
        }

        let mut router = Router::new();
        for (path, method_router) in by_path {
            router = router.route(&path, method_router);
        }

        router
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(self.config.request_timeout))
                    .layer(CompressionLayer::new())
                    .layer(CorsLayer::permissive())
                    .layer(RequestBodyLimitLayer::new(max_body_bytes))
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Binds `config.bind_addr` and serves the registered routes until a
    /// `ctrl_c`/SIGTERM signal requests graceful shutdown, draining
    /// in-flight requests before returning.
    pub async fn serve(self) -> std::io::Result<()> {
        let addr = self.config.bind_addr;
        let router = self.build_router();
        let make_service = router.into_make_service_with_connect_info::<SocketAddr>();

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            graceful_shutdown_signal().await;
            shutdown_handle.graceful_shutdown(Some(default_idle_timeout()));
        });

        tracing::info!(%addr, "zerver-http listening");
        axum_server::bind(addr)
            .handle(handle)
            .serve(make_service)
            .await
    }
}

fn method_filter(method: &Method) -> MethodFilter {
    MethodFilter::try_from(method.clone()).unwrap_or(MethodFilter::GET)
}

/// Builds the handler closure axum routes a given (path, method) pair to:
/// converts the inbound request, submits it through `runtime` under
/// `priority`, and converts the outcome's response back.
fn make_handler(
    runtime: Arc<Runtime>,
    pipeline: Arc<zerver_core::Pipeline>,
    priority: Priority,
    max_body_bytes: usize,
) -> impl Fn(
    Path<HashMap<String, String>>,
    Query<HashMap<String, String>>,
    ConnectInfo<SocketAddr>,
    Request,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = AxumResponse> + Send>>
       + Clone
       + Send
       + 'static {
    move |path, query, connect_info, req| {
        let runtime = runtime.clone();
        let pipeline = pipeline.clone();
        Box::pin(async move {
            let parsed = match to_parsed_request(path, query, connect_info, req, max_body_bytes)
                .await
            {
                Ok(parsed) => parsed,
                Err(early_response) => return early_response,
            };

            let outcome = runtime.handle_request(parsed, pipeline, priority).await;
            to_axum_response(outcome.response)
        })
    }
}

fn graceful_shutdown_signal() -> impl std::future::Future<Output = ()> {
    async {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminate = async {
            let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            else {
                return;
            };
            signal.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        tracing::info!("shutdown signal received, draining in-flight requests");
    }
}

#[allow(dead_code)]
fn default_idle_timeout() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body as AxumBody;
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;

    use zerver_core::{
        slot, slot_set, Decision, Effect, EffectKind, Join, NoSlots, Pipeline, Priority, Response,
        RetryPolicy, Runtime, Step, ZerverConfig,
    };
    use zerver_effects::MemoryKvEffector;

    use super::*;

    slot!(ItemId: String, Record: serde_json::Value);
    slot_set!(WritesItemId = [ItemId]);
    slot_set!(ReadsItemId = [ItemId]);
    slot_set!(WritesRecord = [Record]);
    slot_set!(ReadsRecord = [Record]);

    fn extract_id_step() -> Box<dyn zerver_core::step::DynStep> {
        Step::<NoSlots, WritesItemId>::new("extract_id", |view| {
            let Some(id) = view.base().param("id").filter(|id| !id.is_empty()) else {
                return Decision::Fail(zerver_core::Error::new(
                    zerver_core::Kind::InvalidInput,
                    "param",
                    "id",
                ));
            };
            view.put::<ItemId>(id.to_string()).unwrap();
            Decision::Continue
        })
        .erase()
    }

    fn db_load_step() -> Box<dyn zerver_core::step::DynStep> {
        Step::<ReadsItemId, WritesRecord>::new("db_load", |view| {
            let id = view.require::<ItemId>().unwrap().clone();
            Decision::need(
                vec![Effect::new("load", EffectKind::Io, format!("get:item:{id}"))
                    .read()
                    .with_timeout(std::time::Duration::from_secs(2))
                    .with_retry(RetryPolicy::DEFAULT)],
                Join::All,
                Box::new(move |ctx, outcomes| match &outcomes[0].result {
                    Ok(bytes) => match serde_json::from_slice(bytes) {
                        Ok(value) => {
                            ctx.view::<NoSlots, WritesRecord>()
                                .put::<Record>(value)
                                .unwrap();
                            Decision::Continue
                        }
                        Err(_) => Decision::Fail(zerver_core::Error::internal("record", "decode")),
                    },
                    Err(err) => Decision::Fail(err.clone()),
                }),
            )
        })
        .erase()
    }

    fn render_step() -> Box<dyn zerver_core::step::DynStep> {
        Step::<ReadsRecord, NoSlots>::new("render", |view| {
            let record = view.require::<Record>().unwrap();
            match Response::json(200, record) {
                Ok(response) => Decision::Done(response),
                Err(err) => Decision::Fail(err),
            }
        })
        .erase()
    }

    fn item_lookup_pipeline() -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            "item_lookup",
            vec![extract_id_step(), db_load_step(), render_step()],
        ))
    }

    async fn seeded_server() -> Router {
        use zerver_core::Effector;

        let store = Arc::new(MemoryKvEffector::new());
        let put = Effect::new("seed", EffectKind::Io, "put:item:42").with_payload(
            bytes::Bytes::from(serde_json::json!({"id": "42", "name": "gadget"}).to_string()),
        );
        let _ = store.execute(&put).await;

        let runtime = Arc::new(Runtime::builder(ZerverConfig::default()).register_effector(store).build());
        let server = ZerverServer::new(runtime, ZerverHttpConfig::default()).route(Route::new(
            Method::GET,
            "/items/{id}",
            item_lookup_pipeline(),
            Priority::Interactive,
        ));
        server.build_router()
    }

    #[tokio::test]
    async fn a_known_item_round_trips_through_the_router_as_json() {
        let router = seeded_server().await;
        let request = Request::builder()
            .method(Method::GET)
            .uri("/items/42")
            .body(AxumBody::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["name"], "gadget");
    }

    #[tokio::test]
    async fn an_unknown_item_renders_a_not_found_error_response() {
        let router = seeded_server().await;
        let request = Request::builder()
            .method(Method::GET)
            .uri("/items/missing")
            .body(AxumBody::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn an_unregistered_path_falls_through_to_axums_default_404() {
        let router = seeded_server().await;
        let request = Request::builder()
            .method(Method::GET)
            .uri("/no/such/route")
            .body(AxumBody::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
