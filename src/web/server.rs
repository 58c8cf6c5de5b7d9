use super::api::{cached, custom, cypher, dbmeta, explorer, keyvalue, roimeshes, session, skeletons};
use super::middleware::{authenticate, log_requests, rewrite_version, API_VERSION};
use crate::cache::{AggregateCache, DatasetCatalog};
use crate::config::ServiceConfig;
use crate::secure::{
    AuthorizationGate, Authorizer, FileAuthorizer, IdentityResolver, PermissionAuthorizer,
    TokenBlocklist,
};
use crate::storage::{EngineRegistry, StoreRegistry};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    middleware,
    response::{Html, Json},
    routing::{get, post, MethodRouter},
    Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tower::Layer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Everything handlers share; read-only after startup apart from the
/// caches and the transaction table
pub struct ServiceState {
    pub stores: Arc<StoreRegistry>,
    pub catalog: DatasetCatalog,
    pub aggregates: Arc<AggregateCache>,
    pub gate: AuthorizationGate,
    pub transactions: Arc<cypher::TransactionTable>,
    routes: OnceLock<Vec<RouteInfo>>,
}

/// Shared application state
pub type AppState = Arc<ServiceState>;

impl ServiceState {
    pub fn new(stores: Arc<StoreRegistry>, gate: AuthorizationGate) -> Self {
        Self {
            catalog: DatasetCatalog::new(stores.clone()),
            aggregates: Arc::new(AggregateCache::new(stores.clone())),
            stores,
            gate,
            transactions: Arc::new(cypher::TransactionTable::new()),
            routes: OnceLock::new(),
        }
    }

    /// Builds the stores and the authorization gate described by `config`
    pub async fn from_config(config: &ServiceConfig, engines: &EngineRegistry) -> Result<Self> {
        let stores = StoreRegistry::from_config(engines, config)
            .await
            .context("failed to initialize stores")?;
        let gate = gate_from_config(config)?;
        Ok(Self::new(Arc::new(stores), gate))
    }

    pub fn routes(&self) -> &[RouteInfo] {
        self.routes.get().map(Vec::as_slice).unwrap_or(&[])
    }
}

fn gate_from_config(config: &ServiceConfig) -> Result<AuthorizationGate> {
    if config.disable_auth {
        info!("authentication disabled");
        return Ok(AuthorizationGate::disabled());
    }

    let base = config
        .identity_service
        .as_deref()
        .context("identity-service is required unless disable-auth is set")?;
    let resolver = IdentityResolver::new(base, config.identity_ttl())?;

    let authorizer: Arc<dyn Authorizer> = match &config.auth_file {
        Some(path) => Arc::new(FileAuthorizer::open(path)?),
        None => Arc::new(PermissionAuthorizer::new(config.dataset_map.clone())),
    };

    let blocklist = TokenBlocklist::new();
    if let Some(path) = &config.token_blocklist {
        let count = blocklist.load_file(path)?;
        info!(path = %path.display(), count, "loaded token blocklist");
    }

    Ok(AuthorizationGate::new(
        Arc::new(resolver),
        authorizer,
        Arc::new(blocklist),
    ))
}

/// One registered route, as listed by `/api/available`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteInfo {
    pub method: String,
    pub path: String,
}

/// Collects routes together with their listing entries
struct Routes {
    router: Router<AppState>,
    table: Vec<RouteInfo>,
}

impl Routes {
    fn new() -> Self {
        Self {
            router: Router::new(),
            table: Vec::new(),
        }
    }

    /// Registers `path` under `/api` and records it with its versioned alias
    fn add(mut self, path: &str, methods: &[&str], handler: MethodRouter<AppState>) -> Self {
        for method in methods {
            for listed in [format!("/api{}", path), format!("/api/v:ver{}", path)] {
                self.table.push(RouteInfo {
                    method: method.to_string(),
                    path: listed,
                });
            }
        }
        self.router = self.router.route(path, handler);
        self
    }
}

fn api_routes() -> Routes {
    let get_post = &["GET", "POST"];
    Routes::new()
        .add("/version", &["GET"], get(api_version))
        .add("/available", &["GET"], get(available))
        // session
        .add("/login", &["GET"], get(session::login))
        .add("/profile", &["GET"], get(session::profile))
        .add("/token", &["POST"], post(session::token))
        .add("/logout", &["POST"], post(session::logout))
        // metadata
        .add("/dbmeta/version", &["GET"], get(dbmeta::version))
        .add("/dbmeta/database", &["GET"], get(dbmeta::database))
        .add("/dbmeta/datasets", &["GET"], get(dbmeta::datasets))
        // custom statements
        .add("/custom/custom", get_post, get(custom::custom).post(custom::custom))
        .add("/custom/arrow", get_post, get(custom::arrow).post(custom::arrow))
        // cached aggregates
        .add("/cached/roiconnectivity", &["GET"], get(cached::roi_connectivity))
        .add("/cached/roicompleteness", &["GET"], get(cached::roi_completeness))
        .add("/cached/dailytype", &["GET"], get(cached::daily_type))
        // blobs
        .add(
            "/skeletons/skeleton/:dataset/:id",
            get_post,
            get(skeletons::get_skeleton).post(skeletons::set_skeleton),
        )
        .add(
            "/roimeshes/mesh/:dataset/:roi",
            get_post,
            get(roimeshes::get_mesh).post(roimeshes::set_mesh),
        )
        .add(
            "/raw/keyvalue/key/:instance/:key",
            get_post,
            get(keyvalue::get_key).post(keyvalue::set_key),
        )
        // raw statements
        .add("/raw/cypher/cypher", &["POST"], post(cypher::exec_cypher))
        .add("/raw/cypher/transaction", &["POST"], post(cypher::start_transaction))
        .add(
            "/raw/cypher/transaction/:id/cypher",
            &["POST"],
            post(cypher::transaction_cypher),
        )
        .add(
            "/raw/cypher/transaction/:id/commit",
            &["POST"],
            post(cypher::commit_transaction),
        )
        .add(
            "/raw/cypher/transaction/:id/kill",
            &["POST"],
            post(cypher::kill_transaction),
        )
        // explorer
        .add("/npexplorer/findneurons", get_post, get(explorer::find_neurons).post(explorer::find_neurons))
        .add("/npexplorer/neuronmeta", get_post, get(explorer::neuron_meta).post(explorer::neuron_meta))
        .add(
            "/npexplorer/neuronmetavals",
            get_post,
            get(explorer::neuron_meta_vals).post(explorer::neuron_meta_vals),
        )
        .add(
            "/npexplorer/roiconnectivity",
            get_post,
            get(explorer::roi_connectivity).post(explorer::roi_connectivity),
        )
        .add("/npexplorer/rankedtable", get_post, get(explorer::ranked_table).post(explorer::ranked_table))
        .add(
            "/npexplorer/simpleconnections",
            get_post,
            get(explorer::simple_connections).post(explorer::simple_connections),
        )
        .add(
            "/npexplorer/roisinneuron",
            get_post,
            get(explorer::rois_in_neuron).post(explorer::rois_in_neuron),
        )
        .add(
            "/npexplorer/commonconnectivity",
            get_post,
            get(explorer::common_connectivity).post(explorer::common_connectivity),
        )
        .add("/npexplorer/autapses", get_post, get(explorer::autapses).post(explorer::autapses))
        .add(
            "/npexplorer/distribution",
            get_post,
            get(explorer::distribution).post(explorer::distribution),
        )
        .add(
            "/npexplorer/completeness",
            get_post,
            get(explorer::completeness).post(explorer::completeness),
        )
}

/// Assembles the full application
///
/// API routes take precedence over static files. Versioned `/api/v{n}`
/// paths are rewritten before routing.
pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let Routes { router: api, table } = api_routes();
    let _ = state.routes.set(table);

    let session_routes = Router::new()
        .route("/login", get(session::login))
        .route("/profile", get(session::profile))
        .route("/token", post(session::token))
        .route("/logout", post(session::logout));

    let app = Router::new().nest("/api", api).merge(session_routes);
    let app = match static_dir.filter(|dir| dir.is_dir()) {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app.route("/", get(index)),
    };

    let app = app
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(middleware::from_fn(log_requests))
        .with_state(state);

    let versioned = middleware::from_fn(rewrite_version).layer(app);

    Router::new()
        .fallback_service(versioned)
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn index() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>connectome-http</title></head>
<body><p>Connectome graph service. See <a href="/api/available">/api/available</a>.</p></body>
</html>"#,
    )
}

#[derive(Serialize)]
struct ApiVersion {
    #[serde(rename = "Version")]
    version: &'static str,
}

async fn api_version() -> Json<ApiVersion> {
    Json(ApiVersion {
        version: API_VERSION,
    })
}

async fn available(State(state): State<AppState>) -> Json<Vec<RouteInfo>> {
    Json(state.routes().to_vec())
}

/// Listening options for `start_server`
#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub tls: Option<(PathBuf, PathBuf)>,
}

/// Serves until interrupted, over TLS when a certificate and key are given
pub async fn start_server(state: AppState, options: ServeOptions) -> Result<()> {
    let app = build_router(state.clone(), options.static_dir.as_deref());
    let addr = SocketAddr::from(([0, 0, 0, 0], options.port));

    match &options.tls {
        Some((cert, key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .with_context(|| format!("cannot load TLS certificate {}", cert.display()))?;
            info!(%addr, "serving over https");
            axum_server::bind_rustls(addr, tls)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("cannot bind {}", addr))?;
            info!(%addr, "serving over http");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    state.stores.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}
