//! Workspace aggregate store.
//!
//! A tenant [`Workspace`](models::Workspace) and its eight child collections,
//! with typed CRUD, aggregate and group-by operations over two backends: the
//! in-process [`store::WorkspaceStore`] and the D1-backed [`d1::D1Store`].
//! The Worker entry point below is a thin read-only inspection surface.

use serde::Serialize;
use worker::*;

pub mod config;
pub mod d1;
pub mod error;
pub mod logging;
pub mod models;
pub mod query;
pub mod store;
pub mod tenant;

use d1::D1Store;
use error::StoreError;
use models::{Workspace, WorkspaceCounts};

#[derive(Serialize)]
struct HealthResponse<'a> {
    service: &'a str,
    status: &'a str,
}

#[derive(Serialize)]
struct WorkspaceView {
    #[serde(flatten)]
    workspace: Workspace,
    #[serde(rename = "_count")]
    count: WorkspaceCounts,
}

fn store_error(err: StoreError) -> Result<Response> {
    Response::error(err.to_string(), err.http_status())
}

#[event(fetch)]
pub async fn fetch(req: Request, env: Env, _ctx: Context) -> Result<Response> {
    console_error_panic_hook::set_once();
    let level = crate::config::StoreConfig::from_env(&env)
        .map(|config| config.log_level)
        .unwrap_or(logging::DEFAULT_LEVEL);
    logging::init(level);

    let router = Router::new();

    router
        .get("/health", |_, _| {
            Response::from_json(&HealthResponse {
                service: "workspace-store",
                status: "ok",
            })
        })
        .get_async("/v1/workspaces/:id", |req, ctx| async move {
            let Some(id) = ctx.param("id").map(ToString::to_string) else {
                return Response::error("missing workspace id", 400);
            };
            let tenant = tenant::tenant_from_request(&req)?;
            let store = match D1Store::from_env(&ctx.env) {
                Ok(store) => store,
                Err(err) => return store_error(err),
            };

            let found = match store.workspace().find_unique(id.as_str()).await {
                Ok(found) => found,
                Err(err) => return store_error(err),
            };
            let Some(workspace) = tenant::visible_to(tenant.as_ref(), found) else {
                return Response::error("workspace not found", 404);
            };
            match store.workspace_counts(&id).await {
                Ok(count) => Response::from_json(&WorkspaceView { workspace, count }),
                Err(err) => store_error(err),
            }
        })
        .run(req, env)
        .await
}
