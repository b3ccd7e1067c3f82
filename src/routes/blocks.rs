use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::list_all_rows,
    roles::{assert_role, MEMBER_ROLES},
    schemas::{parse_rows, BlockIdPath, BlockRecord, BlockView},
    services::block_paths::{block_path_labels, resolve_block_path, BlockPath},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/blocks", axum::routing::get(list_blocks))
        .route("/blocks/{block_id}/path", axum::routing::get(get_block_path))
}

async fn list_blocks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, MEMBER_ROLES).await?;

    let blocks = load_blocks(&state).await?;
    Ok(Json(json!({ "data": block_views(blocks) })))
}

async fn get_block_path(
    State(state): State<AppState>,
    Path(path): Path<BlockIdPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, MEMBER_ROLES).await?;

    let blocks = load_blocks(&state).await?;
    let resolved = resolve_block_path(&blocks, &path.block_id);
    Ok(Json(json!({
        "block_id": path.block_id,
        "full_path": resolved.label,
        "path_truncated": resolved.truncated,
    })))
}

async fn load_blocks(state: &AppState) -> AppResult<Vec<BlockRecord>> {
    let pool = state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency(
            "Supabase database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
        )
    })?;
    let rows = list_all_rows(pool, "blocks", None, "name").await?;
    let (blocks, _) = parse_rows::<BlockRecord>(rows);
    Ok(blocks)
}

/// Attach full paths and sort so siblings sit under their parents.
fn block_views(blocks: Vec<BlockRecord>) -> Vec<BlockView> {
    let mut labels = block_path_labels(&blocks);
    let mut views = blocks
        .into_iter()
        .map(|block| {
            let resolved = labels
                .remove(&block.id)
                .unwrap_or_else(BlockPath::unknown);
            BlockView {
                block,
                full_path: resolved.label,
                path_truncated: resolved.truncated,
            }
        })
        .collect::<Vec<_>>();
    views.sort_by(|left, right| left.full_path.cmp(&right.full_path));
    views
}

#[cfg(test)]
mod tests {
    use super::block_views;
    use crate::schemas::BlockRecord;

    fn block(id: &str, name: &str, parent_id: Option<&str>) -> BlockRecord {
        BlockRecord {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: parent_id.map(ToOwned::to_owned),
        }
    }

    #[test]
    fn views_are_sorted_by_full_path() {
        let views = block_views(vec![
            block("3", "Floor 1", Some("2")),
            block("2", "Tower B", None),
            block("1", "Tower A", None),
            block("4", "Floor 1", Some("1")),
        ]);
        let paths = views
            .iter()
            .map(|view| view.full_path.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec!["Tower A", "Tower A > Floor 1", "Tower B", "Tower B > Floor 1"]
        );
    }

    #[test]
    fn cyclic_blocks_are_flagged() {
        let views = block_views(vec![block("9", "Loop", Some("9"))]);
        assert!(views[0].path_truncated);
    }
}
