use std::collections::HashMap;

use serde::Serialize;

use crate::schemas::BlockRecord;

pub const BLOCK_PATH_SEPARATOR: &str = " > ";
pub const MAX_BLOCK_DEPTH: usize = 10;
pub const UNKNOWN_BLOCK_LABEL: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockPath {
    pub label: String,
    /// The walk stopped at the depth cap; the parent chain is cyclic or
    /// deeper than any real building.
    pub truncated: bool,
}

impl BlockPath {
    pub fn unknown() -> Self {
        Self {
            label: UNKNOWN_BLOCK_LABEL.to_string(),
            truncated: false,
        }
    }
}

/// Render `"Root > ... > Target"` for a block by walking parent pointers.
pub fn resolve_block_path(blocks: &[BlockRecord], target_id: &str) -> BlockPath {
    let by_id = index_blocks(blocks);
    resolve_with_index(&by_id, target_id)
}

/// Resolve every block in the list, keyed by block id.
pub fn block_path_labels(blocks: &[BlockRecord]) -> HashMap<String, BlockPath> {
    let by_id = index_blocks(blocks);
    blocks
        .iter()
        .map(|block| (block.id.clone(), resolve_with_index(&by_id, &block.id)))
        .collect()
}

fn index_blocks(blocks: &[BlockRecord]) -> HashMap<&str, &BlockRecord> {
    let mut by_id = HashMap::with_capacity(blocks.len());
    for block in blocks {
        // first occurrence wins, like a linear find
        by_id.entry(block.id.as_str()).or_insert(block);
    }
    by_id
}

fn resolve_with_index(by_id: &HashMap<&str, &BlockRecord>, target_id: &str) -> BlockPath {
    let Some(target) = by_id.get(target_id.trim()) else {
        return BlockPath::unknown();
    };

    let mut names = vec![target.name.as_str()];
    let mut current = *target;
    let mut depth = 0;
    let mut truncated = false;

    while let Some(parent_id) = current.parent_ref() {
        if depth >= MAX_BLOCK_DEPTH {
            truncated = true;
            break;
        }
        let Some(parent) = by_id.get(parent_id) else {
            tracing::warn!(
                block_id = %current.id,
                parent_id,
                "Block parent is missing from the block list"
            );
            break;
        };
        names.push(parent.name.as_str());
        current = *parent;
        depth += 1;
    }

    if truncated {
        tracing::warn!(
            block_id = %target.id,
            max_depth = MAX_BLOCK_DEPTH,
            "Block hierarchy hit the depth cap; parent chain is likely cyclic"
        );
    }

    names.reverse();
    BlockPath {
        label: names.join(BLOCK_PATH_SEPARATOR),
        truncated,
    }
}
