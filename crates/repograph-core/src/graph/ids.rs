//! Stable identifiers derived from what a node or cluster is, never from
//! when it was seen.

use sha2::{Digest, Sha256};

use crate::models::{NodeId, NodeKind, RefKind};

const ID_HEX_LEN: usize = 16;

fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(ID_HEX_LEN);
    hex
}

/// `sha256("{kind}\0{path}#{qualified_name}")`, first 16 hex chars.
pub fn node_id(kind: NodeKind, path: &str, qualified_name: &str) -> NodeId {
    short_digest(&[kind.as_str(), &format!("{path}#{qualified_name}")])
}

pub fn file_node_id(path: &str) -> NodeId {
    node_id(NodeKind::File, path, path)
}

pub fn cluster_id(source: &str, target_text: &str, kind: RefKind) -> String {
    short_digest(&[source, target_text, kind.as_str()])
}
