//! Cache-key hashing and the stable tie-break ranking rule (spec §4.6 step 6).

use sha2::{Digest, Sha256};

use ltmc_types::{Chunk, Resource};

use crate::RetrievedChunk;

/// Sort already-hydrated `(Chunk, Resource, score)` triples in place:
/// similarity score descending, then `Chunk.position` ascending, then
/// `Resource.created_at` descending. `sort_by` is stable, so ties that
/// survive all three keys keep the vector search's own ordering.
pub(crate) fn rank(mut hydrated: Vec<(Chunk, Resource, f32)>) -> Vec<RetrievedChunk> {
    hydrated.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.position.cmp(&b.0.position))
            .then_with(|| b.1.created_at.cmp(&a.1.created_at))
    });

    hydrated
        .into_iter()
        .enumerate()
        .map(|(rank, (chunk, resource, score))| RetrievedChunk {
            chunk,
            resource,
            score,
            rank,
            neighbor_resource_ids: Vec::new(),
        })
        .collect()
}

/// Short hex digest of `query`, used as the `{hash(query)}` segment of the
/// retrieval cache key.
#[must_use]
pub fn query_hash(query: &str) -> String {
    hex_digest(query.as_bytes())
}

/// Short hex digest of whatever filters were applied to a `retrieve` call,
/// so that two calls differing only by filter never collide in the cache.
#[must_use]
pub fn filters_hash(type_filter: Option<&str>, conversation_id: Option<&str>) -> String {
    hex_digest(format!("{type_filter:?}|{conversation_id:?}").as_bytes())
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn chunk(id: i64, position: i64) -> Chunk {
        Chunk {
            id,
            resource_id: 1,
            chunk_text: format!("chunk {id}"),
            vector_id: id,
            position,
        }
    }

    fn resource(created_at_secs: i64) -> Resource {
        Resource {
            id: 1,
            file_name: "a.md".to_string(),
            resource_type: ltmc_types::ResourceType::Document,
            created_at: Utc.timestamp_opt(created_at_secs, 0).unwrap(),
        }
    }

    #[test]
    fn orders_by_score_descending() {
        let ranked = rank(vec![
            (chunk(1, 0), resource(0), 0.5),
            (chunk(2, 0), resource(0), 0.9),
        ]);
        assert_eq!(ranked[0].chunk.id, 2);
        assert_eq!(ranked[1].chunk.id, 1);
    }

    #[test]
    fn ties_break_on_position_then_recency() {
        let ranked = rank(vec![
            (chunk(1, 5), resource(100), 0.9),
            (chunk(2, 1), resource(200), 0.9),
            (chunk(3, 1), resource(300), 0.9),
        ]);
        // position 1 beats position 5; among the position-1 pair, the newer
        // resource (300) sorts first.
        assert_eq!(ranked[0].chunk.id, 3);
        assert_eq!(ranked[1].chunk.id, 2);
        assert_eq!(ranked[2].chunk.id, 1);
    }

    #[test]
    fn query_hash_is_deterministic_and_distinguishes_queries() {
        assert_eq!(query_hash("hello"), query_hash("hello"));
        assert_ne!(query_hash("hello"), query_hash("world"));
    }
}
