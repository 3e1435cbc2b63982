//! Aggregator: merges per-layer detections into one non-overlapping list
//!
//! Detections whose spans overlap beyond a configurable fraction cluster
//! together. Within a cluster the representative is chosen by layer
//! priority, then confidence; independent agreement on type across layers
//! boosts confidence (cross-validation), and out-voted type claims are
//! kept as metadata rather than discarded.

use crate::entity::{AlternateType, Entity, Layer};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::debug;

pub struct Aggregator {
    overlap_fraction: f64,
    boost: f64,
}

impl Aggregator {
    pub fn new(overlap_fraction: f64, boost: f64) -> Self {
        Self {
            overlap_fraction,
            boost,
        }
    }

    /// Merge raw detections from every layer that ran. Output is sorted
    /// by start offset and guaranteed non-overlapping.
    pub fn aggregate(&self, mut raw: Vec<Entity>) -> Vec<Entity> {
        if raw.len() <= 1 {
            return raw;
        }

        raw.sort_by_key(|e| (e.start, e.end));

        let mut clusters: Vec<Vec<Entity>> = Vec::new();
        for entity in raw {
            let home = clusters.iter_mut().rev().find(|cluster| {
                cluster
                    .iter()
                    .any(|member| entity.overlap_fraction(member) >= self.overlap_fraction)
            });
            match home {
                Some(cluster) => cluster.push(entity),
                None => clusters.push(vec![entity]),
            }
        }

        let mut merged: Vec<Entity> = clusters
            .into_iter()
            .map(|c| self.resolve_cluster(c))
            .collect();

        merged.sort_by_key(|e| (e.start, e.end));
        enforce_non_overlap(merged)
    }

    fn resolve_cluster(&self, mut cluster: Vec<Entity>) -> Entity {
        if cluster.len() == 1 {
            return cluster.pop().expect("cluster has one member");
        }

        let rep_idx = cluster
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| rank(a).partial_cmp(&rank(b)).unwrap_or(Ordering::Equal))
            .map(|(i, _)| i)
            .expect("cluster is non-empty");
        let mut rep = cluster.swap_remove(rep_idx);

        let mut agreeing: BTreeSet<Layer> = rep.sources.clone();
        let mut best_confidence = rep.confidence;

        for other in cluster {
            if other.entity_type == rep.entity_type {
                agreeing.extend(other.sources.iter().copied());
                if other.confidence > best_confidence {
                    best_confidence = other.confidence;
                }
            } else {
                rep.alternate_types.push(AlternateType {
                    entity_type: other.entity_type,
                    layer: other.top_source(),
                    confidence: other.confidence,
                });
            }
        }

        rep.sources = agreeing;
        rep.confidence = if rep.sources.len() >= 2 {
            debug!(
                "cross-validation boost for '{}' ({} layers agree)",
                rep.text,
                rep.sources.len()
            );
            (best_confidence + self.boost).min(1.0)
        } else {
            best_confidence
        };

        rep
    }
}

fn rank(e: &Entity) -> (u8, f64) {
    (e.top_source().priority(), e.confidence)
}

/// Final sweep guaranteeing the non-overlap invariant even for partial
/// overlaps below the clustering threshold.
fn enforce_non_overlap(sorted: Vec<Entity>) -> Vec<Entity> {
    let mut out: Vec<Entity> = Vec::with_capacity(sorted.len());
    for entity in sorted {
        match out.last() {
            Some(last) if entity.overlaps(last) => {
                if rank(&entity) > rank(last) {
                    debug!("dropping '{}' for overlapping '{}'", last.text, entity.text);
                    out.pop();
                    out.push(entity);
                } else {
                    debug!("dropping '{}' for overlapping '{}'", entity.text, out.last().map(|l| l.text.as_str()).unwrap_or(""));
                }
            }
            _ => out.push(entity),
        }
    }
    out
}
