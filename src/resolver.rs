// 🔗 Identity Resolver - decide which business a normalized candidate belongs to
// Four outcomes: refresh a known source, merge, create, or queue for a human
//
// A candidate is scored against every plausible neighbour: the best of that
// neighbour's snapshots under a weighted name/address/geo similarity. The
// decision and the writes it implies run inside one IMMEDIATE transaction,
// which is what makes match-then-create atomic against every other writer of
// the database. The match-key lock is taken first so same-key candidates
// queue in process instead of contending on the SQLite write lock.

use crate::config::ResolverConfig;
use crate::db::{
    absorb_business, businesses_with_name_key, enqueue_manual_review, find_owner, insert_event,
    load_snapshots, refresh_business, resolve_queued, upsert_review, upsert_snapshot,
    write_business, Event, ReviewWrite, Store,
};
use crate::entities::{Business, SourceSnapshot};
use crate::error::{PipelineError, Result};
use crate::geo::{match_keys, proximity_score, GeoIndex};
use crate::locks::MatchLocks;
use crate::normalizer::Candidate;
use crate::similarity::{address_similarity, name_similarity};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

// ============================================================================
// MATCH SCORE
// ============================================================================

/// How well a candidate matches one existing business
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessMatch {
    pub business_id: String,

    /// Best snapshot score (0.0 - 1.0)
    pub score: f64,

    /// Completeness of the best-matching snapshot (grey-zone tie-break)
    pub completeness: usize,

    /// Declared fetched_at of the best-matching snapshot (second tie-break);
    /// None when the source gave none
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
}

// ============================================================================
// DECISION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    /// Every business at or above tau_high, merged together with the candidate.
    /// `flagged` is the grey-zone tie-break winner, folded into the same merge.
    Merge {
        targets: Vec<String>,
        flagged: Option<(String, f64)>,
    },

    /// Grey zone: the tie-break winner
    FlaggedMerge { target: String, score: f64 },

    Create,

    /// Grey-zone tie nothing could break
    Ambiguous { tied_with: Vec<String> },
}

/// What actually happened to a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Refreshed { business_id: String },
    Created { business_id: String },
    Merged {
        business_id: String,
        absorbed: Vec<String>,
        /// Grey-zone business folded into this merge
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flagged: Option<String>,
    },
    FlaggedMerge { business_id: String, score: f64 },
    Queued { tied_with: Vec<String> },
}

impl Resolution {
    pub fn business_id(&self) -> Option<&str> {
        match self {
            Resolution::Refreshed { business_id }
            | Resolution::Created { business_id }
            | Resolution::Merged { business_id, .. }
            | Resolution::FlaggedMerge { business_id, .. } => Some(business_id),
            Resolution::Queued { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl ReviewCounts {
    fn record(&mut self, write: ReviewWrite) {
        match write {
            ReviewWrite::Inserted => self.inserted += 1,
            ReviewWrite::Updated => self.updated += 1,
            ReviewWrite::Unchanged => self.unchanged += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub resolution: Resolution,
    pub reviews: ReviewCounts,
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct IdentityResolver {
    config: ResolverConfig,
    locks: MatchLocks,
}

impl IdentityResolver {
    pub fn new(config: ResolverConfig) -> Self {
        IdentityResolver {
            config,
            locks: MatchLocks::new(),
        }
    }

    /// Share a lock table with other resolvers working on the same store
    pub fn with_locks(config: ResolverConfig, locks: MatchLocks) -> Self {
        IdentityResolver { config, locks }
    }

    pub fn locks(&self) -> &MatchLocks {
        &self.locks
    }

    /// Weighted similarity of two snapshots. A component missing on either
    /// side drops out and the remaining weights are renormalized.
    pub fn score_snapshot(&self, candidate: &SourceSnapshot, existing: &SourceSnapshot) -> f64 {
        let c = &self.config;
        let mut weighted = c.name_weight * name_similarity(&candidate.name, &existing.name);
        let mut weights = c.name_weight;

        if let (Some(a), Some(b)) = (&candidate.address, &existing.address) {
            weighted += c.address_weight * address_similarity(a, b);
            weights += c.address_weight;
        }

        if let (Some(a), Some(b)) = (&candidate.location, &existing.location) {
            weighted += c.geo_weight * proximity_score(a, b, c.max_radius_m);
            weights += c.geo_weight;
        }

        if weights <= 0.0 {
            return 0.0;
        }
        (weighted / weights).clamp(0.0, 1.0)
    }

    /// Best snapshot score against one business; None when it has no snapshots
    pub fn score_business(
        &self,
        candidate: &SourceSnapshot,
        business_id: &str,
        snapshots: &[SourceSnapshot],
    ) -> Option<BusinessMatch> {
        snapshots
            .iter()
            .map(|s| (self.score_snapshot(candidate, s), s))
            .max_by(|(a, sa), (b, sb)| {
                a.total_cmp(b)
                    // equal scores: the more complete, then fresher snapshot represents the business
                    .then_with(|| sa.completeness().cmp(&sb.completeness()))
                    .then_with(|| sa.declared_fetched_at().cmp(&sb.declared_fetched_at()))
                    .then_with(|| sb.provenance.key().cmp(&sa.provenance.key()))
            })
            .map(|(score, s)| BusinessMatch {
                business_id: business_id.to_string(),
                score,
                completeness: s.completeness(),
                fetched_at: s.declared_fetched_at(),
            })
    }

    /// Pure decision over the scored neighbours.
    ///
    /// A grey-zone winner rides along with an auto-merge instead of being
    /// dropped. Otherwise which businesses end up together would depend on
    /// whether the grey edge or the high one was seen first.
    pub fn decide(&self, matches: &[BusinessMatch]) -> Decision {
        let mut high: Vec<String> = matches
            .iter()
            .filter(|m| m.score >= self.config.tau_high)
            .map(|m| m.business_id.clone())
            .collect();
        high.sort();
        high.dedup();

        let grey = self.grey_pick(matches);

        if !high.is_empty() {
            let flagged = match grey {
                GreyPick::Winner(m) => Some((m.business_id.clone(), m.score)),
                // no grey edge, or a tie the merge cannot settle
                GreyPick::Empty | GreyPick::Tied(_) => None,
            };
            return Decision::Merge {
                targets: high,
                flagged,
            };
        }

        match grey {
            GreyPick::Empty => Decision::Create,
            GreyPick::Winner(m) => Decision::FlaggedMerge {
                target: m.business_id.clone(),
                score: m.score,
            },
            GreyPick::Tied(tied_with) => Decision::Ambiguous { tied_with },
        }
    }

    /// Grey-zone tie-break: completeness, then declared freshness
    fn grey_pick<'a>(&self, matches: &'a [BusinessMatch]) -> GreyPick<'a> {
        let mut grey: Vec<&BusinessMatch> = matches
            .iter()
            .filter(|m| m.score >= self.config.tau_low && m.score < self.config.tau_high)
            .collect();
        if grey.is_empty() {
            return GreyPick::Empty;
        }

        grey.sort_by(|a, b| {
            b.completeness
                .cmp(&a.completeness)
                .then_with(|| b.fetched_at.cmp(&a.fetched_at))
                .then_with(|| a.business_id.cmp(&b.business_id))
        });

        let winner = grey[0];
        let mut tied: Vec<String> = grey
            .iter()
            .filter(|m| m.completeness == winner.completeness && m.fetched_at == winner.fetched_at)
            .map(|m| m.business_id.clone())
            .collect();

        if tied.len() > 1 {
            tied.sort();
            return GreyPick::Tied(tied);
        }
        GreyPick::Winner(winner)
    }

    /// Resolve one candidate and persist the result.
    ///
    /// Resolvers on separate `Store` handles of one database file stay
    /// correct without sharing locks; sharing them via `with_locks` only
    /// spares same-key candidates the busy-timeout wait.
    pub fn resolve(&self, store: &Store, candidate: &Candidate, now: DateTime<Utc>) -> Result<ResolveOutcome> {
        let snapshot = &candidate.snapshot;
        let keys = match_keys(&snapshot.name, snapshot.address.as_deref(), snapshot.location.as_ref());
        let _guard = self.locks.acquire(&keys);

        store.transaction(|tx| self.resolve_in(tx, candidate, now))
    }

    fn resolve_in(&self, conn: &Connection, candidate: &Candidate, now: DateTime<Utc>) -> Result<ResolveOutcome> {
        let snapshot = &candidate.snapshot;
        let provenance = &snapshot.provenance;

        // Known provenance: idempotent refresh of its owner
        if let Some(owner) = find_owner(conn, &provenance.source_name, &provenance.external_id)? {
            let reviews = attach(conn, &owner, candidate, now)?;
            debug!(business_id = %owner, candidate = %candidate.label(), "refreshed");
            return Ok(ResolveOutcome {
                resolution: Resolution::Refreshed { business_id: owner },
                reviews,
            });
        }

        let matches = self.score_neighbours(conn, snapshot)?;

        match self.decide(&matches) {
            Decision::Merge { mut targets, flagged } => {
                if let Some((grey_id, _)) = &flagged {
                    targets.push(grey_id.clone());
                }
                let survivor = pick_survivor(conn, &targets)?;
                let absorbed: Vec<String> = targets.into_iter().filter(|id| *id != survivor).collect();
                for id in &absorbed {
                    absorb_business(conn, &survivor, id, now)?;
                }
                let reviews = attach(conn, &survivor, candidate, now)?;

                if let Some((grey_id, score)) = &flagged {
                    flag_merge(conn, &survivor, candidate, *score, Some(grey_id))?;
                }
                if !absorbed.is_empty() {
                    info!(survivor = %survivor, absorbed = ?absorbed, "businesses merged");
                }
                Ok(ResolveOutcome {
                    resolution: Resolution::Merged {
                        business_id: survivor,
                        absorbed,
                        flagged: flagged.map(|(id, _)| id),
                    },
                    reviews,
                })
            }

            Decision::FlaggedMerge { target, score } => {
                let reviews = attach(conn, &target, candidate, now)?;
                flag_merge(conn, &target, candidate, score, None)?;
                Ok(ResolveOutcome {
                    resolution: Resolution::FlaggedMerge {
                        business_id: target,
                        score,
                    },
                    reviews,
                })
            }

            Decision::Create => {
                let id = uuid::Uuid::new_v4().to_string();
                let business = Business::from_snapshots(id.clone(), now, std::slice::from_ref(snapshot), &HashMap::new());
                write_business(conn, &business)?;
                let reviews = attach(conn, &id, candidate, now)?;
                insert_event(
                    conn,
                    &Event::new(
                        "business_created",
                        "business",
                        &id,
                        serde_json::json!({
                            "source_name": provenance.source_name,
                            "external_id": provenance.external_id,
                            "name": snapshot.name,
                        }),
                        "identity_resolver",
                    ),
                )?;
                debug!(business_id = %id, candidate = %candidate.label(), "business created");
                Ok(ResolveOutcome {
                    resolution: Resolution::Created { business_id: id },
                    reviews,
                })
            }

            Decision::Ambiguous { tied_with } => {
                let err = PipelineError::MergeAmbiguity {
                    candidate: candidate.label(),
                    tied_with: tied_with.clone(),
                };
                enqueue_manual_review(conn, candidate, &err.to_string(), &tied_with, now)?;
                insert_event(
                    conn,
                    &Event::new(
                        "candidate_queued",
                        "candidate",
                        &format!("{}:{}", provenance.source_name, provenance.external_id),
                        serde_json::json!({ "tied_with": tied_with }),
                        "identity_resolver",
                    ),
                )?;
                warn!(candidate = %candidate.label(), tied_with = ?tied_with, "merge ambiguity queued");
                Ok(ResolveOutcome {
                    resolution: Resolution::Queued { tied_with },
                    reviews: ReviewCounts::default(),
                })
            }
        }
    }

    /// Geo neighbours within the radius plus same name-prefix businesses
    fn score_neighbours(&self, conn: &Connection, snapshot: &SourceSnapshot) -> Result<Vec<BusinessMatch>> {
        let mut ids = match &snapshot.location {
            Some(loc) => conn.near(loc.latitude, loc.longitude, self.config.max_radius_m)?,
            None => Vec::new(),
        };
        ids.extend(businesses_with_name_key(conn, &snapshot.name)?);
        ids.sort();
        ids.dedup();

        let mut matches = Vec::with_capacity(ids.len());
        for id in ids {
            let snapshots = load_snapshots(conn, &id)?;
            if let Some(m) = self.score_business(snapshot, &id, &snapshots) {
                matches.push(m);
            }
        }
        Ok(matches)
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        IdentityResolver::new(ResolverConfig::default())
    }
}

enum GreyPick<'a> {
    Empty,
    Winner(&'a BusinessMatch),
    Tied(Vec<String>),
}

/// Record a grey-zone merge for later audit
fn flag_merge(
    conn: &Connection,
    business_id: &str,
    candidate: &Candidate,
    score: f64,
    folded: Option<&str>,
) -> Result<()> {
    let provenance = &candidate.snapshot.provenance;
    insert_event(
        conn,
        &Event::new(
            "flagged_merge",
            "business",
            business_id,
            serde_json::json!({
                "source_name": provenance.source_name,
                "external_id": provenance.external_id,
                "score": score,
                "folded": folded,
            }),
            "identity_resolver",
        ),
    )?;
    info!(business_id = %business_id, score, candidate = %candidate.label(), "grey-zone merge flagged");
    Ok(())
}

/// Oldest created_at survives; ties go to the smallest id
fn pick_survivor(conn: &Connection, targets: &[String]) -> Result<String> {
    let mut best: Option<(String, String)> = None;
    for id in targets {
        let created_at: String = conn.query_row(
            "SELECT created_at FROM businesses WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        let candidate = (created_at, id.clone());
        if best.as_ref().map_or(true, |b| candidate < *b) {
            best = Some(candidate);
        }
    }
    best.map(|(_, id)| id)
        .ok_or_else(|| PipelineError::NotFound("merge target".to_string()))
}

/// Store the candidate's snapshot and reviews under `business_id`, then
/// recompute the business
fn attach(conn: &Connection, business_id: &str, candidate: &Candidate, now: DateTime<Utc>) -> Result<ReviewCounts> {
    let provenance = &candidate.snapshot.provenance;
    upsert_snapshot(conn, business_id, &candidate.snapshot)?;

    let mut counts = ReviewCounts::default();
    for review in &candidate.reviews {
        counts.record(upsert_review(conn, business_id, &provenance.source_name, review, now)?);
    }

    refresh_business(conn, business_id, now)?;
    resolve_queued(conn, &provenance.source_name, &provenance.external_id)?;
    Ok(counts)
}

// ============================================================================
// TESTS
// ============================================================================
