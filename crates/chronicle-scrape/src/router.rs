//! Target router (C7): per-target cache of access method + fallback policy.
//!
//! Reconciles two statements of spec §4.7/§4.8 that read as contradictory in
//! isolation — "fresh target, no session, plans fast" (§8 scenario 1) vs.
//! "no session ⇒ method=none" (§4.7) — by scoping the latter to targets
//! *already known* to require the browser (`kind=private` from a previous
//! probe). A brand-new or still-`unknown`-kind target always gets the cheap
//! `fast` path first; stage C8 owns the fast→browser fallback when fast
//! comes back empty and a session is available. See DESIGN.md.

use chronicle_common::{AccessMethod, SessionStatus, StoreError, TargetKind};
use chronicle_store::StoreAdapter;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPlan {
    pub method: AccessMethod,
    pub usable: bool,
    pub reason: Option<String>,
}

const CACHE_TTL: ChronoDuration = ChronoDuration::hours(24);

pub struct TargetRouter {
    store: Arc<StoreAdapter>,
}

impl TargetRouter {
    pub fn new(store: Arc<StoreAdapter>) -> Self {
        Self { store }
    }

    /// `plan(target_id)` per spec §4.7.
    pub async fn plan(&self, target_id: &str) -> Result<AccessPlan, StoreError> {
        let cached = self.store.get_target(target_id).await?;

        if let Some(target) = &cached {
            let fresh = Utc::now() - target.last_probed_at < CACHE_TTL;
            if fresh && target.kind != TargetKind::Unknown {
                return Ok(AccessPlan {
                    method: target.access_method,
                    usable: target.is_accessible,
                    reason: target.error.clone(),
                });
            }

            if target.kind == TargetKind::Private {
                return self.plan_for_known_private(target_id).await;
            }
        }

        // Brand-new, or previously public/unknown: try the cheap path.
        self.store
            .upsert_target(target_id, TargetKind::Unknown, AccessMethod::Fast, true)
            .await?;
        Ok(AccessPlan {
            method: AccessMethod::Fast,
            usable: true,
            reason: None,
        })
    }

    async fn plan_for_known_private(&self, target_id: &str) -> Result<AccessPlan, StoreError> {
        let session = self.store.get_session_state().await?;
        let has_valid_session = session.map(|s| s.status == SessionStatus::Valid).unwrap_or(false);

        if has_valid_session {
            self.store
                .upsert_target(target_id, TargetKind::Unknown, AccessMethod::Browser, true)
                .await?;
            Ok(AccessPlan {
                method: AccessMethod::Browser,
                usable: true,
                reason: None,
            })
        } else {
            self.store
                .upsert_target(target_id, TargetKind::Private, AccessMethod::None, false)
                .await?;
            Ok(AccessPlan {
                method: AccessMethod::None,
                usable: false,
                reason: Some("no session".to_string()),
            })
        }
    }

    pub async fn mark_scraped(&self, target_id: &str, method: AccessMethod) -> Result<(), StoreError> {
        self.store.mark_scraped(target_id, method).await
    }

    /// Only browser-side access errors should reach here (spec §4.8); a
    /// zero-item fast-scraper result is never sufficient cause.
    pub async fn mark_error(&self, target_id: &str, message: &str) -> Result<(), StoreError> {
        self.store.mark_error(target_id, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_plan_carries_the_denial_reason() {
        let plan = AccessPlan {
            method: AccessMethod::None,
            usable: false,
            reason: Some("no session".to_string()),
        };
        assert!(!plan.usable);
        assert_eq!(plan.reason.as_deref(), Some("no session"));
    }
}
