//! # Achievements — Catalog, Progress Tracking, Completion Notifications
//!
//! The catalog is a closed enum: every badge the platform can grant is known
//! at compile time, with its storage slug, display title, progress target,
//! and beam reward. Slug strings appear only at the storage and API boundary
//! and parse back through [`AchievementKind::from_slug`]; an unknown slug is
//! an operator-facing configuration error.
//!
//! Progress is a per-`(user, achievement)` counter capped at the target.
//! Increments past completion are silently ignored (intentional idempotency),
//! and the completion flip happens exactly once — that is the only moment a
//! notification is emitted. Completion and reward payout are independent
//! one-way flips: the UI claims the reward separately, guarded by a
//! conditional `reward_claimed` update.

use crate::store::Store;
use crate::{EngineError, EngineResult, NotificationKind, NotificationSink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Every badge the platform grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AchievementKind {
    /// Rank 1 in a finalized leaderboard window.
    WeeklyChampion,
    /// Ranks 2..=10 in a finalized window, three times.
    WeeklyTopTen,
    /// Five verified referrals.
    GrowthAmbassador,
    /// Ten completed topics.
    Trailblazer,
    /// Twenty poll votes.
    VoiceOfTheCrowd,
    /// Fifteen finished word games.
    WordWizard,
}

/// Static catalog metadata for one achievement.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct AchievementSpec {
    pub kind: AchievementKind,
    pub slug: &'static str,
    pub title: &'static str,
    pub caption: &'static str,
    /// Progress target; completion flips when progress reaches it.
    pub total_count: i32,
    /// Beams credited when the user claims the completed achievement.
    pub beams_to_gain: i64,
}

const CATALOG: [AchievementSpec; 6] = [
    AchievementSpec {
        kind: AchievementKind::WeeklyChampion,
        slug: "weekly-champion",
        title: "Beam Champion",
        caption: "Top the leaderboard for a whole window",
        total_count: 1,
        beams_to_gain: 250,
    },
    AchievementSpec {
        kind: AchievementKind::WeeklyTopTen,
        slug: "weekly-top-ten",
        title: "Shining Ten",
        caption: "Finish a window in the top ten, three times",
        total_count: 3,
        beams_to_gain: 150,
    },
    AchievementSpec {
        kind: AchievementKind::GrowthAmbassador,
        slug: "growth-ambassador",
        title: "Growth Ambassador",
        caption: "Bring five friends aboard",
        total_count: 5,
        beams_to_gain: 200,
    },
    AchievementSpec {
        kind: AchievementKind::Trailblazer,
        slug: "trailblazer",
        title: "Trailblazer",
        caption: "Complete ten topics",
        total_count: 10,
        beams_to_gain: 100,
    },
    AchievementSpec {
        kind: AchievementKind::VoiceOfTheCrowd,
        slug: "voice-of-the-crowd",
        title: "Voice of the Crowd",
        caption: "Vote in twenty polls",
        total_count: 20,
        beams_to_gain: 80,
    },
    AchievementSpec {
        kind: AchievementKind::WordWizard,
        slug: "word-wizard",
        title: "Word Wizard",
        caption: "Finish fifteen word games",
        total_count: 15,
        beams_to_gain: 120,
    },
];

impl AchievementKind {
    pub const ALL: [AchievementKind; 6] = [
        AchievementKind::WeeklyChampion,
        AchievementKind::WeeklyTopTen,
        AchievementKind::GrowthAmbassador,
        AchievementKind::Trailblazer,
        AchievementKind::VoiceOfTheCrowd,
        AchievementKind::WordWizard,
    ];

    pub fn spec(&self) -> &'static AchievementSpec {
        CATALOG
            .iter()
            .find(|s| s.kind == *self)
            .expect("catalog covers every kind")
    }

    pub fn slug(&self) -> &'static str {
        self.spec().slug
    }

    /// Resolve a storage/API slug to its catalog entry.
    pub fn from_slug(slug: &str) -> EngineResult<AchievementKind> {
        CATALOG
            .iter()
            .find(|s| s.slug == slug)
            .map(|s| s.kind)
            .ok_or_else(|| EngineError::AchievementNotFound(slug.to_string()))
    }
}

impl std::fmt::Display for AchievementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// One row per `(user, achievement)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementProgress {
    pub user_id: Uuid,
    pub kind: AchievementKind,
    pub progress: i32,
    pub completed: bool,
    pub reward_claimed: bool,
    pub updated_at: DateTime<Utc>,
}

/// Result of a progress increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressBump {
    pub progress: i32,
    pub completed: bool,
    /// True only on the increment that flipped completion.
    pub newly_completed: bool,
}

pub struct AchievementTracker {
    store: Arc<dyn Store>,
    sink: Arc<dyn NotificationSink>,
}

impl AchievementTracker {
    pub fn new(store: Arc<dyn Store>, sink: Arc<dyn NotificationSink>) -> Self {
        AchievementTracker { store, sink }
    }

    /// Advance an achievement by one step. Already-completed achievements are
    /// left untouched. The first-time completion emits exactly one
    /// notification; delivery is fire-and-forget.
    pub async fn increment_progress(
        &self,
        user: Uuid,
        kind: AchievementKind,
        now: DateTime<Utc>,
    ) -> EngineResult<ProgressBump> {
        let spec = kind.spec();
        let bump = self
            .store
            .bump_progress(user, kind, spec.total_count, now)
            .await?;

        if bump.newly_completed {
            info!(user = %user, achievement = %kind, "achievement completed");
            self.sink.send(
                user,
                NotificationKind::AchievementCompleted,
                &format!("Achievement unlocked: {}", spec.title),
                Some("/achievements"),
            );
        }
        Ok(bump)
    }

    pub async fn progress_for(
        &self,
        user: Uuid,
        kind: AchievementKind,
    ) -> EngineResult<Option<AchievementProgress>> {
        self.store.get_progress(user, kind).await
    }

    /// All progress rows a user has touched.
    pub async fn all_progress(&self, user: Uuid) -> EngineResult<Vec<AchievementProgress>> {
        self.store.all_progress(user).await
    }
}
