//! In-memory storage backend.
//!
//! Backs tests and local development. All state lives behind one mutex so
//! every compound check (announced-before-upsert, completed-before-claim)
//! happens in a single critical section, mirroring the transaction scope of
//! the SQL backend. Operations never hold the lock across an await point.

use super::{Store, UserDirectory};
use crate::achievements::{AchievementKind, AchievementProgress, ProgressBump};
use crate::balance::UserBalance;
use crate::leaderboard::{LeaderboardEntry, Window};
use crate::ledger::{PointsHistoryEntry, PointsSource};
use crate::{EngineError, EngineResult, Segment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

const ENTRY_LEVEL: i32 = 1;

#[derive(Clone)]
struct BalanceRow {
    total_points: i64,
    level_number: i32,
}

#[derive(Clone)]
struct EntryRow {
    points: i64,
    rank: i32,
    created_at: DateTime<Utc>,
    // Insertion order, the final tie-break mirroring the SQL serial id.
    seq: u64,
}

#[derive(Clone, Default)]
struct AnnouncementRow {
    announced: bool,
    achievements_calculated: bool,
}

#[derive(Clone)]
struct ProgressRow {
    progress: i32,
    completed: bool,
    reward_claimed: bool,
    updated_at: DateTime<Utc>,
}

type WindowKey = (DateTime<Utc>, DateTime<Utc>, Segment);

#[derive(Default)]
struct MemoryState {
    balances: HashMap<Uuid, BalanceRow>,
    history: Vec<PointsHistoryEntry>,
    entries: HashMap<WindowKey, HashMap<Uuid, EntryRow>>,
    announcements: HashMap<WindowKey, AnnouncementRow>,
    progress: HashMap<(Uuid, AchievementKind), ProgressRow>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn window_key(window: &Window, segment: Segment) -> WindowKey {
    (window.start, window.end, segment)
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn credit_locked(state: &mut MemoryState, user: Uuid, amount: i64) -> UserBalance {
        let row = state.balances.entry(user).or_insert(BalanceRow {
            total_points: 0,
            level_number: ENTRY_LEVEL,
        });
        row.total_points += amount;
        UserBalance {
            user_id: user,
            total_points: row.total_points,
            level_number: row.level_number,
        }
    }

    fn sorted_entries(state: &MemoryState, key: &WindowKey) -> Vec<(Uuid, EntryRow)> {
        let mut rows: Vec<(Uuid, EntryRow)> = state
            .entries
            .get(key)
            .map(|m| m.iter().map(|(u, r)| (*u, r.clone())).collect())
            .unwrap_or_default();
        rows.sort_by(|(_, a), (_, b)| {
            b.points
                .cmp(&a.points)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.seq.cmp(&b.seq))
        });
        rows
    }

    /// Windows with participants for a segment whose period has ended,
    /// filtered by `keep`, ordered by end ascending.
    fn ended_windows(
        state: &MemoryState,
        segment: Segment,
        now: DateTime<Utc>,
        keep: impl Fn(&AnnouncementRow) -> bool,
    ) -> Vec<Window> {
        let mut windows: Vec<Window> = state
            .entries
            .iter()
            .filter(|(key, rows)| key.2 == segment && key.1 <= now && !rows.is_empty())
            .filter(|(key, _)| {
                let flags = state.announcements.get(*key).cloned().unwrap_or_default();
                keep(&flags)
            })
            .map(|(key, _)| Window {
                start: key.0,
                end: key.1,
            })
            .collect();
        windows.sort_by_key(|w| w.end);
        windows
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn credit_balance(&self, user: Uuid, amount: i64) -> EngineResult<UserBalance> {
        let mut state = lock_or_recover(&self.state);
        Ok(Self::credit_locked(&mut state, user, amount))
    }

    async fn get_balance(&self, user: Uuid) -> EngineResult<Option<UserBalance>> {
        let state = lock_or_recover(&self.state);
        Ok(state.balances.get(&user).map(|row| UserBalance {
            user_id: user,
            total_points: row.total_points,
            level_number: row.level_number,
        }))
    }

    async fn promote_level(
        &self,
        user: Uuid,
        from_level: i32,
        to_level: i32,
    ) -> EngineResult<bool> {
        let mut state = lock_or_recover(&self.state);
        match state.balances.get_mut(&user) {
            Some(row) if row.level_number == from_level => {
                row.level_number = to_level;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_history(&self, entry: &PointsHistoryEntry) -> EngineResult<()> {
        let mut state = lock_or_recover(&self.state);
        state.history.push(entry.clone());
        Ok(())
    }

    async fn history(&self, user: Uuid, limit: i64) -> EngineResult<Vec<PointsHistoryEntry>> {
        let state = lock_or_recover(&self.state);
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|e| e.user_id == user)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn credit_and_record(
        &self,
        user: Uuid,
        amount: i64,
        source: PointsSource,
        description: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<UserBalance> {
        let mut state = lock_or_recover(&self.state);
        let balance = Self::credit_locked(&mut state, user, amount);
        state.history.push(PointsHistoryEntry {
            user_id: user,
            points: amount,
            source,
            description: description.to_string(),
            created_at: now,
        });
        Ok(balance)
    }

    async fn upsert_score(
        &self,
        user: Uuid,
        window: &Window,
        segment: Segment,
        delta: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<LeaderboardEntry> {
        let mut guard = lock_or_recover(&self.state);
        let state = &mut *guard;
        let key = window_key(window, segment);

        if state
            .announcements
            .get(&key)
            .map(|a| a.announced)
            .unwrap_or(false)
        {
            return Err(EngineError::WindowClosed {
                start: window.start,
                end: window.end,
            });
        }

        let seq = state.next_seq;
        let rows = state.entries.entry(key).or_default();
        let (entry, inserted) = match rows.get_mut(&user) {
            Some(row) => {
                if row.points + delta < 0 {
                    return Err(EngineError::InsufficientBalance { user });
                }
                row.points += delta;
                (
                    LeaderboardEntry {
                        user_id: user,
                        points: row.points,
                        rank: row.rank,
                        created_at: row.created_at,
                    },
                    false,
                )
            }
            None => {
                if delta < 0 {
                    return Err(EngineError::InsufficientBalance { user });
                }
                rows.insert(
                    user,
                    EntryRow {
                        points: delta,
                        rank: 1,
                        created_at: now,
                        seq,
                    },
                );
                (
                    LeaderboardEntry {
                        user_id: user,
                        points: delta,
                        rank: 1,
                        created_at: now,
                    },
                    true,
                )
            }
        };
        if inserted {
            state.next_seq += 1;
        }
        Ok(entry)
    }

    async fn window_entries(
        &self,
        window: &Window,
        segment: Segment,
    ) -> EngineResult<Vec<LeaderboardEntry>> {
        let state = lock_or_recover(&self.state);
        let rows = Self::sorted_entries(&state, &window_key(window, segment));
        Ok(rows
            .into_iter()
            .map(|(user_id, row)| LeaderboardEntry {
                user_id,
                points: row.points,
                rank: row.rank,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn write_ranks(
        &self,
        window: &Window,
        segment: Segment,
        ranks: &[(Uuid, i32)],
    ) -> EngineResult<()> {
        let mut state = lock_or_recover(&self.state);
        if let Some(rows) = state.entries.get_mut(&window_key(window, segment)) {
            for (user, rank) in ranks {
                if let Some(row) = rows.get_mut(user) {
                    row.rank = *rank;
                }
            }
        }
        Ok(())
    }

    async fn announce_window(&self, window: &Window, segment: Segment) -> EngineResult<bool> {
        let mut state = lock_or_recover(&self.state);
        let flags = state
            .announcements
            .entry(window_key(window, segment))
            .or_default();
        if flags.announced {
            Ok(false)
        } else {
            flags.announced = true;
            Ok(true)
        }
    }

    async fn is_window_announced(&self, window: &Window, segment: Segment) -> EngineResult<bool> {
        let state = lock_or_recover(&self.state);
        Ok(state
            .announcements
            .get(&window_key(window, segment))
            .map(|a| a.announced)
            .unwrap_or(false))
    }

    async fn try_mark_achievements_calculated(
        &self,
        window: &Window,
        segment: Segment,
    ) -> EngineResult<bool> {
        let mut state = lock_or_recover(&self.state);
        let flags = state
            .announcements
            .entry(window_key(window, segment))
            .or_default();
        if flags.achievements_calculated {
            Ok(false)
        } else {
            flags.achievements_calculated = true;
            Ok(true)
        }
    }

    async fn latest_sweepable_window(
        &self,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Window>> {
        let state = lock_or_recover(&self.state);
        Ok(
            Self::ended_windows(&state, segment, now, |flags| !flags.achievements_calculated)
                .pop(),
        )
    }

    async fn unannounced_ended_windows(
        &self,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Window>> {
        let state = lock_or_recover(&self.state);
        Ok(Self::ended_windows(&state, segment, now, |flags| {
            !flags.announced
        }))
    }

    async fn bump_progress(
        &self,
        user: Uuid,
        kind: AchievementKind,
        total_count: i32,
        now: DateTime<Utc>,
    ) -> EngineResult<ProgressBump> {
        let mut state = lock_or_recover(&self.state);
        let row = state
            .progress
            .entry((user, kind))
            .or_insert_with(|| ProgressRow {
                progress: 0,
                completed: false,
                reward_claimed: false,
                updated_at: now,
            });
        if row.completed {
            return Ok(ProgressBump {
                progress: row.progress,
                completed: true,
                newly_completed: false,
            });
        }
        row.progress += 1;
        row.updated_at = now;
        let newly_completed = row.progress >= total_count;
        row.completed = newly_completed;
        Ok(ProgressBump {
            progress: row.progress,
            completed: row.completed,
            newly_completed,
        })
    }

    async fn get_progress(
        &self,
        user: Uuid,
        kind: AchievementKind,
    ) -> EngineResult<Option<AchievementProgress>> {
        let state = lock_or_recover(&self.state);
        Ok(state.progress.get(&(user, kind)).map(|row| AchievementProgress {
            user_id: user,
            kind,
            progress: row.progress,
            completed: row.completed,
            reward_claimed: row.reward_claimed,
            updated_at: row.updated_at,
        }))
    }

    async fn all_progress(&self, user: Uuid) -> EngineResult<Vec<AchievementProgress>> {
        let state = lock_or_recover(&self.state);
        let mut rows: Vec<AchievementProgress> = state
            .progress
            .iter()
            .filter(|((u, _), _)| *u == user)
            .map(|((_, kind), row)| AchievementProgress {
                user_id: user,
                kind: *kind,
                progress: row.progress,
                completed: row.completed,
                reward_claimed: row.reward_claimed,
                updated_at: row.updated_at,
            })
            .collect();
        rows.sort_by_key(|p| p.kind.slug());
        Ok(rows)
    }

    async fn try_claim_reward(&self, user: Uuid, kind: AchievementKind) -> EngineResult<bool> {
        let mut state = lock_or_recover(&self.state);
        match state.progress.get_mut(&(user, kind)) {
            Some(row) if row.completed && !row.reward_claimed => {
                row.reward_claimed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-memory user directory: id to optional referrer.
#[derive(Default)]
pub struct MemoryDirectory {
    users: Mutex<HashMap<Uuid, Option<Uuid>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        MemoryDirectory::default()
    }

    /// Register a user, optionally with a referrer.
    pub fn add_user(&self, user: Uuid, referred_by: Option<Uuid>) {
        lock_or_recover(&self.users).insert(user, referred_by);
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn referrer_of(&self, user: Uuid) -> EngineResult<Option<Uuid>> {
        let users = lock_or_recover(&self.users);
        match users.get(&user) {
            Some(referrer) => Ok(*referrer),
            None => Err(EngineError::UserNotFound(user)),
        }
    }
}
