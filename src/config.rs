//! TOML configuration for the engine and its operational surface.
//!
//! A config file defines award amounts, the referral share, leaderboard cadence,
//! and sweep policy. Every field has a production default so a missing file or
//! section is fine; `EngineConfig::load` layers the file over the defaults and
//! validates the result.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Basis points denominator for the referral share (10_000 = 100%).
pub const BPS_DENOMINATOR: i64 = 10_000;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub awards: AwardConfig,
    pub referral: ReferralConfig,
    pub leaderboard: LeaderboardConfig,
}

/// The `[awards]` section: fixed beam amounts per action type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwardConfig {
    /// Beams for a first-time content completion.
    pub content_beams: i64,
    /// Beams for a poll vote.
    pub poll_beams: i64,
    /// Signup bonus for a newly verified referred user.
    pub referral_bonus_beams: i64,
    /// Upper bound accepted for caller-computed game scores.
    pub game_max_beams: i64,
}

/// The `[referral]` section: one-hop network share.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferralConfig {
    /// Share of a referred user's grant forwarded to the referrer, in basis
    /// points (2000 = 20%). The share is floored to a whole beam.
    pub network_share_bps: i64,
}

/// The `[leaderboard]` section: window cadence and sweep policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    /// Window length in whole days; windows are aligned to the Unix epoch.
    pub window_days: i64,
    /// Windows with fewer participants than this are skipped by the
    /// achievement sweep (and left unmarked so a later sweep can retry).
    pub min_sweep_participants: usize,
    /// Inclusive rank cutoff for the "top ten" achievement (ranks 2..=cutoff).
    pub top_cutoff: u32,
}

impl Default for AwardConfig {
    fn default() -> Self {
        AwardConfig {
            content_beams: 50,
            poll_beams: 10,
            referral_bonus_beams: 100,
            game_max_beams: 500,
        }
    }
}

impl Default for ReferralConfig {
    fn default() -> Self {
        ReferralConfig {
            network_share_bps: 2000,
        }
    }
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        LeaderboardConfig {
            window_days: 7,
            min_sweep_participants: 3,
            top_cutoff: 10,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            awards: AwardConfig::default(),
            referral: ReferralConfig::default(),
            leaderboard: LeaderboardConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// missing section or field.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: EngineConfig =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break engine invariants.
    pub fn validate(&self) -> Result<()> {
        if !(0..=BPS_DENOMINATOR).contains(&self.referral.network_share_bps) {
            anyhow::bail!(
                "referral.network_share_bps must be within 0..={}, got {}",
                BPS_DENOMINATOR,
                self.referral.network_share_bps
            );
        }
        if self.leaderboard.window_days < 1 {
            anyhow::bail!(
                "leaderboard.window_days must be at least 1, got {}",
                self.leaderboard.window_days
            );
        }
        if self.leaderboard.top_cutoff < 2 {
            anyhow::bail!(
                "leaderboard.top_cutoff must be at least 2, got {}",
                self.leaderboard.top_cutoff
            );
        }
        for (name, amount) in [
            ("awards.content_beams", self.awards.content_beams),
            ("awards.poll_beams", self.awards.poll_beams),
            ("awards.referral_bonus_beams", self.awards.referral_bonus_beams),
            ("awards.game_max_beams", self.awards.game_max_beams),
        ] {
            if amount < 0 {
                anyhow::bail!("{} must be non-negative, got {}", name, amount);
            }
        }
        Ok(())
    }
}
