//! Build-repair election
//!
//! One singleton row records whether the shared build is healthy and which
//! agent, if any, holds the right to repair it. Agents that notice a broken
//! build call [`BuildCoordinator::handle_broken_build`]; exactly one of them
//! is told to fix it and the rest are told how long to back off.
//!
//! The claim is a lease. It ends explicitly through
//! [`BuildCoordinator::mark_fixed`] or implicitly once it is older than the
//! stale timeout, at which point [`BuildCoordinator::cleanup`] hands the build
//! back to `broken` so the next caller can take it over.
//!
//! Mutual exclusion comes from [`BuildCoordinator::try_transition`]: an
//! `UPDATE ... WHERE status = <expected>` whose `rows_affected` says whether
//! this caller won. Each decision runs as one immediate transaction, so the
//! staleness sweep and the claim observe the same row.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::BuildConfig,
    store::{format_timestamp, parse_optional_timestamp, Store},
    AgentId, Error, Result,
};

/// Health of the shared build
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BuildStatus {
    /// Build is healthy
    Passing,
    /// Build is failing and nobody is repairing it
    Broken,
    /// An agent holds the repair lease
    Fixing,
}

impl BuildStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passing => "passing",
            Self::Broken => "broken",
            Self::Fixing => "fixing",
        }
    }
}

/// Snapshot of the singleton build-health record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    pub status: BuildStatus,
    /// Set exactly while `status` is `Fixing`
    pub fixer_agent_id: Option<AgentId>,
    /// Start of the current broken episode; cleared when passing again
    pub broken_since: Option<DateTime<Utc>>,
    /// Time of the most recent coordination decision
    pub last_check: Option<DateTime<Utc>>,
}

impl Default for BuildState {
    fn default() -> Self {
        Self {
            status: BuildStatus::Passing,
            fixer_agent_id: None,
            broken_since: None,
            last_check: None,
        }
    }
}

impl BuildState {
    /// Check the record's structural invariants
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if a fixer is set outside `Fixing` (or missing
    /// inside it), or if `broken_since` is set while `Passing`.
    pub fn validate(&self) -> Result<()> {
        let fixing = self.status == BuildStatus::Fixing;
        if fixing != self.fixer_agent_id.is_some() {
            return Err(Error::ValidationError(format!(
                "fixer_agent_id must be set exactly when status is fixing (status: {})",
                self.status
            )));
        }
        if self.status == BuildStatus::Passing && self.broken_since.is_some() {
            return Err(Error::ValidationError(
                "broken_since must be cleared while passing".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `agent_id` currently holds the repair lease
    #[must_use]
    pub fn is_fixer(&self, agent_id: &AgentId) -> bool {
        self.status == BuildStatus::Fixing && self.fixer_agent_id.as_ref() == Some(agent_id)
    }
}

/// Per-call timing for [`BuildCoordinator::handle_broken_build`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleOptions {
    /// Back-off suggested to callers that do not get the lease
    pub wait: Duration,
    /// Age of `broken_since` after which a fixer is presumed dead
    pub stale: Duration,
}

impl Default for HandleOptions {
    fn default() -> Self {
        BuildConfig::default().into()
    }
}

impl From<BuildConfig> for HandleOptions {
    fn from(config: BuildConfig) -> Self {
        Self {
            wait: config.wait(),
            stale: config.stale(),
        }
    }
}

/// Outcome of an election round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildDecision {
    /// The caller holds the lease and should repair the build
    pub should_fix: bool,
    /// How long to sleep before asking again; zero for the fixer
    pub wait: Duration,
    /// State after this call
    pub state: BuildState,
}

/// Arbitrates the build-repair lease across agent processes
#[derive(Debug, Clone)]
pub struct BuildCoordinator {
    store: Store,
    clock: Arc<dyn Clock>,
    config: BuildConfig,
}

impl BuildCoordinator {
    /// Coordinator on the wall clock with default timings
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            config: BuildConfig::default(),
        }
    }

    /// Replace the default wait/stale timings
    #[must_use]
    pub const fn with_config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }

    /// Timings used when callers pass [`Self::default_options`]
    #[must_use]
    pub fn default_options(&self) -> HandleOptions {
        self.config.into()
    }

    /// Current build state, creating the default `passing` record on first use
    pub async fn get(&self) -> Result<BuildState> {
        ensure_row(self.store.pool()).await?;
        load_state(self.store.pool()).await
    }

    /// Run one election round for `agent_id`
    ///
    /// Releases a stale lease first, then:
    /// - `fixing`: only the current fixer is told to fix
    /// - `passing` / `broken`: the caller tries to take the lease
    ///
    /// Losing is reported as `should_fix: false` with `wait` set, not as an
    /// error.
    pub async fn handle_broken_build(
        &self,
        agent_id: &AgentId,
        options: HandleOptions,
    ) -> Result<BuildDecision> {
        let agent_id = agent_id.clone();
        let clock = Arc::clone(&self.clock);
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    decide(conn, clock.now(), &agent_id, options).await
                })
            })
            .await
    }

    /// Declare the build healthy again
    ///
    /// Unconditional: any agent that confirms the build passes may call it.
    pub async fn mark_fixed(&self) -> Result<BuildState> {
        let now = self.clock.now();
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    ensure_row(&mut *conn).await?;
                    sqlx::query(
                        "UPDATE build_state
                         SET status = 'passing', fixer_agent_id = NULL, broken_since = NULL, last_check = ?
                         WHERE id = 1",
                    )
                    .bind(format_timestamp(now))
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| Error::DatabaseError(format!("Failed to mark build fixed: {e}")))?;

                    info!("Build marked fixed");
                    load_state(&mut *conn).await
                })
            })
            .await
    }

    /// Record a failing build without claiming it
    ///
    /// Moves `passing` to `broken` and starts the broken episode. Leaves a
    /// `broken` or `fixing` build untouched.
    pub async fn mark_broken(&self) -> Result<BuildState> {
        let now = self.clock.now();
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    ensure_row(&mut *conn).await?;
                    let next = BuildState {
                        status: BuildStatus::Broken,
                        fixer_agent_id: None,
                        broken_since: Some(now),
                        last_check: Some(now),
                    };
                    if compare_and_set(&mut *conn, BuildStatus::Passing, &next).await? {
                        info!("Build marked broken");
                    }
                    load_state(&mut *conn).await
                })
            })
            .await
    }

    /// Release the lease of a fixer that has gone quiet
    ///
    /// If the build is `fixing` and `broken_since` is at least `stale` old,
    /// the build returns to `broken` with no fixer. Otherwise nothing changes.
    pub async fn cleanup(&self, stale: Duration) -> Result<BuildState> {
        let now = self.clock.now();
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    ensure_row(&mut *conn).await?;
                    sweep_stale(conn, now, stale).await
                })
            })
            .await
    }

    /// Compare-and-set on the singleton: write `next` only if the stored
    /// status is still `expected`
    ///
    /// Returns `false` when another caller changed the status first.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if `next` breaks the record's invariants.
    pub async fn try_transition(&self, expected: BuildStatus, next: BuildState) -> Result<bool> {
        next.validate()?;
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    ensure_row(&mut *conn).await?;
                    compare_and_set(conn, expected, &next).await
                })
            })
            .await
    }
}

async fn decide(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    agent_id: &AgentId,
    options: HandleOptions,
) -> Result<BuildDecision> {
    ensure_row(&mut *conn).await?;
    let state = sweep_stale(&mut *conn, now, options.stale).await?;

    let claim = match state.status {
        BuildStatus::Fixing => {
            sqlx::query("UPDATE build_state SET last_check = ? WHERE id = 1")
                .bind(format_timestamp(now))
                .execute(&mut *conn)
                .await
                .map_err(|e| Error::DatabaseError(format!("Failed to refresh last_check: {e}")))?;

            let state = load_state(&mut *conn).await?;
            let should_fix = state.is_fixer(agent_id);
            if should_fix {
                debug!(agent = %agent_id, "Fixer checked in");
            } else {
                debug!(
                    agent = %agent_id,
                    fixer = ?state.fixer_agent_id.as_ref().map(AgentId::as_str),
                    "Build already being fixed"
                );
            }
            return Ok(decision(should_fix, options.wait, state));
        }
        BuildStatus::Passing => BuildState {
            status: BuildStatus::Fixing,
            fixer_agent_id: Some(agent_id.clone()),
            broken_since: Some(now),
            last_check: Some(now),
        },
        BuildStatus::Broken => BuildState {
            status: BuildStatus::Fixing,
            fixer_agent_id: Some(agent_id.clone()),
            broken_since: Some(state.broken_since.unwrap_or(now)),
            last_check: Some(now),
        },
    };

    let won = compare_and_set(&mut *conn, state.status, &claim).await?;
    let current = load_state(&mut *conn).await?;
    if won {
        info!(agent = %agent_id, from = %state.status, "Claimed build fix");
    } else {
        debug!(agent = %agent_id, status = %current.status, "Lost build fix claim");
    }
    Ok(decision(current.is_fixer(agent_id), options.wait, current))
}

fn decision(should_fix: bool, wait: Duration, state: BuildState) -> BuildDecision {
    BuildDecision {
        should_fix,
        wait: if should_fix { Duration::ZERO } else { wait },
        state,
    }
}

/// Revert an expired lease; returns the state the caller should act on
async fn sweep_stale(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    stale: Duration,
) -> Result<BuildState> {
    let state = load_state(&mut *conn).await?;
    if state.status != BuildStatus::Fixing {
        return Ok(state);
    }

    let stale = chrono::Duration::from_std(stale).unwrap_or(chrono::Duration::MAX);
    // A fixing row without a start time cannot prove its lease is live.
    let expired = state
        .broken_since
        .map_or(true, |since| now.signed_duration_since(since) >= stale);
    if !expired {
        return Ok(state);
    }

    let reverted = BuildState {
        status: BuildStatus::Broken,
        fixer_agent_id: None,
        broken_since: state.broken_since,
        last_check: Some(now),
    };
    if compare_and_set(&mut *conn, BuildStatus::Fixing, &reverted).await? {
        warn!(
            fixer = ?state.fixer_agent_id.as_ref().map(AgentId::as_str),
            broken_since = ?state.broken_since,
            "Fixer lease expired, build returned to broken"
        );
    }
    load_state(conn).await
}

async fn compare_and_set(
    conn: &mut SqliteConnection,
    expected: BuildStatus,
    next: &BuildState,
) -> Result<bool> {
    sqlx::query(
        "UPDATE build_state
         SET status = ?, fixer_agent_id = ?, broken_since = ?, last_check = ?
         WHERE id = 1 AND status = ?",
    )
    .bind(next.status.as_str())
    .bind(next.fixer_agent_id.as_ref().map(AgentId::as_str))
    .bind(next.broken_since.map(format_timestamp))
    .bind(next.last_check.map(format_timestamp))
    .bind(expected.as_str())
    .execute(conn)
    .await
    .map(|result| result.rows_affected() == 1)
    .map_err(|e| Error::DatabaseError(format!("Failed to update build state: {e}")))
}

async fn ensure_row<'e, E>(executor: E) -> Result<()>
where
    E: sqlx::SqliteExecutor<'e>,
{
    sqlx::query("INSERT OR IGNORE INTO build_state (id, status) VALUES (1, 'passing')")
        .execute(executor)
        .await
        .map(|_| ())
        .map_err(|e| Error::DatabaseError(format!("Failed to create build state: {e}")))
}

async fn load_state<'e, E>(executor: E) -> Result<BuildState>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let row: Option<(String, Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT status, fixer_agent_id, broken_since, last_check FROM build_state WHERE id = 1",
    )
    .fetch_optional(executor)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to read build state: {e}")))?;

    let Some((status, fixer, broken_since, last_check)) = row else {
        return Ok(BuildState::default());
    };

    Ok(BuildState {
        status: status
            .parse()
            .map_err(|_| Error::ParseError(format!("Invalid build status: {status}")))?,
        fixer_agent_id: fixer.map(AgentId::new).transpose()?,
        broken_since: parse_optional_timestamp("broken_since", broken_since.as_deref())?,
        last_check: parse_optional_timestamp("last_check", last_check.as_deref())?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;

    const MINUTE: Duration = Duration::from_secs(60);

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    async fn setup() -> Result<(BuildCoordinator, Arc<ManualClock>)> {
        let store = Store::in_memory().await?;
        let clock = Arc::new(ManualClock::new(start_time()));
        let coordinator = BuildCoordinator::with_clock(store, clock.clone());
        Ok((coordinator, clock))
    }

    fn agent(id: &str) -> Result<AgentId> {
        AgentId::new(id)
    }

    #[tokio::test]
    async fn test_get_materializes_passing_default() -> Result<()> {
        let (coordinator, _) = setup().await?;

        let state = coordinator.get().await?;
        assert_eq!(state, BuildState::default());

        // Second read sees the same row, not a new one.
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM build_state")
            .fetch_one(coordinator.store.pool())
            .await?;
        assert_eq!(count.0, 1);
        assert_eq!(coordinator.get().await?, state);
        Ok(())
    }

    #[tokio::test]
    async fn test_first_caller_claims_passing_build() -> Result<()> {
        let (coordinator, _) = setup().await?;
        let a1 = agent("A1")?;

        let decision = coordinator
            .handle_broken_build(&a1, HandleOptions::default())
            .await?;

        assert!(decision.should_fix);
        assert_eq!(decision.wait, Duration::ZERO);
        assert_eq!(decision.state.status, BuildStatus::Fixing);
        assert_eq!(decision.state.fixer_agent_id, Some(a1));
        assert_eq!(decision.state.broken_since, Some(start_time()));
        assert_eq!(decision.state.last_check, Some(start_time()));
        decision.state.validate()
    }

    #[tokio::test]
    async fn test_second_caller_waits_and_only_last_check_moves() -> Result<()> {
        let (coordinator, clock) = setup().await?;
        let a1 = agent("A1")?;
        let a2 = agent("A2")?;
        let options = HandleOptions {
            wait: 5 * MINUTE,
            stale: 15 * MINUTE,
        };

        let first = coordinator.handle_broken_build(&a1, options).await?;
        clock.advance(chrono::Duration::seconds(30));
        let second = coordinator.handle_broken_build(&a2, options).await?;

        assert!(!second.should_fix);
        assert_eq!(second.wait, 5 * MINUTE);
        assert_eq!(second.state.status, first.state.status);
        assert_eq!(second.state.fixer_agent_id, first.state.fixer_agent_id);
        assert_eq!(second.state.broken_since, first.state.broken_since);
        assert_eq!(
            second.state.last_check,
            Some(start_time() + chrono::Duration::seconds(30))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_current_fixer_is_reauthorized() -> Result<()> {
        let (coordinator, _) = setup().await?;
        let a1 = agent("A1")?;

        coordinator
            .handle_broken_build(&a1, HandleOptions::default())
            .await?;
        let again = coordinator
            .handle_broken_build(&a1, HandleOptions::default())
            .await?;

        assert!(again.should_fix);
        assert_eq!(again.state.fixer_agent_id, Some(a1));
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_fixed_resets_and_is_idempotent() -> Result<()> {
        let (coordinator, clock) = setup().await?;
        let a1 = agent("A1")?;
        coordinator
            .handle_broken_build(&a1, HandleOptions::default())
            .await?;

        clock.advance(chrono::Duration::minutes(2));
        let first = coordinator.mark_fixed().await?;
        let second = coordinator.mark_fixed().await?;

        assert_eq!(first.status, BuildStatus::Passing);
        assert_eq!(first.fixer_agent_id, None);
        assert_eq!(first.broken_since, None);
        assert_eq!(first, second);
        assert_eq!(coordinator.get().await?, second);
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_reverts_at_exact_stale_boundary() -> Result<()> {
        let (coordinator, clock) = setup().await?;
        let a1 = agent("A1")?;
        coordinator
            .handle_broken_build(&a1, HandleOptions::default())
            .await?;

        clock.advance(chrono::Duration::minutes(15));
        let state = coordinator.cleanup(15 * MINUTE).await?;

        assert_eq!(state.status, BuildStatus::Broken);
        assert_eq!(state.fixer_agent_id, None);
        assert_eq!(state.broken_since, Some(start_time()));
        assert_eq!(state.last_check, Some(clock.now()));
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_before_stale_is_noop() -> Result<()> {
        let (coordinator, clock) = setup().await?;
        let a1 = agent("A1")?;
        let claimed = coordinator
            .handle_broken_build(&a1, HandleOptions::default())
            .await?;

        clock.advance(chrono::Duration::minutes(15) - chrono::Duration::milliseconds(1));
        let state = coordinator.cleanup(15 * MINUTE).await?;

        assert_eq!(state, claimed.state);
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_ignores_passing_and_broken() -> Result<()> {
        let (coordinator, clock) = setup().await?;

        clock.advance(chrono::Duration::days(1));
        assert_eq!(coordinator.cleanup(MINUTE).await?.status, BuildStatus::Passing);

        coordinator.mark_broken().await?;
        clock.advance(chrono::Duration::days(1));
        assert_eq!(coordinator.cleanup(MINUTE).await?.status, BuildStatus::Broken);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_fixer_is_replaced_in_same_call() -> Result<()> {
        let (coordinator, clock) = setup().await?;
        let a1 = agent("A1")?;
        let a2 = agent("A2")?;
        let options = HandleOptions {
            wait: MINUTE,
            stale: 15 * MINUTE,
        };

        coordinator.handle_broken_build(&a1, options).await?;
        clock.advance(chrono::Duration::minutes(20));
        let takeover = coordinator.handle_broken_build(&a2, options).await?;

        assert!(takeover.should_fix);
        assert_eq!(takeover.state.fixer_agent_id, Some(a2));
        // Broken episode started when A1 claimed it.
        assert_eq!(takeover.state.broken_since, Some(start_time()));
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_from_broken_keeps_broken_since() -> Result<()> {
        let (coordinator, clock) = setup().await?;
        let reported = coordinator.mark_broken().await?;
        assert_eq!(reported.status, BuildStatus::Broken);
        assert_eq!(reported.broken_since, Some(start_time()));

        clock.advance(chrono::Duration::minutes(3));
        let decision = coordinator
            .handle_broken_build(&agent("A3")?, HandleOptions::default())
            .await?;

        assert!(decision.should_fix);
        assert_eq!(decision.state.broken_since, Some(start_time()));
        assert_eq!(decision.state.last_check, Some(clock.now()));
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_broken_does_not_steal_lease() -> Result<()> {
        let (coordinator, _) = setup().await?;
        let a1 = agent("A1")?;
        coordinator
            .handle_broken_build(&a1, HandleOptions::default())
            .await?;

        let state = coordinator.mark_broken().await?;
        assert_eq!(state.status, BuildStatus::Fixing);
        assert_eq!(state.fixer_agent_id, Some(a1));
        Ok(())
    }

    #[tokio::test]
    async fn test_try_transition_detects_lost_race() -> Result<()> {
        let (coordinator, clock) = setup().await?;
        coordinator.get().await?;

        let claim = |id: &str| -> Result<BuildState> {
            Ok(BuildState {
                status: BuildStatus::Fixing,
                fixer_agent_id: Some(agent(id)?),
                broken_since: Some(clock.now()),
                last_check: Some(clock.now()),
            })
        };

        assert!(coordinator.try_transition(BuildStatus::Passing, claim("A1")?).await?);
        assert!(!coordinator.try_transition(BuildStatus::Passing, claim("A2")?).await?);

        let state = coordinator.get().await?;
        assert_eq!(state.fixer_agent_id, Some(agent("A1")?));
        Ok(())
    }

    #[tokio::test]
    async fn test_try_transition_rejects_invalid_state() -> Result<()> {
        let (coordinator, _) = setup().await?;
        let orphan_fixer = BuildState {
            status: BuildStatus::Broken,
            fixer_agent_id: Some(agent("A1")?),
            broken_since: None,
            last_check: None,
        };

        let result = coordinator
            .try_transition(BuildStatus::Passing, orphan_fixer)
            .await;
        assert!(matches!(result, Err(Error::ValidationError(_))));
        assert_eq!(coordinator.get().await?, BuildState::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_fixing_without_timestamp_is_treated_as_stale() -> Result<()> {
        let (coordinator, _) = setup().await?;
        coordinator.get().await?;
        sqlx::query(
            "UPDATE build_state SET status = 'fixing', fixer_agent_id = 'ghost', broken_since = NULL WHERE id = 1",
        )
        .execute(coordinator.store.pool())
        .await?;

        let state = coordinator.cleanup(15 * MINUTE).await?;
        assert_eq!(state.status, BuildStatus::Broken);
        assert_eq!(state.fixer_agent_id, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_status_is_parse_error() -> Result<()> {
        let (coordinator, _) = setup().await?;
        coordinator.get().await?;
        sqlx::query("PRAGMA ignore_check_constraints = ON")
            .execute(coordinator.store.pool())
            .await?;
        sqlx::query("UPDATE build_state SET status = 'melting' WHERE id = 1")
            .execute(coordinator.store.pool())
            .await?;

        let result = coordinator.get().await;
        assert!(matches!(result, Err(Error::ParseError(_))));
        Ok(())
    }

    #[test]
    fn test_status_text_round_trip() {
        for status in [BuildStatus::Passing, BuildStatus::Broken, BuildStatus::Fixing] {
            assert_eq!(status.to_string(), status.as_str());
            assert_eq!(status.as_str().parse::<BuildStatus>().ok(), Some(status));
        }
    }

    /// Clock with the system clock's sub-millisecond resolution
    #[derive(Debug)]
    struct PreciseClock(std::sync::Mutex<DateTime<Utc>>);

    impl PreciseClock {
        fn new(start: DateTime<Utc>) -> Self {
            Self(std::sync::Mutex::new(start))
        }

        fn set(&self, to: DateTime<Utc>) {
            if let Ok(mut now) = self.0.lock() {
                *now = to;
            }
        }
    }

    impl Clock for PreciseClock {
        fn now(&self) -> DateTime<Utc> {
            self.0.lock().map_or(DateTime::UNIX_EPOCH, |now| *now)
        }
    }

    #[tokio::test]
    async fn test_sub_millisecond_claim_matches_store_and_is_not_expired_early() -> Result<()> {
        let claimed_at = start_time() + chrono::Duration::microseconds(900);
        let clock = Arc::new(PreciseClock::new(claimed_at));
        let coordinator = BuildCoordinator::with_clock(Store::in_memory().await?, clock.clone());
        let a1 = agent("A1")?;

        let decision = coordinator
            .handle_broken_build(&a1, HandleOptions::default())
            .await?;
        assert_eq!(decision.state.broken_since, Some(claimed_at));
        assert_eq!(coordinator.get().await?, decision.state);

        let stale = chrono::Duration::minutes(15);
        clock.set(claimed_at + stale - chrono::Duration::microseconds(500));
        let state = coordinator.cleanup(15 * MINUTE).await?;
        assert_eq!(state.status, BuildStatus::Fixing);
        assert_eq!(state.fixer_agent_id, Some(a1));

        clock.set(claimed_at + stale);
        let state = coordinator.cleanup(15 * MINUTE).await?;
        assert_eq!(state.status, BuildStatus::Broken);
        assert_eq!(state.broken_since, Some(claimed_at));
        Ok(())
    }
}
