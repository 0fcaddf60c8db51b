//! Build command implementation
//!
//! Thin layer over [`BuildCoordinator`]: runs one action and returns a
//! serializable report for the handler to print.

use std::time::Duration;

use anyhow::Result;
use baton_core::{AgentId, BuildCoordinator, BuildState, BuildStatus, HandleOptions};
use serde::Serialize;

/// What `baton build` was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildAction {
    Status,
    Broken,
    Fix { agent: AgentId },
    Fixed,
    Cleanup { stale: Option<Duration> },
}

/// Result of a build action
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub action: &'static str,
    /// Only set by `fix`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_fix: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<u64>,
    pub state: BuildState,
}

impl BuildReport {
    fn state(action: &'static str, state: BuildState) -> Self {
        Self {
            action,
            should_fix: None,
            wait_ms: None,
            state,
        }
    }

    /// The caller asked to fix and someone else holds the lease
    pub fn must_wait(&self) -> bool {
        self.should_fix == Some(false)
    }
}

/// Run the build command
///
/// # Errors
///
/// Returns an error if the store fails
pub async fn run(
    action: BuildAction,
    coordinator: &BuildCoordinator,
    options: HandleOptions,
) -> Result<BuildReport> {
    let report = match action {
        BuildAction::Status => BuildReport::state("status", coordinator.get().await?),
        BuildAction::Broken => BuildReport::state("broken", coordinator.mark_broken().await?),
        BuildAction::Fixed => BuildReport::state("fixed", coordinator.mark_fixed().await?),
        BuildAction::Cleanup { stale } => BuildReport::state(
            "cleanup",
            coordinator.cleanup(stale.unwrap_or(options.stale)).await?,
        ),
        BuildAction::Fix { agent } => {
            let decision = coordinator.handle_broken_build(&agent, options).await?;
            BuildReport {
                action: "fix",
                should_fix: Some(decision.should_fix),
                wait_ms: Some(u64::try_from(decision.wait.as_millis()).unwrap_or(u64::MAX)),
                state: decision.state,
            }
        }
    };
    Ok(report)
}

/// Human-readable rendering
pub fn render(report: &BuildReport) -> String {
    let state = &report.state;
    let mut lines = Vec::new();

    match report.should_fix {
        Some(true) => lines.push("You hold the lease: fix the build.".to_string()),
        Some(false) => {
            let holder = state.fixer_agent_id.as_ref().map_or("another agent", AgentId::as_str);
            lines.push(format!(
                "{holder} is fixing the build. Retry in {}s.",
                report.wait_ms.unwrap_or(0) / 1000
            ));
        }
        None => {}
    }

    lines.push(format!("Build:        {}", state.status));
    if state.status == BuildStatus::Fixing {
        if let Some(fixer) = &state.fixer_agent_id {
            lines.push(format!("Fixer:        {fixer}"));
        }
    }
    if let Some(since) = state.broken_since {
        lines.push(format!("Broken since: {}", since.to_rfc3339()));
    }
    if let Some(checked) = state.last_check {
        lines.push(format!("Last check:   {}", checked.to_rfc3339()));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use baton_core::{ManualClock, Store};
    use chrono::{TimeZone, Utc};

    use super::*;

    async fn coordinator() -> Result<(BuildCoordinator, Arc<ManualClock>)> {
        let start = Utc
            .with_ymd_and_hms(2025, 6, 1, 9, 0, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("bad start time"))?;
        let clock = Arc::new(ManualClock::new(start));
        let store = Store::in_memory().await?;
        Ok((BuildCoordinator::with_clock(store, clock.clone()), clock))
    }

    #[tokio::test]
    async fn test_fix_then_second_agent_waits() -> Result<()> {
        let (coordinator, _clock) = coordinator().await?;
        let options = HandleOptions {
            wait: Duration::from_secs(30),
            stale: Duration::from_secs(900),
        };

        let first = run(
            BuildAction::Fix { agent: AgentId::new("agent-a")? },
            &coordinator,
            options,
        )
        .await?;
        assert_eq!(first.should_fix, Some(true));
        assert_eq!(first.wait_ms, Some(0));
        assert!(render(&first).contains("You hold the lease"));

        let second = run(
            BuildAction::Fix { agent: AgentId::new("agent-b")? },
            &coordinator,
            options,
        )
        .await?;
        assert!(second.must_wait());
        assert_eq!(second.wait_ms, Some(30_000));
        assert!(render(&second).contains("agent-a is fixing the build. Retry in 30s."));
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_uses_configured_stale_by_default() -> Result<()> {
        let (coordinator, clock) = coordinator().await?;
        let options = HandleOptions {
            wait: Duration::from_secs(30),
            stale: Duration::from_secs(60),
        };
        run(
            BuildAction::Fix { agent: AgentId::new("agent-a")? },
            &coordinator,
            options,
        )
        .await?;

        clock.advance(chrono::Duration::seconds(61));
        let report = run(BuildAction::Cleanup { stale: None }, &coordinator, options).await?;
        assert_eq!(report.state.status, BuildStatus::Broken);
        assert_eq!(report.state.fixer_agent_id, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_status_json_omits_fix_fields() -> Result<()> {
        let (coordinator, _clock) = coordinator().await?;
        let report = run(BuildAction::Status, &coordinator, HandleOptions::default()).await?;
        let json = serde_json::to_value(&report)?;
        assert_eq!(json["action"], "status");
        assert_eq!(json["state"]["status"], "passing");
        assert!(json.get("should_fix").is_none());
        Ok(())
    }
}
