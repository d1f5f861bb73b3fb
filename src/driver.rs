//! Round-robin outer driver.
//!
//! Ticks each agent in index order until one pauses on a fully-approved pull
//! request, a tick fails, the stop token fires, or `max_rounds` is reached.
//! The stop token is raced against the in-flight tick, so stopping drops that
//! tick where it stands. Anything already appended stays appended.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{AgentSession, TickOutcome};
use crate::errors::TickError;

#[derive(Debug)]
pub enum DriverOutcome {
    Paused { agent: i64, pr_number: i64 },
    Stopped,
    Failed { agent: i64, error: TickError },
}

pub async fn run_round_robin(
    sessions: &mut [AgentSession],
    stop: CancellationToken,
    max_rounds: Option<usize>,
) -> DriverOutcome {
    let mut round = 0;
    loop {
        if max_rounds.is_some_and(|max| round >= max) {
            info!(rounds = round, "Round limit reached");
            return DriverOutcome::Stopped;
        }
        round += 1;
        debug!(round, "Starting round");

        let mut idle = 0;
        for session in sessions.iter_mut() {
            let agent = session.agent_index();
            let result = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    info!(agent, "Stop requested");
                    return DriverOutcome::Stopped;
                }
                result = session.tick() => result,
            };

            match result {
                Ok(TickOutcome::Paused { pr_number }) => {
                    return DriverOutcome::Paused { agent, pr_number };
                }
                Ok(TickOutcome::Idle) => idle += 1,
                Ok(TickOutcome::Continued { .. }) => {}
                Err(error) => {
                    warn!(agent, error = %error, "Stopping after failed tick");
                    return DriverOutcome::Failed { agent, error };
                }
            }
        }

        if !sessions.is_empty() && idle == sessions.len() {
            debug!(round, "Every agent idle this round");
        }
    }
}
