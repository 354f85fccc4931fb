use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::Session;
use crate::protocol::{CommandEnvelope, Envelope, MessageType};

/// When the coordinator pushes a command to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushSchedule {
    /// Every `period`, measured from when the session became active.
    Every(Duration),
    /// Whenever the wall-clock second is a multiple of `period_secs`. All
    /// sessions fire together.
    WallClockAligned { period_secs: u64 },
}

impl Default for PushSchedule {
    fn default() -> Self {
        Self::Every(Duration::from_secs(30))
    }
}

impl PushSchedule {
    /// Delay from `now` until the next push.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Duration {
        match *self {
            Self::Every(period) => period,
            Self::WallClockAligned { period_secs } => {
                let period_secs = period_secs.max(1);
                let period = i64::try_from(period_secs).unwrap_or(i64::MAX);
                let into_period = Duration::from_secs(now.timestamp().rem_euclid(period) as u64)
                    + Duration::from_nanos(u64::from(now.timestamp_subsec_nanos()));
                Duration::from_secs(period_secs).saturating_sub(into_period)
            }
        }
    }
}

/// The periodic command push owned by one session.
///
/// Pushes are fire-and-forget: a failed or timed-out send is logged and the
/// session carries on. The task stops when the session's periodic token is
/// cancelled.
#[derive(Debug)]
pub struct PushTask {
    session: Arc<Session>,
    handle: JoinHandle<()>,
}

impl PushTask {
    pub fn spawn(
        session: Arc<Session>,
        coordinator_id: Arc<str>,
        schedule: PushSchedule,
        write_timeout: Duration,
    ) -> Self {
        let task_session = session.clone();
        let handle = tokio::spawn(async move {
            run_push_loop(task_session, coordinator_id, schedule, write_timeout).await;
        });
        Self { session, handle }
    }

    /// Cancel the task and wait for it to finish.
    pub async fn stop(self) {
        self.session.close();
        if let Err(e) = self.handle.await {
            warn!(
                agent_id = self.session.agent_id(),
                "Push task ended abnormally: {}", e
            );
        }
    }
}

async fn run_push_loop(
    session: Arc<Session>,
    coordinator_id: Arc<str>,
    schedule: PushSchedule,
    write_timeout: Duration,
) {
    let token = session.periodic_token();
    // A fixed period ticks from session start, so slow sends do not shift it.
    let mut ticker = match schedule {
        PushSchedule::Every(period) => {
            let period = period.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(interval)
        }
        PushSchedule::WallClockAligned { .. } => None,
    };

    loop {
        let next_push = async {
            match ticker.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => tokio::time::sleep(schedule.next_delay(Utc::now())).await,
            }
        };
        tokio::select! {
            () = token.cancelled() => break,
            () = next_push => {}
        }

        let command = CommandEnvelope::probe(session.agent_id());
        let content = match command.to_json() {
            Ok(content) => content,
            Err(e) => {
                warn!(agent_id = session.agent_id(), "Failed to encode command: {}", e);
                continue;
            }
        };
        let envelope = Envelope::new(coordinator_id.as_ref(), MessageType::Command, content);

        tokio::select! {
            () = token.cancelled() => break,
            result = session.send_timeout(&envelope, write_timeout) => match result {
                Ok(()) => debug!(
                    agent_id = session.agent_id(),
                    command_id = %command.command_id,
                    "Pushed command"
                ),
                Err(e) => warn!(
                    agent_id = session.agent_id(),
                    command_id = %command.command_id,
                    "Failed to push command: {}", e
                ),
            }
        }
    }
    debug!(agent_id = session.agent_id(), "Push task stopped");
}
