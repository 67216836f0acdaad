//! Session lifecycle simulator
//!
//! Humans trade in bounded sessions with rests in between. Each
//! (profile, network) pair cycles Idle -> Active -> Cooldown -> Idle;
//! `Ended` is terminal and only reached at shutdown. The orchestrator
//! asks for admission before shaping anything: a non-admissible moment
//! yields an explicit "deferred until T", never a silent drop.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::jitter::Jitter;
use crate::profile::{Profile, SessionHabits};

/// Minimum rest between sessions, in minutes
const MIN_COOLDOWN_MINUTES: i64 = 5;

/// Lifecycle state of a session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Active,
    Cooldown,
    Ended,
}

/// One (profile, network) pair's session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub profile_id: String,
    pub network: String,
    pub state: SessionState,
    pub started_at: Option<DateTime<Utc>>,
    pub planned_end_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub operations_in_session: u64,
}

impl Session {
    fn new(profile_id: &str, network: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            profile_id: profile_id.to_string(),
            network: network.to_string(),
            state: SessionState::Idle,
            started_at: None,
            planned_end_at: None,
            cooldown_until: None,
            operations_in_session: 0,
        }
    }
}

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A session is active; the operation may be shaped now
    Admitted,

    /// Try again no earlier than the given time
    Deferred { until: DateTime<Utc> },
}

type PairKey = (String, String);

/// Per-pair session state machine
pub struct SessionSimulator {
    slots: DashMap<PairKey, std::sync::Arc<Mutex<Session>>>,
    jitter: Mutex<Jitter>,
}

impl SessionSimulator {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            slots: DashMap::new(),
            jitter: Mutex::new(Jitter::new(seed)),
        }
    }

    /// Check whether an operation for this profile/network pair may be
    /// parameterized at `now`, advancing the session state machine.
    pub async fn admission(&self, profile: &Profile, network: &str, now: DateTime<Utc>) -> Admission {
        let slot = self.slot(&profile.id, network);
        let mut session = slot.lock().await;

        loop {
            match session.state {
                SessionState::Ended => {
                    return Admission::Deferred {
                        until: DateTime::<Utc>::MAX_UTC,
                    };
                }
                SessionState::Idle => {
                    let hour = now.hour() as u8;
                    if !profile.session_habits.is_preferred_hour(hour) {
                        return Admission::Deferred {
                            until: next_preferred_hour(&profile.session_habits, now),
                        };
                    }
                    let length_min = {
                        let mut jitter = self.jitter.lock().await;
                        jitter.range_u64(
                            profile.session_habits.length_minutes.0,
                            profile.session_habits.length_minutes.1,
                        )
                    };
                    session.id = Uuid::new_v4().to_string();
                    session.state = SessionState::Active;
                    session.started_at = Some(now);
                    session.planned_end_at = Some(now + Duration::minutes(length_min as i64));
                    session.cooldown_until = None;
                    session.operations_in_session = 0;
                    info!(
                        profile = %profile.id,
                        network,
                        length_min,
                        "Session started"
                    );
                    return Admission::Admitted;
                }
                SessionState::Active => {
                    let planned_end = session.planned_end_at.unwrap_or(now);
                    if now < planned_end {
                        return Admission::Admitted;
                    }
                    let until = self.begin_cooldown(&mut session, &profile.session_habits, now).await;
                    return Admission::Deferred { until };
                }
                SessionState::Cooldown => {
                    let until = session.cooldown_until.unwrap_or(now);
                    if now < until {
                        return Admission::Deferred { until };
                    }
                    session.state = SessionState::Idle;
                    debug!(profile = %profile.id, network, "Cooldown over, session slot idle");
                    // Loop back into the Idle arm to re-admit immediately
                }
            }
        }
    }

    /// Count one successfully shaped operation against the active session
    pub async fn record_operation(&self, profile_id: &str, network: &str) {
        let slot = self.slot(profile_id, network);
        let mut session = slot.lock().await;
        if session.state == SessionState::Active {
            session.operations_in_session += 1;
        }
    }

    /// External stop: push an active session into cooldown at `now`
    pub async fn stop(&self, profile: &Profile, network: &str, now: DateTime<Utc>) {
        let slot = self.slot(&profile.id, network);
        let mut session = slot.lock().await;
        if session.state == SessionState::Active {
            let until = self.begin_cooldown(&mut session, &profile.session_habits, now).await;
            info!(profile = %profile.id, network, %until, "Session stopped externally");
        }
    }

    /// Terminal shutdown: every slot becomes Ended
    pub async fn shutdown(&self) {
        for entry in self.slots.iter() {
            let mut session = entry.value().lock().await;
            session.state = SessionState::Ended;
        }
        info!("Session simulator shut down");
    }

    /// Snapshot of one pair's session, for observability and tests
    pub async fn snapshot(&self, profile_id: &str, network: &str) -> Option<Session> {
        let key = (profile_id.to_string(), network.to_string());
        match self.slots.get(&key) {
            Some(slot) => Some(slot.lock().await.clone()),
            None => None,
        }
    }

    fn slot(&self, profile_id: &str, network: &str) -> std::sync::Arc<Mutex<Session>> {
        let key = (profile_id.to_string(), network.to_string());
        self.slots
            .entry(key)
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(Session::new(profile_id, network))))
            .clone()
    }

    /// Transition Active -> Cooldown, sampling the rest from the daily
    /// session budget minus time already spent active.
    async fn begin_cooldown(
        &self,
        session: &mut Session,
        habits: &SessionHabits,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let sessions_per_day = {
            let mut jitter = self.jitter.lock().await;
            jitter.range_u64(habits.sessions_per_day.0 as u64, habits.sessions_per_day.1 as u64)
        }
        .max(1);

        let active_minutes = session
            .started_at
            .map(|s| (now - s).num_minutes().max(0))
            .unwrap_or(0);
        let budget_minutes = (24 * 60) as i64 / sessions_per_day as i64;
        let rest_minutes = (budget_minutes - active_minutes).max(MIN_COOLDOWN_MINUTES);

        let until = now + Duration::minutes(rest_minutes);
        session.state = SessionState::Cooldown;
        session.cooldown_until = Some(until);
        debug!(
            profile = %session.profile_id,
            network = %session.network,
            rest_minutes,
            ops = session.operations_in_session,
            "Session resting"
        );
        until
    }
}

/// Start of the next preferred hour strictly after `now`'s hour
fn next_preferred_hour(habits: &SessionHabits, now: DateTime<Utc>) -> DateTime<Utc> {
    for offset in 1..=24i64 {
        let candidate = now + Duration::hours(offset);
        if habits.is_preferred_hour(candidate.hour() as u8) {
            return candidate
                .date_naive()
                .and_hms_opt(candidate.hour(), 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive))
                .unwrap_or(candidate);
        }
    }
    now + Duration::hours(24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::types::test_fixtures::sample_profile;

    /// A fixed instant at the given UTC hour
    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_off_hours_defer_until_next_preferred() {
        // preferred_hours = 9..=17, simulated hour = 2
        let profile = sample_profile("p");
        let sim = SessionSimulator::new(Some(42));

        let now = at_hour(2);
        match sim.admission(&profile, "mainnet", now).await {
            Admission::Deferred { until } => {
                assert_eq!(until.hour(), 9);
                assert!(until > now);
            }
            Admission::Admitted => panic!("must not admit outside preferred hours"),
        }
    }

    #[tokio::test]
    async fn test_preferred_hour_starts_session() {
        let profile = sample_profile("p");
        let sim = SessionSimulator::new(Some(42));

        let now = at_hour(10);
        assert_eq!(sim.admission(&profile, "mainnet", now).await, Admission::Admitted);

        let session = sim.snapshot("p", "mainnet").await.unwrap();
        assert_eq!(session.state, SessionState::Active);
        assert!(session.planned_end_at.unwrap() > now);
    }

    #[tokio::test]
    async fn test_session_rolls_into_cooldown() {
        let profile = sample_profile("p");
        let sim = SessionSimulator::new(Some(42));

        let start = at_hour(10);
        sim.admission(&profile, "mainnet", start).await;
        let planned_end = sim
            .snapshot("p", "mainnet")
            .await
            .unwrap()
            .planned_end_at
            .unwrap();

        let later = planned_end + Duration::minutes(1);
        match sim.admission(&profile, "mainnet", later).await {
            Admission::Deferred { until } => assert!(until > later),
            Admission::Admitted => panic!("expired session must rest first"),
        }
        assert_eq!(
            sim.snapshot("p", "mainnet").await.unwrap().state,
            SessionState::Cooldown
        );
    }

    #[tokio::test]
    async fn test_cooldown_expiry_readmits_in_preferred_hours() {
        let profile = sample_profile("p");
        let sim = SessionSimulator::new(Some(42));

        let start = at_hour(9);
        sim.admission(&profile, "mainnet", start).await;
        let planned_end = sim
            .snapshot("p", "mainnet")
            .await
            .unwrap()
            .planned_end_at
            .unwrap();

        // Expire the session, grab the cooldown end
        let resting = match sim
            .admission(&profile, "mainnet", planned_end + Duration::minutes(1))
            .await
        {
            Admission::Deferred { until } => until,
            Admission::Admitted => panic!("expected cooldown"),
        };

        // After the rest, inside preferred hours, a new session starts.
        // MIN_COOLDOWN keeps this within the same preferred window for
        // the sampled lengths under this seed.
        let retry = resting + Duration::minutes(1);
        if profile.session_habits.is_preferred_hour(retry.hour() as u8) {
            assert_eq!(
                sim.admission(&profile, "mainnet", retry).await,
                Admission::Admitted
            );
            let session = sim.snapshot("p", "mainnet").await.unwrap();
            assert_eq!(session.state, SessionState::Active);
            assert_eq!(session.operations_in_session, 0);
        }
    }

    #[tokio::test]
    async fn test_operation_counter_only_when_active() {
        let profile = sample_profile("p");
        let sim = SessionSimulator::new(Some(42));

        // Not yet started: recording is a no-op
        sim.record_operation("p", "mainnet").await;
        assert_eq!(
            sim.snapshot("p", "mainnet").await.unwrap().operations_in_session,
            0
        );

        sim.admission(&profile, "mainnet", at_hour(10)).await;
        sim.record_operation("p", "mainnet").await;
        sim.record_operation("p", "mainnet").await;
        assert_eq!(
            sim.snapshot("p", "mainnet").await.unwrap().operations_in_session,
            2
        );
    }

    #[tokio::test]
    async fn test_external_stop_forces_cooldown() {
        let profile = sample_profile("p");
        let sim = SessionSimulator::new(Some(42));

        let now = at_hour(10);
        sim.admission(&profile, "mainnet", now).await;
        sim.stop(&profile, "mainnet", now + Duration::minutes(5)).await;

        let session = sim.snapshot("p", "mainnet").await.unwrap();
        assert_eq!(session.state, SessionState::Cooldown);
        assert!(session.cooldown_until.unwrap() > now);
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal() {
        let profile = sample_profile("p");
        let sim = SessionSimulator::new(Some(42));

        sim.admission(&profile, "mainnet", at_hour(10)).await;
        sim.shutdown().await;

        match sim.admission(&profile, "mainnet", at_hour(11)).await {
            Admission::Deferred { until } => assert_eq!(until, DateTime::<Utc>::MAX_UTC),
            Admission::Admitted => panic!("ended slots must not admit"),
        }
    }

    #[tokio::test]
    async fn test_pairs_are_independent() {
        let p1 = sample_profile("p1");
        let p2 = sample_profile("p2");
        let sim = SessionSimulator::new(Some(42));

        let now = at_hour(10);
        assert_eq!(sim.admission(&p1, "mainnet", now).await, Admission::Admitted);
        assert_eq!(sim.admission(&p2, "mainnet", now).await, Admission::Admitted);
        assert_eq!(sim.admission(&p1, "base", now).await, Admission::Admitted);

        // Stopping one pair leaves the others active
        sim.stop(&p1, "mainnet", now).await;
        assert_eq!(
            sim.snapshot("p1", "mainnet").await.unwrap().state,
            SessionState::Cooldown
        );
        assert_eq!(
            sim.snapshot("p2", "mainnet").await.unwrap().state,
            SessionState::Active
        );
        assert_eq!(
            sim.snapshot("p1", "base").await.unwrap().state,
            SessionState::Active
        );
    }
}
