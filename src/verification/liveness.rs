//! Face-liveness checks.
//!
//! A client asks for a challenge (a shuffled sequence of gestures), records
//! per-frame landmark metrics while the person performs it, and submits the
//! frames with the check-in. [`LivenessMachine`] replays those frames and
//! decides whether every gesture was performed in order and in time.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Gesture {
    Blink,
    TurnLeft,
    TurnRight,
}

impl Gesture {
    pub const ALL: [Gesture; 3] = [Gesture::Blink, Gesture::TurnLeft, Gesture::TurnRight];

    pub fn prompt(&self) -> &'static str {
        match self {
            Gesture::Blink => "Blink your eyes",
            Gesture::TurnLeft => "Turn your head left",
            Gesture::TurnRight => "Turn your head right",
        }
    }
}

/// Landmark metrics of one video frame.
///
/// `left_ear` / `right_ear` are eye aspect ratios; `yaw` is the normalized
/// head yaw, negative when the head turns left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSample {
    pub t_ms: u64,
    pub left_ear: f64,
    pub right_ear: f64,
    pub yaw: f64,
}

impl FrameSample {
    fn mean_ear(&self) -> f64 {
        (self.left_ear + self.right_ear) / 2.0
    }

    fn is_valid(&self) -> bool {
        self.left_ear.is_finite() && self.right_ear.is_finite() && self.yaw.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub closed_ear: f64,
    pub open_ear: f64,
    pub turn_yaw: f64,
    pub neutral_yaw: f64,
    pub step_timeout_ms: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            closed_ear: 0.21,
            open_ear: 0.27,
            turn_yaw: 0.35,
            neutral_yaw: 0.15,
            step_timeout_ms: 8_000,
        }
    }
}

impl Thresholds {
    pub fn from_config() -> Self {
        Self {
            step_timeout_ms: config::config().attendance.liveness_step_timeout_ms,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LivenessFailure {
    #[error("Liveness check failed: head turned the wrong way (expected {expected:?})")]
    WrongDirection { expected: Gesture },

    #[error("Liveness check timed out waiting for {0:?}")]
    StepTimeout(Gesture),

    #[error("Liveness frames are out of order")]
    OutOfOrder,

    #[error("Liveness frame contains invalid values")]
    InvalidSample,

    #[error("Liveness check incomplete: {completed} of {required} gestures performed")]
    Incomplete { completed: usize, required: usize },

    #[error("Liveness challenge not found or expired")]
    UnknownChallenge,

    #[error("Liveness check failed. Please try again.")]
    ScoreTooLow { score: f64, threshold: f64 },

    #[error("Liveness verification is required")]
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the neutral pose the gesture starts from.
    Idle,
    Armed,
    /// Eyes closed during a blink.
    Engaged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    InProgress,
    Complete,
}

#[derive(Debug, Clone)]
pub struct LivenessMachine {
    sequence: Vec<Gesture>,
    thresholds: Thresholds,
    current: usize,
    phase: Phase,
    step_started_ms: Option<u64>,
    last_ms: Option<u64>,
}

impl LivenessMachine {
    pub fn new(sequence: Vec<Gesture>, thresholds: Thresholds) -> Self {
        Self {
            sequence,
            thresholds,
            current: 0,
            phase: Phase::Idle,
            step_started_ms: None,
            last_ms: None,
        }
    }

    pub fn completed(&self) -> usize {
        self.current
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.sequence.len()
    }

    pub fn feed(&mut self, frame: FrameSample) -> Result<Progress, LivenessFailure> {
        if !frame.is_valid() {
            return Err(LivenessFailure::InvalidSample);
        }
        if matches!(self.last_ms, Some(last) if frame.t_ms < last) {
            return Err(LivenessFailure::OutOfOrder);
        }
        self.last_ms = Some(frame.t_ms);

        let Some(&gesture) = self.sequence.get(self.current) else {
            return Ok(Progress::Complete);
        };

        let started = *self.step_started_ms.get_or_insert(frame.t_ms);
        if frame.t_ms - started > self.thresholds.step_timeout_ms {
            return Err(LivenessFailure::StepTimeout(gesture));
        }

        let done = match gesture {
            Gesture::Blink => self.blink(frame),
            Gesture::TurnLeft | Gesture::TurnRight => self.turn(gesture, frame)?,
        };

        if done {
            self.current += 1;
            self.phase = Phase::Idle;
            self.step_started_ms = Some(frame.t_ms);
        }

        Ok(if self.is_complete() {
            Progress::Complete
        } else {
            Progress::InProgress
        })
    }

    fn blink(&mut self, frame: FrameSample) -> bool {
        let ear = frame.mean_ear();
        let t = &self.thresholds;
        match self.phase {
            Phase::Idle if ear >= t.open_ear => self.phase = Phase::Armed,
            Phase::Armed if ear < t.closed_ear => self.phase = Phase::Engaged,
            Phase::Engaged if ear >= t.open_ear => return true,
            _ => {}
        }
        false
    }

    fn turn(&mut self, gesture: Gesture, frame: FrameSample) -> Result<bool, LivenessFailure> {
        let t = &self.thresholds;
        match self.phase {
            Phase::Idle => {
                if frame.yaw.abs() < t.neutral_yaw {
                    self.phase = Phase::Armed;
                }
                Ok(false)
            }
            _ => {
                let turned = if frame.yaw <= -t.turn_yaw {
                    Some(Gesture::TurnLeft)
                } else if frame.yaw >= t.turn_yaw {
                    Some(Gesture::TurnRight)
                } else {
                    None
                };
                match turned {
                    Some(g) if g == gesture => Ok(true),
                    Some(_) => Err(LivenessFailure::WrongDirection { expected: gesture }),
                    None => Ok(false),
                }
            }
        }
    }
}

/// Runs every frame through a fresh machine; all gestures must complete.
pub fn replay(
    sequence: &[Gesture],
    thresholds: Thresholds,
    frames: &[FrameSample],
) -> Result<(), LivenessFailure> {
    let mut machine = LivenessMachine::new(sequence.to_vec(), thresholds);
    for frame in frames {
        if machine.feed(*frame)? == Progress::Complete {
            return Ok(());
        }
    }
    if machine.is_complete() {
        Ok(())
    } else {
        Err(LivenessFailure::Incomplete {
            completed: machine.completed(),
            required: sequence.len(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub owner: Uuid,
    pub sequence: Vec<Gesture>,
    /// What to show the user for each step of `sequence`.
    pub prompts: Vec<&'static str>,
    pub expires_at: DateTime<Utc>,
}

/// Issued challenges, each handed back exactly once to its owner.
pub struct ChallengeRegistry {
    ttl: Duration,
    challenges: RwLock<HashMap<Uuid, Challenge>>,
}

impl ChallengeRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            challenges: RwLock::new(HashMap::new()),
        }
    }

    pub async fn issue(&self, owner: Uuid, now: DateTime<Utc>) -> Challenge {
        let mut sequence = Gesture::ALL.to_vec();
        sequence.shuffle(&mut rand::thread_rng());

        let challenge = Challenge {
            id: Uuid::new_v4(),
            owner,
            prompts: sequence.iter().map(Gesture::prompt).collect(),
            sequence,
            expires_at: now + self.ttl,
        };

        let mut challenges = self.challenges.write().await;
        challenges.retain(|_, c| c.expires_at > now);
        challenges.insert(challenge.id, challenge.clone());
        challenge
    }

    pub async fn take(&self, id: Uuid, owner: Uuid, now: DateTime<Utc>) -> Result<Challenge, LivenessFailure> {
        let mut challenges = self.challenges.write().await;
        match challenges.get(&id) {
            Some(c) if c.owner == owner => {}
            _ => return Err(LivenessFailure::UnknownChallenge),
        }
        match challenges.remove(&id) {
            Some(c) if c.expires_at > now => Ok(c),
            _ => Err(LivenessFailure::UnknownChallenge),
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.challenges.read().await.len()
    }
}

static REGISTRY: Lazy<ChallengeRegistry> = Lazy::new(|| {
    let ttl = config::config().attendance.liveness_challenge_ttl_secs;
    ChallengeRegistry::new(Duration::seconds(ttl as i64))
});

pub fn registry() -> &'static ChallengeRegistry {
    &REGISTRY
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// What a single-frame face detector reported about the capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSummary {
    pub score: f64,
    #[serde(rename = "box")]
    pub face_box: FaceBox,
    #[serde(default)]
    pub expressions: Option<HashMap<String, f64>>,
    /// Horizontal face-box positions over the capture window.
    #[serde(default)]
    pub sample_xs: Vec<f64>,
}

const MIN_FACE_AREA: f64 = 10_000.0;

/// Heuristic liveness score in `[0, 1]` from detector output.
pub fn score_detection(d: &DetectionSummary) -> f64 {
    let mut score = d.score.clamp(0.0, 1.0) * 0.4;

    let area = d.face_box.width * d.face_box.height;
    score += (area / MIN_FACE_AREA).clamp(0.0, 1.0) * 0.2;

    if let Some(expressions) = &d.expressions {
        let variety = expressions.values().filter(|v| **v > 0.1).count() as f64;
        score += (variety / 3.0).min(1.0) * 0.15;

        let dominant = expressions.values().cloned().fold(f64::NEG_INFINITY, f64::max);
        let neutral = expressions.get("neutral").copied().unwrap_or(0.0);
        if neutral > 0.3 || dominant > 0.5 {
            score += 0.1;
        }
    }

    if d.sample_xs.len() >= 2 {
        let n = d.sample_xs.len() as f64;
        let mean = d.sample_xs.iter().sum::<f64>() / n;
        let spread = d.sample_xs.iter().map(|x| (x - mean).abs()).sum::<f64>() / n;
        let movement = if spread > 2.0 && spread < 50.0 { 1.0 } else { 0.5 };
        score += movement * 0.15;
    } else {
        score += 0.1;
    }

    score.min(1.0)
}

/// Challenge response submitted with a check-in.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub challenge_id: Uuid,
    pub frames: Vec<FrameSample>,
}

/// Every form of liveness evidence a check-in may carry.
#[derive(Debug, Clone, Default)]
pub struct LivenessEvidence {
    pub challenge: Option<ChallengeResponse>,
    pub score: Option<f64>,
    pub detection: Option<DetectionSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessPolicy {
    pub threshold: f64,
    pub required: bool,
    pub thresholds: Thresholds,
}

impl LivenessPolicy {
    pub fn from_config() -> Self {
        let a = &config::config().attendance;
        Self {
            threshold: a.liveness_threshold,
            required: a.require_liveness,
            thresholds: Thresholds::from_config(),
        }
    }

    /// Decides on the strongest evidence present. Returns the score to
    /// store with the attendance record, if any.
    pub async fn evaluate(
        &self,
        registry: &ChallengeRegistry,
        owner: Uuid,
        evidence: &LivenessEvidence,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>, LivenessFailure> {
        if let Some(response) = &evidence.challenge {
            let challenge = registry.take(response.challenge_id, owner, now).await?;
            replay(&challenge.sequence, self.thresholds, &response.frames)?;
            return Ok(Some(1.0));
        }

        let score = match (evidence.score, &evidence.detection) {
            (Some(s), _) => Some(s),
            (None, Some(d)) => Some(score_detection(d)),
            (None, None) => None,
        };

        match score {
            Some(s) if !s.is_finite() || s < self.threshold => Err(LivenessFailure::ScoreTooLow {
                score: s,
                threshold: self.threshold,
            }),
            Some(s) => Ok(Some(s)),
            None if self.required => Err(LivenessFailure::Missing),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(t_ms: u64, ear: f64, yaw: f64) -> FrameSample {
        FrameSample { t_ms, left_ear: ear, right_ear: ear, yaw }
    }

    fn blink_frames(start: u64) -> Vec<FrameSample> {
        vec![frame(start, 0.30, 0.0), frame(start + 100, 0.15, 0.0), frame(start + 200, 0.30, 0.0)]
    }

    fn turn_frames(start: u64, yaw: f64) -> Vec<FrameSample> {
        vec![frame(start, 0.30, 0.0), frame(start + 100, 0.30, yaw)]
    }

    #[test]
    fn completes_full_sequence() {
        let seq = vec![Gesture::Blink, Gesture::TurnLeft, Gesture::TurnRight];
        let mut frames = blink_frames(0);
        frames.extend(turn_frames(300, -0.5));
        frames.extend(turn_frames(500, 0.5));
        assert_eq!(replay(&seq, Thresholds::default(), &frames), Ok(()));
    }

    #[test]
    fn blink_needs_eyes_open_first() {
        let seq = vec![Gesture::Blink];
        // Starts closed: the first close does not count until eyes have opened.
        let frames = vec![frame(0, 0.15, 0.0), frame(100, 0.30, 0.0)];
        assert_eq!(
            replay(&seq, Thresholds::default(), &frames),
            Err(LivenessFailure::Incomplete { completed: 0, required: 1 })
        );
    }

    #[test]
    fn wrong_turn_direction_fails() {
        let seq = vec![Gesture::TurnLeft];
        let frames = turn_frames(0, 0.5);
        assert_eq!(
            replay(&seq, Thresholds::default(), &frames),
            Err(LivenessFailure::WrongDirection { expected: Gesture::TurnLeft })
        );
    }

    #[test]
    fn turn_requires_neutral_start() {
        let seq = vec![Gesture::TurnRight];
        let frames = vec![frame(0, 0.3, 0.5), frame(100, 0.3, 0.6)];
        assert!(matches!(
            replay(&seq, Thresholds::default(), &frames),
            Err(LivenessFailure::Incomplete { .. })
        ));
    }

    #[test]
    fn slow_step_times_out() {
        let seq = vec![Gesture::Blink];
        let frames = vec![frame(0, 0.30, 0.0), frame(9_000, 0.15, 0.0)];
        assert_eq!(
            replay(&seq, Thresholds::default(), &frames),
            Err(LivenessFailure::StepTimeout(Gesture::Blink))
        );
    }

    #[test]
    fn timestamps_must_not_go_backwards() {
        let seq = vec![Gesture::Blink];
        let frames = vec![frame(100, 0.30, 0.0), frame(50, 0.15, 0.0)];
        assert_eq!(replay(&seq, Thresholds::default(), &frames), Err(LivenessFailure::OutOfOrder));
    }

    #[test]
    fn rejects_non_finite_frame() {
        let mut machine = LivenessMachine::new(vec![Gesture::Blink], Thresholds::default());
        assert_eq!(machine.feed(frame(0, f64::NAN, 0.0)), Err(LivenessFailure::InvalidSample));
    }

    #[test]
    fn detection_score_matches_heuristic() {
        let summary = DetectionSummary {
            score: 1.0,
            face_box: FaceBox { x: 10.0, y: 10.0, width: 200.0, height: 200.0 },
            expressions: Some(HashMap::from([
                ("neutral".to_string(), 0.9),
                ("happy".to_string(), 0.05),
            ])),
            sample_xs: vec![],
        };
        // 0.4 + 0.2 + 0.05 + 0.1 + 0.1
        assert!((score_detection(&summary) - 0.85).abs() < 1e-9);

        let photo = DetectionSummary {
            score: 0.5,
            face_box: FaceBox { x: 0.0, y: 0.0, width: 50.0, height: 50.0 },
            expressions: None,
            sample_xs: vec![10.0, 10.0, 10.0],
        };
        // 0.2 + 0.05 + 0.075
        assert!((score_detection(&photo) - 0.325).abs() < 1e-9);
    }

    #[tokio::test]
    async fn challenge_is_single_use_and_owner_bound() {
        let registry = ChallengeRegistry::new(Duration::seconds(60));
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let challenge = registry.issue(owner, now).await;
        assert_eq!(challenge.sequence.len(), 3);
        let json = serde_json::to_value(&challenge).unwrap();
        assert!(json.get("owner").is_none());
        assert_eq!(json["prompts"][0], challenge.sequence[0].prompt());

        assert_eq!(
            registry.take(challenge.id, Uuid::new_v4(), now).await.unwrap_err(),
            LivenessFailure::UnknownChallenge
        );
        assert!(registry.take(challenge.id, owner, now).await.is_ok());
        assert!(registry.take(challenge.id, owner, now).await.is_err());
    }

    #[tokio::test]
    async fn expired_challenge_is_rejected_and_purged() {
        let registry = ChallengeRegistry::new(Duration::seconds(10));
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let stale = registry.issue(owner, now).await;

        let later = now + Duration::seconds(11);
        assert!(registry.take(stale.id, owner, later).await.is_err());

        registry.issue(owner, now).await;
        registry.issue(owner, later + Duration::seconds(11)).await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn policy_prefers_challenge_then_score() {
        let registry = ChallengeRegistry::new(Duration::seconds(60));
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let policy = LivenessPolicy { threshold: 0.8, required: true, thresholds: Thresholds::default() };

        let challenge = registry.issue(owner, now).await;
        let mut frames = Vec::new();
        let mut t = 0;
        for g in &challenge.sequence {
            let chunk = match g {
                Gesture::Blink => blink_frames(t),
                Gesture::TurnLeft => turn_frames(t, -0.5),
                Gesture::TurnRight => turn_frames(t, 0.5),
            };
            frames.extend(chunk);
            t += 1_000;
        }
        let evidence = LivenessEvidence {
            challenge: Some(ChallengeResponse { challenge_id: challenge.id, frames }),
            score: Some(0.1),
            detection: None,
        };
        assert_eq!(policy.evaluate(&registry, owner, &evidence, now).await, Ok(Some(1.0)));

        let low = LivenessEvidence { score: Some(0.5), ..Default::default() };
        assert!(matches!(
            policy.evaluate(&registry, owner, &low, now).await,
            Err(LivenessFailure::ScoreTooLow { .. })
        ));

        let none = LivenessEvidence::default();
        assert_eq!(policy.evaluate(&registry, owner, &none, now).await, Err(LivenessFailure::Missing));

        let lenient = LivenessPolicy { required: false, ..policy };
        assert_eq!(lenient.evaluate(&registry, owner, &none, now).await, Ok(None));
    }
}
