//! New-mail change detection
//!
//! Decides, from one folder listing and the previously persisted
//! [`TrackingState`], which messages are new and what state to persist next.
//! Pure and synchronous; the poller owns all I/O.
//!
//! A tracking unit moves from uninitialized to tracking on its first poll,
//! which records a silent baseline, and stays tracking afterwards.

use std::cmp::Reverse;
use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::mailbox::MessageSummary;

/// Number of recently seen ids remembered per tracking unit
pub const TRACKING_CAPACITY: usize = 500;

/// Persisted tracking state for one (account, folder) pair
///
/// `known_ids` is ordered most-recent-first, holds no duplicates and never
/// exceeds the detector capacity. The default value means "never polled".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TrackingState {
    /// Whether a baseline has been recorded
    pub initialized: bool,
    /// Ids seen in the latest listing, newest first
    pub known_ids: Vec<String>,
}

/// Outcome of a single [`ChangeDetector::decide`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollDecision {
    /// Messages to surface, newest first
    pub emit: Vec<MessageSummary>,
    /// State to persist after this poll
    pub next_state: TrackingState,
}

/// Stateless decision function with a fixed capacity window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeDetector {
    capacity: usize,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(TRACKING_CAPACITY)
    }
}

impl ChangeDetector {
    /// Create a detector remembering at most `capacity` ids
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Capacity window of this detector
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Decide which messages of `current` are new relative to `state`
    ///
    /// `current` must be in listing order, newest first: the next state keeps
    /// the leading ids of that order when it exceeds capacity. `limit` caps
    /// the number of emitted messages and must be at least 1.
    ///
    /// - Uninitialized state: emits nothing and baselines the listing.
    /// - No unknown ids: emits nothing and returns `state` unchanged.
    /// - Otherwise: emits the unknown messages newest first (missing received
    ///   time sorts oldest, ties keep listing order), truncated to `limit`,
    ///   and resynchronises the known ids to the whole listing.
    pub fn decide(
        &self,
        current: &[MessageSummary],
        state: &TrackingState,
        limit: usize,
    ) -> PollDecision {
        if !state.initialized {
            return PollDecision {
                emit: Vec::new(),
                next_state: self.resync(current),
            };
        }

        let known: HashSet<&str> = state.known_ids.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        let mut fresh: Vec<&MessageSummary> = current
            .iter()
            .filter(|m| !known.contains(m.id.as_str()) && seen.insert(m.id.as_str()))
            .collect();

        if fresh.is_empty() {
            return PollDecision {
                emit: Vec::new(),
                next_state: state.clone(),
            };
        }

        // `sort_by_key` is stable, so equal timestamps keep listing order.
        fresh.sort_by_key(|m| Reverse(m.received_at));
        let emit = fresh.into_iter().take(limit).cloned().collect();

        PollDecision {
            emit,
            next_state: self.resync(current),
        }
    }

    fn resync(&self, current: &[MessageSummary]) -> TrackingState {
        TrackingState {
            initialized: true,
            known_ids: take_most_recent(current.iter().map(|m| m.id.as_str()), self.capacity),
        }
    }
}

/// Deduplicate `ids` preserving order and keep the first `capacity` entries
///
/// The input must already be newest first, so truncation drops the oldest.
pub fn take_most_recent<'a>(ids: impl IntoIterator<Item = &'a str>, capacity: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(*id))
        .take(capacity)
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::{ChangeDetector, TRACKING_CAPACITY, TrackingState, take_most_recent};
    use crate::mailbox::MessageSummary;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
    }

    /// Listing whose received times descend with position
    fn listing(ids: &[&str]) -> Vec<MessageSummary> {
        let len = ids.len() as i64;
        ids.iter()
            .enumerate()
            .map(|(i, id)| MessageSummary::new(*id, at(len - i as i64)))
            .collect()
    }

    fn ids(messages: &[MessageSummary]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    fn tracking(known: &[&str]) -> TrackingState {
        TrackingState {
            initialized: true,
            known_ids: known.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[test]
    fn bootstrap_poll_emits_nothing_and_records_baseline() {
        let detector = ChangeDetector::default();
        let current = listing(&["c", "b", "a"]);

        let decision = detector.decide(&current, &TrackingState::default(), 10);

        assert!(decision.emit.is_empty());
        assert_eq!(decision.next_state, tracking(&["c", "b", "a"]));
    }

    #[test]
    fn bootstrap_poll_of_empty_folder_still_initializes() {
        let decision = ChangeDetector::default().decide(&[], &TrackingState::default(), 10);

        assert!(decision.emit.is_empty());
        assert!(decision.next_state.initialized);
        assert!(decision.next_state.known_ids.is_empty());
    }

    #[test]
    fn known_listing_emits_nothing_and_keeps_state() {
        let state = tracking(&["d", "c", "b", "a"]);
        let current = listing(&["c", "b"]);

        let decision = ChangeDetector::default().decide(&current, &state, 10);

        assert!(decision.emit.is_empty());
        assert_eq!(decision.next_state, state);
    }

    #[test]
    fn new_message_is_detected_exactly_once() {
        let detector = ChangeDetector::default();
        let state = tracking(&["b", "a"]);
        let current = listing(&["y", "b", "a"]);

        let first = detector.decide(&current, &state, 10);
        assert_eq!(ids(&first.emit), ["y"]);

        let second = detector.decide(&current, &first.next_state, 10);
        assert!(second.emit.is_empty());
        assert_eq!(second.next_state, first.next_state);
    }

    #[test]
    fn decide_is_idempotent_for_identical_input() {
        let detector = ChangeDetector::new(3);
        let state = tracking(&["b", "a"]);
        let current = listing(&["d", "c", "b", "a"]);

        let first = detector.decide(&current, &state, 1);
        let second = detector.decide(&current, &state, 1);

        assert_eq!(first, second);
    }

    #[test]
    fn emits_newest_first_by_received_time() {
        let current = vec![
            MessageSummary::new("a", at(10)),
            MessageSummary::new("b", at(30)),
        ];

        let decision = ChangeDetector::default().decide(&current, &tracking(&[]), 10);

        assert_eq!(ids(&decision.emit), ["b", "a"]);
    }

    #[test]
    fn ties_keep_listing_order_and_missing_time_sorts_last() {
        let current = vec![
            MessageSummary::new("undated", None),
            MessageSummary::new("first", at(5)),
            MessageSummary::new("second", at(5)),
            MessageSummary::new("newest", at(9)),
        ];

        let decision = ChangeDetector::default().decide(&current, &tracking(&[]), 10);

        assert_eq!(ids(&decision.emit), ["newest", "first", "second", "undated"]);
    }

    #[test]
    fn undated_message_is_still_emitted_when_unknown() {
        let current = vec![
            MessageSummary::new("known", at(5)),
            MessageSummary::new("undated", None),
        ];

        let decision = ChangeDetector::default().decide(&current, &tracking(&["known"]), 10);

        assert_eq!(ids(&decision.emit), ["undated"]);
    }

    #[test]
    fn capacity_three_scenario_across_two_polls() {
        let detector = ChangeDetector::new(3);

        let poll1 = detector.decide(&listing(&["1", "2", "3", "4"]), &TrackingState::default(), 10);
        assert!(poll1.emit.is_empty());
        assert_eq!(poll1.next_state, tracking(&["1", "2", "3"]));

        let poll2 = detector.decide(&listing(&["0", "1", "2", "3"]), &poll1.next_state, 10);
        assert_eq!(ids(&poll2.emit), ["0"]);
        assert_eq!(poll2.next_state, tracking(&["0", "1", "2"]));
    }

    #[test]
    fn limit_truncates_emit_but_not_known_ids() {
        let state = tracking(&["old"]);
        let current = listing(&["c", "b", "a", "old"]);

        let decision = ChangeDetector::default().decide(&current, &state, 2);

        assert_eq!(ids(&decision.emit), ["c", "b"]);
        assert_eq!(decision.next_state, tracking(&["c", "b", "a", "old"]));
    }

    #[test]
    fn known_ids_never_exceed_capacity() {
        let detector = ChangeDetector::new(4);
        let mut state = TrackingState::default();
        let mut next_id = 0_u32;

        for poll in 0..20 {
            let names: Vec<String> = (0..(poll % 7 + 3))
                .map(|_| {
                    next_id += 1;
                    format!("m{next_id}")
                })
                .collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();

            let decision = detector.decide(&listing(&refs), &state, 2);
            assert!(decision.next_state.known_ids.len() <= detector.capacity());
            assert!(decision.emit.len() <= 2);
            state = decision.next_state;
        }
    }

    #[test]
    fn duplicate_ids_in_listing_are_emitted_once() {
        let current = listing(&["x", "x", "a"]);

        let decision = ChangeDetector::default().decide(&current, &tracking(&["a"]), 10);

        assert_eq!(ids(&decision.emit), ["x"]);
        assert_eq!(decision.next_state, tracking(&["x", "a"]));
    }

    #[test]
    fn take_most_recent_dedups_then_truncates() {
        assert_eq!(take_most_recent(["a", "b", "a", "c"], 10), ["a", "b", "c"]);
        assert_eq!(take_most_recent(["a", "a", "b", "c"], 2), ["a", "b"]);
        assert!(take_most_recent(Vec::<&str>::new(), 3).is_empty());
    }

    #[test]
    fn default_detector_uses_five_hundred_slots() {
        let names: Vec<String> = (0..600).map(|i| format!("id{i}")).collect();
        let current: Vec<_> = names.iter().map(|n| MessageSummary::new(n.as_str(), None)).collect();

        let decision = ChangeDetector::default().decide(&current, &TrackingState::default(), 10);

        assert_eq!(decision.next_state.known_ids.len(), TRACKING_CAPACITY);
        assert_eq!(decision.next_state.known_ids[0], "id0");
        assert_eq!(decision.next_state.known_ids[499], "id499");
    }
}
