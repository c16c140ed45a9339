// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Steering and follow-up queues.
//!
//! A queued user message is identified by its timestamp, which is strictly
//! monotonic across both queues even when two messages arrive within one
//! clock tick.  Edits address messages by timestamp so a racing drain is
//! detected (the edit returns `false`) instead of silently rewriting a
//! message the loop already consumed.

use serde::Serialize;

use arne_model::now_millis;

/// Which queue a message sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueKind {
    /// Prepended ahead of the in-flight turn's next request.
    Steering,
    /// Appended after the current turn completes.
    FollowUp,
}

/// How many queued messages one drain consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DrainMode {
    /// Only the oldest message per boundary.
    #[default]
    OneAtATime,
    /// Everything pending at once.
    All,
}

/// An in-memory user message waiting to enter the loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedUserMessage {
    pub text: String,
    /// Strictly monotonic; doubles as the message identity.
    pub timestamp: i64,
}

/// Both user queues plus the shared monotonic clock.
#[derive(Default)]
pub struct UserQueues {
    steering: Vec<QueuedUserMessage>,
    follow_up: Vec<QueuedUserMessage>,
    mode: DrainMode,
    last_timestamp: i64,
}

impl UserQueues {
    pub fn new(mode: DrainMode) -> Self {
        Self { mode, ..Default::default() }
    }

    pub fn mode(&self) -> DrainMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: DrainMode) {
        self.mode = mode;
    }

    /// Enqueue a message; the assigned timestamp is bumped past the previous
    /// one when the wall clock has not advanced.
    pub fn push(&mut self, kind: QueueKind, text: impl Into<String>) -> i64 {
        let mut ts = now_millis();
        if ts <= self.last_timestamp {
            ts = self.last_timestamp + 1;
        }
        self.last_timestamp = ts;
        let msg = QueuedUserMessage { text: text.into(), timestamp: ts };
        self.queue_mut(kind).push(msg);
        ts
    }

    /// Replace the text of the message with this timestamp, keeping the
    /// timestamp.  Returns `false` when the loop already consumed it.
    pub fn edit(&mut self, kind: QueueKind, timestamp: i64, text: impl Into<String>) -> bool {
        match self.queue_mut(kind).iter_mut().find(|m| m.timestamp == timestamp) {
            Some(m) => {
                m.text = text.into();
                true
            }
            None => false,
        }
    }

    /// Remove exactly one message by index.  Returns `false` when the index
    /// is out of range (e.g. the queue drained concurrently).
    pub fn remove_at(&mut self, kind: QueueKind, index: usize) -> bool {
        let q = self.queue_mut(kind);
        if index < q.len() {
            q.remove(index);
            true
        } else {
            false
        }
    }

    /// Drain per the configured mode: the oldest message, or everything.
    pub fn drain(&mut self, kind: QueueKind) -> Vec<QueuedUserMessage> {
        let mode = self.mode;
        let q = self.queue_mut(kind);
        match (q.is_empty(), mode) {
            (true, _) => Vec::new(),
            (false, DrainMode::OneAtATime) => vec![q.remove(0)],
            (false, DrainMode::All) => std::mem::take(q),
        }
    }

    pub fn peek(&self, kind: QueueKind) -> &[QueuedUserMessage] {
        match kind {
            QueueKind::Steering => &self.steering,
            QueueKind::FollowUp => &self.follow_up,
        }
    }

    pub fn is_empty(&self, kind: QueueKind) -> bool {
        self.peek(kind).is_empty()
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut Vec<QueuedUserMessage> {
        match kind {
            QueueKind::Steering => &mut self.steering,
            QueueKind::FollowUp => &mut self.follow_up,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_strictly_increase_within_one_tick() {
        let mut q = UserQueues::new(DrainMode::All);
        let mut last = 0;
        for i in 0..100 {
            let ts = q.push(QueueKind::Steering, format!("m{i}"));
            assert!(ts > last, "timestamp must strictly increase");
            last = ts;
        }
    }

    #[test]
    fn timestamps_increase_across_both_queues() {
        let mut q = UserQueues::new(DrainMode::All);
        let a = q.push(QueueKind::Steering, "s");
        let b = q.push(QueueKind::FollowUp, "f");
        let c = q.push(QueueKind::Steering, "s2");
        assert!(a < b && b < c);
    }

    #[test]
    fn one_at_a_time_drains_only_the_oldest() {
        let mut q = UserQueues::new(DrainMode::OneAtATime);
        q.push(QueueKind::Steering, "first");
        q.push(QueueKind::Steering, "second");
        let drained = q.drain(QueueKind::Steering);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].text, "first");
        assert_eq!(q.peek(QueueKind::Steering).len(), 1);
    }

    #[test]
    fn all_mode_drains_everything() {
        let mut q = UserQueues::new(DrainMode::All);
        q.push(QueueKind::FollowUp, "a");
        q.push(QueueKind::FollowUp, "b");
        let drained = q.drain(QueueKind::FollowUp);
        assert_eq!(drained.len(), 2);
        assert!(q.is_empty(QueueKind::FollowUp));
    }

    #[test]
    fn edit_preserves_timestamp() {
        let mut q = UserQueues::new(DrainMode::All);
        let ts = q.push(QueueKind::Steering, "orig");
        assert!(q.edit(QueueKind::Steering, ts, "edited"));
        let msgs = q.peek(QueueKind::Steering);
        assert_eq!(msgs[0].text, "edited");
        assert_eq!(msgs[0].timestamp, ts);
    }

    #[test]
    fn edit_after_drain_returns_false() {
        let mut q = UserQueues::new(DrainMode::All);
        let ts = q.push(QueueKind::Steering, "orig");
        q.drain(QueueKind::Steering);
        assert!(!q.edit(QueueKind::Steering, ts, "too late"));
    }

    #[test]
    fn remove_at_removes_exactly_one() {
        let mut q = UserQueues::new(DrainMode::All);
        q.push(QueueKind::FollowUp, "a");
        q.push(QueueKind::FollowUp, "b");
        q.push(QueueKind::FollowUp, "c");
        assert!(q.remove_at(QueueKind::FollowUp, 1));
        let texts: Vec<&str> = q.peek(QueueKind::FollowUp).iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c"]);
        assert!(!q.remove_at(QueueKind::FollowUp, 9));
    }

    #[test]
    fn drain_empty_queue_is_empty() {
        let mut q = UserQueues::new(DrainMode::OneAtATime);
        assert!(q.drain(QueueKind::Steering).is_empty());
    }
}
