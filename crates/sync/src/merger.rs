//! Message merger: the single writer of a conversation's transcript.
//!
//! Every insert is keyed by message id. The first accepted copy of an id
//! wins and keeps its position; later copies are dropped. Until the history
//! batch has been applied (or the load has been given up on), live and local
//! messages are held back so they can never render above the history they
//! follow.

use std::collections::HashSet;

use opsdeck_protocol::Message;

/// Where a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSource {
    History,
    Live,
    Local,
}

/// Result of applying a single message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Now part of the visible transcript
    Accepted,
    /// Waiting for the history batch
    Held,
    /// Same id already visible or held
    Duplicate,
}

#[derive(Debug, Default)]
pub struct MessageMerger {
    messages: Vec<Message>,
    seen: HashSet<String>,
    held: Vec<Message>,
    held_ids: HashSet<String>,
    history_settled: bool,
    revision: u64,
}

impl MessageMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only ordered view
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Bumped whenever the visible transcript grows
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_settled(&self) -> bool {
        self.history_settled
    }

    /// Messages waiting for the history batch
    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    /// The last `count` visible messages
    pub fn tail(&self, count: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    /// Apply one message. Returns what happened to it.
    pub fn apply_one(&mut self, message: Message, source: MergeSource) -> MergeOutcome {
        if self.seen.contains(&message.id) || self.held_ids.contains(&message.id) {
            return MergeOutcome::Duplicate;
        }
        if source != MergeSource::History && !self.history_settled {
            self.held_ids.insert(message.id.clone());
            self.held.push(message);
            return MergeOutcome::Held;
        }
        self.accept(message);
        MergeOutcome::Accepted
    }

    /// Apply a batch in order. A history batch settles the transcript and
    /// releases held messages behind it. Returns how many messages became
    /// visible.
    pub fn apply_batch(&mut self, messages: Vec<Message>, source: MergeSource) -> usize {
        let before = self.messages.len();
        if source == MergeSource::History {
            for message in messages {
                if !self.seen.contains(&message.id) {
                    self.accept(message);
                }
            }
            self.settle();
        } else {
            for message in messages {
                self.apply_one(message, source);
            }
        }
        self.messages.len() - before
    }

    /// Mark history as resolved without a batch (e.g. the load failed) and
    /// release held messages. Returns how many messages became visible.
    pub fn settle(&mut self) -> usize {
        let before = self.messages.len();
        self.history_settled = true;
        self.held_ids.clear();
        for message in std::mem::take(&mut self.held) {
            if !self.seen.contains(&message.id) {
                self.accept(message);
            }
        }
        self.messages.len() - before
    }

    /// Drop everything, including held messages.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.seen.clear();
        self.held.clear();
        self.held_ids.clear();
        self.history_settled = false;
        self.revision += 1;
    }

    fn accept(&mut self, message: Message) {
        self.seen.insert(message.id.clone());
        self.messages.push(message);
        self.revision += 1;
    }
}
