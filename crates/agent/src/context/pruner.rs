//! Context pruning: bounds what a generation request carries.
//!
//! Tool results (search excerpts especially) dwarf conversational text, so
//! older messages lose their tool payloads while the most recent ones keep
//! full detail. Pruning is a pure function of `(history, policy)`: the stored
//! conversation is never touched and the result can always be re-derived.

use deepdive_core::message::{Message, Part};

/// Retention rule applied to a message history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrunePolicy {
    /// Send everything.
    KeepAll,
    /// Keep tool-call/tool-result and reasoning parts only in the last `n` messages.
    BeforeLastMessages(usize),
    /// Strip tool parts from every message.
    DropAllToolPayloads,
}

impl Default for PrunePolicy {
    fn default() -> Self {
        Self::BeforeLastMessages(2)
    }
}

/// Applies a [`PrunePolicy`] to message histories.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextPruner {
    policy: PrunePolicy,
}

impl ContextPruner {
    pub fn new(policy: PrunePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PrunePolicy {
        self.policy
    }

    pub fn prune(&self, messages: &[Message]) -> Vec<Message> {
        prune(messages, self.policy)
    }
}

/// Produce the bounded view of `messages` under `policy`.
///
/// Messages emptied by pruning are removed. Messages inside the retention
/// window are never removed, so the window is stable and
/// `prune(prune(m, p), p) == prune(m, p)`.
pub fn prune(messages: &[Message], policy: PrunePolicy) -> Vec<Message> {
    match policy {
        PrunePolicy::KeepAll => messages.to_vec(),
        PrunePolicy::BeforeLastMessages(n) => {
            let cutoff = messages.len().saturating_sub(n);
            messages
                .iter()
                .enumerate()
                .filter_map(|(i, m)| {
                    if i >= cutoff {
                        Some(m.clone())
                    } else {
                        strip(m, |p| p.is_tool_payload() || matches!(p, Part::Reasoning { .. }))
                    }
                })
                .collect()
        }
        PrunePolicy::DropAllToolPayloads => messages
            .iter()
            .filter_map(|m| strip(m, Part::is_tool_payload))
            .collect(),
    }
}

/// Copy of `message` without the parts matching `drop`, or `None` if nothing is left.
fn strip(message: &Message, drop: impl Fn(&Part) -> bool) -> Option<Message> {
    let parts: Vec<Part> = message.parts.iter().filter(|p| !drop(p)).cloned().collect();
    if parts.is_empty() {
        return None;
    }
    Some(Message {
        parts,
        ..message.clone()
    })
}
