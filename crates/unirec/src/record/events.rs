use std::sync::Arc;

use super::Record;

/// Token returned by a subscription, used to detach it again.
pub type ListenerId = u64;

/// Payload handed to change listeners. Per-key subscriptions receive the one
/// key they fired for; aggregate subscriptions receive every changed key of
/// the triggering `set`.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub changed: Vec<String>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) enum Topic {
    /// Aggregate, fired once per mutating `set` after the per-key topics.
    Change,
    /// Fired for one named attribute.
    ChangeKey(String),
    /// Fired once, on explicit teardown.
    Destroy,
}

pub(crate) type Callback = Arc<dyn Fn(&Record, &ChangeEvent) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Listener {
    pub id: ListenerId,
    pub topic: Topic,
    pub callback: Callback,
}
