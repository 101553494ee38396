use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
    Lost,
    Regained,
}

pub type SubscriptionId = u64;

type Listener = Box<dyn FnMut(Transition)>;

/// Holds the host's online/offline signal. Listeners hear transitions only,
/// never repeated reports of the same state.
pub struct ConnectivityMonitor {
    online: bool,
    next_id: SubscriptionId,
    listeners: Vec<(SubscriptionId, Listener)>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        Self {
            online,
            next_id: 1,
            listeners: Vec::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) -> Option<Transition> {
        if self.online == online {
            return None;
        }
        self.online = online;
        let t = if online {
            Transition::Regained
        } else {
            Transition::Lost
        };
        for (_, listener) in self.listeners.iter_mut() {
            listener(t);
        }
        Some(t)
    }

    pub fn subscribe(&mut self, listener: impl FnMut(Transition) + 'static) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.online)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
