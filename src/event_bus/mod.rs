//! Bounded per-agent event queues (C2) with backpressure.
//!
//! Each agent gets a capacity-bounded queue. When full, the lowest-priority
//! event already queued is dropped to make room for the new one, unless the
//! new event is itself the lowest priority present, or every event in the
//! queue is `Critical` — critical events are never dropped and publishing
//! one into a full, all-critical queue returns `QueueFull`.

use crate::models::{Event, EventTarget};
use crate::{FleetError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

struct AgentQueue {
    events: VecDeque<Event>,
    capacity: usize,
}

impl AgentQueue {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, event: Event) -> Result<()> {
        if self.events.len() < self.capacity {
            self.events.push_back(event);
            return Ok(());
        }

        // Oldest event at the worst priority present, ties broken toward the
        // front of the queue (only a strictly-worse priority replaces it).
        let mut drop_index: Option<usize> = None;
        let mut drop_priority: Option<crate::models::EventPriority> = None;
        for (i, e) in self.events.iter().enumerate() {
            if e.priority == crate::models::EventPriority::Critical {
                continue;
            }
            if drop_priority.map(|p| e.priority > p).unwrap_or(true) {
                drop_index = Some(i);
                drop_priority = Some(e.priority);
            }
        }

        match drop_index {
            Some(i) if self.events[i].priority > event.priority => {
                let dropped = self.events.remove(i).unwrap();
                warn!(event_id = %dropped.id, "dropping lowest-priority event to admit a higher-priority one");
                self.events.push_back(event);
                Ok(())
            }
            _ => {
                if event.priority == crate::models::EventPriority::Critical {
                    Err(FleetError::QueueFull { critical: true })
                } else {
                    Err(FleetError::QueueFull { critical: false })
                }
            }
        }
    }

    /// Removes and returns the highest-priority queued event matching
    /// `types` (oldest first within a priority tier), or `None`.
    fn take_next_matching(&mut self, types: Option<&[crate::models::EventType]>) -> Option<Event> {
        let mut best_index: Option<usize> = None;
        let mut best_priority: Option<crate::models::EventPriority> = None;
        for (i, e) in self.events.iter().enumerate() {
            if let Some(types) = types {
                if !types.contains(&e.event_type) {
                    continue;
                }
            }
            if best_priority.map(|p| e.priority < p).unwrap_or(true) {
                best_index = Some(i);
                best_priority = Some(e.priority);
            }
        }
        best_index.and_then(|i| self.events.remove(i))
    }

    fn drain_older_than(&mut self, age: chrono::Duration) -> Vec<Event> {
        let now = chrono::Utc::now();
        let mut drained = Vec::new();
        self.events.retain(|e| {
            if now - e.created_at > age {
                drained.push(e.clone());
                false
            } else {
                true
            }
        });
        drained
    }
}

/// Per-agent bounded event queues plus a broadcast channel used to wake up
/// SSE stream writers as soon as a new event lands.
pub struct EventBus {
    queues: RwLock<HashMap<String, AgentQueue>>,
    capacity: usize,
    notify: broadcast::Sender<String>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (notify, _) = broadcast::channel(1024);
        Self {
            queues: RwLock::new(HashMap::new()),
            capacity,
            notify,
        }
    }

    pub async fn subscribe(&self, agent_id: &str) {
        let mut queues = self.queues.write().await;
        queues.entry(agent_id.to_string()).or_insert_with(|| AgentQueue::new(self.capacity));
    }

    pub async fn unsubscribe(&self, agent_id: &str) {
        self.queues.write().await.remove(agent_id);
    }

    /// Delivers an event to its target queue(s). Broadcast events fan out
    /// to every currently-subscribed agent.
    pub async fn publish(&self, event: Event) -> Result<()> {
        match &event.target {
            EventTarget::Agent(agent_id) => {
                let mut queues = self.queues.write().await;
                let queue = queues
                    .entry(agent_id.clone())
                    .or_insert_with(|| AgentQueue::new(self.capacity));
                queue.push(event.clone())?;
                let _ = self.notify.send(agent_id.clone());
                Ok(())
            }
            EventTarget::Broadcast => {
                let mut queues = self.queues.write().await;
                let mut first_err = None;
                let targets: Vec<String> = queues.keys().cloned().collect();
                for agent_id in &targets {
                    if let Some(queue) = queues.get_mut(agent_id) {
                        if let Err(e) = queue.push(event.clone()) {
                            if event.priority == crate::models::EventPriority::Critical {
                                first_err.get_or_insert(e);
                            }
                        } else {
                            let _ = self.notify.send(agent_id.clone());
                        }
                    }
                }
                match first_err {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
        }
    }

    /// Pops every queued event for `agent_id`, oldest first.
    pub async fn drain(&self, agent_id: &str) -> Vec<Event> {
        let mut queues = self.queues.write().await;
        match queues.get_mut(agent_id) {
            Some(queue) => queue.events.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Pops exactly one event matching `types` for `agent_id`, if one is
    /// queued, preferring the highest priority then the oldest.
    pub async fn take_next_matching(&self, agent_id: &str, types: Option<&[crate::models::EventType]>) -> Option<Event> {
        let mut queues = self.queues.write().await;
        queues.get_mut(agent_id)?.take_next_matching(types)
    }

    pub async fn drain_older_than(&self, agent_id: &str, age: chrono::Duration) -> Vec<Event> {
        let mut queues = self.queues.write().await;
        match queues.get_mut(agent_id) {
            Some(queue) => queue.drain_older_than(age),
            None => Vec::new(),
        }
    }

    pub async fn queue_depth(&self, agent_id: &str) -> usize {
        self.queues.read().await.get(agent_id).map(|q| q.events.len()).unwrap_or(0)
    }

    /// A receiver that fires with an agent id every time a new event is
    /// published for it; used by SSE writers to wake up without polling.
    pub fn notifications(&self) -> broadcast::Receiver<String> {
        self.notify.subscribe()
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventPriority, EventType};

    fn make_event(priority: EventPriority, target: &str) -> Event {
        Event::new(
            EventType::Message,
            "test",
            EventTarget::Agent(target.to_string()),
            priority,
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn publish_and_drain_preserves_order() {
        let bus = EventBus::new(10);
        bus.subscribe("agent-1").await;
        bus.publish(make_event(EventPriority::Normal, "agent-1")).await.unwrap();
        bus.publish(make_event(EventPriority::High, "agent-1")).await.unwrap();
        let drained = bus.drain("agent-1").await;
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].priority, EventPriority::Normal);
    }

    #[tokio::test]
    async fn full_queue_drops_lowest_priority() {
        let bus = EventBus::new(2);
        bus.subscribe("agent-1").await;
        bus.publish(make_event(EventPriority::Low, "agent-1")).await.unwrap();
        bus.publish(make_event(EventPriority::High, "agent-1")).await.unwrap();
        bus.publish(make_event(EventPriority::Critical, "agent-1")).await.unwrap();

        let drained = bus.drain("agent-1").await;
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|e| e.priority != EventPriority::Low));
    }

    #[tokio::test]
    async fn all_critical_full_queue_rejects_new_critical() {
        let bus = EventBus::new(1);
        bus.subscribe("agent-1").await;
        bus.publish(make_event(EventPriority::Critical, "agent-1")).await.unwrap();
        let result = bus.publish(make_event(EventPriority::Critical, "agent-1")).await;
        assert!(matches!(result, Err(FleetError::QueueFull { critical: true })));
    }
}
