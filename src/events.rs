use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TouchEventKind {
    Add,
    Update,
    Remove,
}

/// One lifecycle event for a tracked touch. For every session id the
/// stream spells ADD (UPDATE)* REMOVE; unconfirmed touches never appear.
#[derive(Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct TouchEvent {
    pub kind: TouchEventKind,
    pub session_id: u32,
    pub screen_id: u32,
    pub u: f32,
    pub v: f32,
    pub du: f32,
    pub dv: f32,
    pub t_ns: u64,
}

#[derive(Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum PipelineEvent {
    Touch(TouchEvent),
    SensorStale { sensor_id: u32, stale: bool },
    BackgroundLearned { sensor_id: u32 },
}

/// Fan-out bus for pipeline observers (GUI, test harness). Subscribers
/// that drop their receiver are pruned on the next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<PipelineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn publish(&self, event: PipelineEvent) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        bus.publish(PipelineEvent::SensorStale {
            sensor_id: 2,
            stale: true,
        });
        match rx.try_recv().unwrap() {
            PipelineEvent::SensorStale { sensor_id, stale } => {
                assert_eq!(sensor_id, 2);
                assert!(stale);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.publish(PipelineEvent::BackgroundLearned { sensor_id: 0 });
        assert!(bus.subscribers.lock().unwrap().is_empty());
    }
}
