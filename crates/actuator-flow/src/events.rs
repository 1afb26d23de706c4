//! Flow event system for observability.
//!
//! Emits [`FlowEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, tests, embedders) can follow flow execution
//! without coupling to the engine internals. Sending never blocks, so events
//! are emitted straight from monitor threads.

use serde::{Deserialize, Serialize};

use actuator_types::Value;

use crate::flow::FlowState;

/// Events emitted while a flow set runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlowEvent {
    StateChanged {
        flow: String,
        from: FlowState,
        to: FlowState,
    },
    SinkPerformed {
        flow: String,
        payload: Value,
    },
    PullFailed {
        flow: String,
        error: String,
    },
    ExitConditionMet {
        flow: String,
        condition: String,
    },
    FlowFailed {
        flow: String,
        error: String,
    },
}

impl FlowEvent {
    /// Name of the flow the event belongs to.
    pub fn flow(&self) -> &str {
        match self {
            FlowEvent::StateChanged { flow, .. }
            | FlowEvent::SinkPerformed { flow, .. }
            | FlowEvent::PullFailed { flow, .. }
            | FlowEvent::ExitConditionMet { flow, .. }
            | FlowEvent::FlowFailed { flow, .. } => flow,
        }
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<FlowEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: FlowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FlowEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(FlowEvent::SinkPerformed {
            flow: "ticker".into(),
            payload: json!(3),
        });

        match rx.recv().await.unwrap() {
            FlowEvent::SinkPerformed { flow, payload } => {
                assert_eq!(flow, "ticker");
                assert_eq!(payload, json!(3));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(FlowEvent::StateChanged {
            flow: "a".into(),
            from: FlowState::Wired,
            to: FlowState::Started,
        });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(
            serde_json::to_string(&e1).unwrap(),
            serde_json::to_string(&e2).unwrap()
        );
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(FlowEvent::FlowFailed {
            flow: "oops".into(),
            error: "something went wrong".into(),
        });
    }

    #[test]
    fn receiver_can_drain_synchronously() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();
        emitter.emit(FlowEvent::PullFailed {
            flow: "f".into(),
            error: "boom".into(),
        });
        let event = rx.try_recv().unwrap();
        assert_eq!(event.flow(), "f");
        assert!(rx.try_recv().is_err());
    }
}
