//! Progress events for a split run
//!
//! Events are advisory: the engine produces the same output whether or not
//! anything is listening. The CLI subscribes to render progress.

use crate::ProviderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Where a segment currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentPhase {
    Pending,
    Querying,
    NextProvider,
    Accepted,
    Unidentified,
    Enriching,
    Writing,
    Written,
    WriteFailed,
}

/// Event emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MixEvent {
    RunStarted {
        input: String,
        mode: String,
        timestamp: DateTime<Utc>,
    },
    SourceDecoded {
        duration_seconds: f64,
        sample_rate: u32,
        channels: u16,
    },
    BoundariesDetected {
        segment_count: usize,
        no_boundaries_found: bool,
    },
    SegmentProgress {
        segment_index: usize,
        phase: SegmentPhase,
        provider: Option<ProviderId>,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        tracks: usize,
        identified: usize,
        unidentified: usize,
        failed: usize,
        cancelled: bool,
        timestamp: DateTime<Utc>,
    },
}

impl MixEvent {
    pub fn segment(segment_index: usize, phase: SegmentPhase, provider: Option<ProviderId>) -> Self {
        MixEvent::SegmentProgress {
            segment_index,
            phase,
            provider,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast bus for run events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MixEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a bus buffering `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MixEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; fails when nobody is subscribed
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: MixEvent) -> Result<usize, broadcast::error::SendError<MixEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: MixEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(8);
        assert!(bus.emit(MixEvent::segment(0, SegmentPhase::Pending, None)).is_err());
        bus.emit_lossy(MixEvent::segment(0, SegmentPhase::Pending, None));
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(MixEvent::segment(3, SegmentPhase::Querying, Some(ProviderId::AcrCloud)))
            .unwrap();

        match rx.recv().await.unwrap() {
            MixEvent::SegmentProgress {
                segment_index,
                phase,
                provider,
                ..
            } => {
                assert_eq!(segment_index, 3);
                assert_eq!(phase, SegmentPhase::Querying);
                assert_eq!(provider, Some(ProviderId::AcrCloud));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_lossy_emit_on_full_channel() {
        let bus = EventBus::new(2);
        let _rx = bus.subscribe();
        for i in 0..10 {
            bus.emit_lossy(MixEvent::segment(i, SegmentPhase::Written, None));
        }
        assert_eq!(bus.capacity(), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(MixEvent::BoundariesDetected {
            segment_count: 4,
            no_boundaries_found: false,
        })
        .unwrap();
        assert_eq!(json["type"], "BoundariesDetected");
        assert_eq!(json["segment_count"], 4);
    }
}
