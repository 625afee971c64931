//! Scripted recognition providers
//!
//! Answers are chosen per segment index, so tests control exactly what each
//! provider says about each segment without touching the network.

use async_trait::async_trait;
use mixsplitr::services::segment_extractor::Segment;
use mixsplitr::types::{FingerprintClient, IdentificationCandidate, ProviderError, ProviderId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Answer = dyn Fn(usize) -> Result<Vec<IdentificationCandidate>, ProviderError> + Send + Sync;

pub struct ScriptedProvider {
    id: ProviderId,
    answer: Box<Answer>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(
        id: ProviderId,
        answer: impl Fn(usize) -> Result<Vec<IdentificationCandidate>, ProviderError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            answer: Box::new(answer),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FingerprintClient for ScriptedProvider {
    fn provider(&self) -> ProviderId {
        self.id
    }

    async fn identify(&self, segment: &Segment) -> Result<Vec<IdentificationCandidate>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.answer)(segment.index)
    }
}

/// Single-candidate answer
pub fn matched(id: ProviderId, artist: &str, title: &str, confidence: f64) -> Vec<IdentificationCandidate> {
    vec![IdentificationCandidate::new(id, artist, title, confidence)]
}
