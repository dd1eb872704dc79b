//! Expectation registry and selection.
//!
//! The registry owns every expectation of a server behind one lock. Selection
//! and counting happen under that lock, so concurrent requests never claim
//! the same unit of budget twice.

use crate::expectation::{Expectation, ExpectationHandle, Reply};
use crate::fingerprint::RequestFingerprint;
use crate::gate::ReleaseGate;
use crate::report::Failure;
use parking_lot::Mutex;
use std::sync::Arc;

/// A selected expectation, already counted.
#[derive(Debug, Clone)]
pub struct Matched {
    pub id: usize,
    pub reply: Reply,
    pub gate: Option<ReleaseGate>,
    /// Call count including this request
    pub calls: usize,
    pub fallback: bool,
}

/// Outcome of [`ExpectationRegistry::select`].
#[derive(Debug, Clone)]
pub enum Selection {
    Matched(Matched),
    NoMatch {
        /// Equal expectations skipped because their budget was spent
        exhausted: usize,
    },
}

/// Ordered set of expectations.
#[derive(Debug, Default)]
pub struct ExpectationRegistry {
    expectations: Mutex<Vec<Expectation>>,
}

impl ExpectationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an expectation. Identical registrations are kept separately.
    pub fn register(self: &Arc<Self>, request: RequestFingerprint, reply: Reply) -> ExpectationHandle {
        let id = self.push(|id| Expectation::new(id, request, reply));
        ExpectationHandle::new(Arc::clone(self), id)
    }

    /// Append a default handler that takes any request no other expectation
    /// has budget for.
    pub fn register_fallback(self: &Arc<Self>, reply: Reply) -> ExpectationHandle {
        let id = self.push(|id| Expectation::fallback(id, reply));
        ExpectationHandle::new(Arc::clone(self), id)
    }

    fn push(&self, build: impl FnOnce(usize) -> Expectation) -> usize {
        let mut expectations = self.expectations.lock();
        let id = expectations.len();
        expectations.push(build(id));
        id
    }

    /// Pick the expectation for a request and count the call.
    ///
    /// Equal expectations with budget left win in registration order. When
    /// none has budget, the first default handler with budget is used.
    pub fn select(&self, fingerprint: &RequestFingerprint) -> Selection {
        let mut expectations = self.expectations.lock();

        let mut exhausted = 0;
        let mut chosen = None;
        for (idx, expectation) in expectations.iter().enumerate() {
            if expectation.is_fallback() || !expectation.matches(fingerprint) {
                continue;
            }
            if expectation.has_budget() {
                chosen = Some(idx);
                break;
            }
            exhausted += 1;
        }

        let chosen = chosen.or_else(|| {
            expectations
                .iter()
                .position(|e| e.is_fallback() && e.has_budget())
        });

        match chosen {
            Some(idx) => {
                let expectation = &mut expectations[idx];
                expectation.calls += 1;
                Selection::Matched(Matched {
                    id: expectation.id,
                    reply: expectation.reply.clone(),
                    gate: expectation.gate.clone(),
                    calls: expectation.calls,
                    fallback: expectation.is_fallback(),
                })
            }
            None => Selection::NoMatch { exhausted },
        }
    }

    /// Every expectation whose call count violates its cardinality, in
    /// registration order.
    pub fn assert_all(&self) -> Vec<Failure> {
        self.expectations
            .lock()
            .iter()
            .filter(|e| !e.cardinality.is_satisfied_by(e.calls))
            .map(|e| Failure::UnmetExpectation {
                id: e.id,
                method: e.method().to_string(),
                path: e.path().to_string(),
                cardinality: e.cardinality,
                actual: e.calls,
            })
            .collect()
    }

    pub(crate) fn configure(&self, id: usize, apply: impl FnOnce(&mut Expectation)) {
        if let Some(expectation) = self.expectations.lock().get_mut(id) {
            apply(expectation);
        }
    }

    /// Snapshot of one expectation.
    pub fn get(&self, id: usize) -> Option<Expectation> {
        self.expectations.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.expectations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expectations.lock().is_empty()
    }
}
