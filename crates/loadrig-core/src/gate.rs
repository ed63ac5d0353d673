//! Accept/reject limiter on the number of requests being processed at once.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Default)]
struct GateState {
    inflight: usize,
    peak: usize,
}

/// Bounded in-flight counter. A ceiling of zero admits everything and never
/// touches the count.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    max_inflight: usize,
    state: Arc<Mutex<GateState>>,
}

impl AdmissionGate {
    pub fn new(max_inflight: usize) -> Self {
        Self {
            max_inflight,
            state: Arc::new(Mutex::new(GateState::default())),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Admits one unit of work if a slot is free.
    ///
    /// Every `true` must be paired with exactly one [`leave`](Self::leave);
    /// prefer [`try_acquire`](Self::try_acquire), which does the pairing on drop.
    pub fn try_enter(&self) -> bool {
        if self.max_inflight == 0 {
            return true;
        }

        let mut state = self.state.lock();
        if state.inflight >= self.max_inflight {
            return false;
        }
        state.inflight += 1;
        state.peak = state.peak.max(state.inflight);
        true
    }

    pub fn leave(&self) {
        if self.max_inflight == 0 {
            return;
        }

        let mut state = self.state.lock();
        match state.inflight.checked_sub(1) {
            Some(inflight) => state.inflight = inflight,
            None => warn!("admission gate released without a matching enter"),
        }
    }

    /// Scoped form of [`try_enter`](Self::try_enter): the slot is released
    /// when the permit drops, including during unwinding.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        self.try_enter().then(|| AdmissionPermit { gate: self.clone() })
    }

    pub fn inflight(&self) -> usize {
        self.state.lock().inflight
    }

    /// Highest `inflight` value seen since construction.
    pub fn peak(&self) -> usize {
        self.state.lock().peak
    }

    pub fn max_inflight(&self) -> usize {
        self.max_inflight
    }

    pub fn is_bounded(&self) -> bool {
        self.max_inflight > 0
    }
}

#[derive(Debug)]
#[must_use = "dropping the permit releases the slot immediately"]
pub struct AdmissionPermit {
    gate: AdmissionGate,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.leave();
    }
}
