use fnv::FnvHashMap;
use riptide_execution::order::{OrderStatus, id::OrderId};

/// Duplicate suppression for order-status events.
///
/// Both the exchange-stream path and the sync path funnel status changes
/// through one gate: an event is emitted only when the new status differs
/// from the stored last-known value, making every transition
/// exactly-once-visible no matter how many paths observe it.
#[derive(Debug, Default)]
pub struct StatusGate {
    last_known: parking_lot::Mutex<FnvHashMap<OrderId, OrderStatus>>,
}

impl StatusGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the provided status, returning whether an event should be
    /// emitted for it.
    pub fn should_emit(&self, id: &OrderId, status: OrderStatus) -> bool {
        let mut last_known = self.last_known.lock();
        match last_known.get(id) {
            Some(last) if *last == status => false,
            _ => {
                last_known.insert(id.clone(), status);
                true
            }
        }
    }

    /// Seed the gate without emitting, eg/ for orders rebuilt during
    /// recovery whose current status must not re-fire.
    pub fn seed(&self, id: &OrderId, status: OrderStatus) {
        self.last_known.lock().insert(id.clone(), status);
    }

    /// Drop suppression state for a purged order.
    pub fn forget(&self, id: &OrderId) {
        self.last_known.lock().remove(id);
    }

    /// Last observed status, if any.
    pub fn last_known(&self, id: &OrderId) -> Option<OrderStatus> {
        self.last_known.lock().get(id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_once_per_transition() {
        let gate = StatusGate::new();
        let id = OrderId::new("1");

        // First observation of each status emits, repeats are suppressed
        assert!(gate.should_emit(&id, OrderStatus::New));
        assert!(!gate.should_emit(&id, OrderStatus::New));

        assert!(gate.should_emit(&id, OrderStatus::PartiallyFilled));
        assert!(!gate.should_emit(&id, OrderStatus::PartiallyFilled));

        assert!(gate.should_emit(&id, OrderStatus::Filled));
        // A late duplicate arriving from the other path is suppressed
        assert!(!gate.should_emit(&id, OrderStatus::Filled));
    }

    #[test]
    fn test_seed_suppresses_first_observation() {
        let gate = StatusGate::new();
        let id = OrderId::new("1");

        gate.seed(&id, OrderStatus::PartiallyFilled);
        assert!(!gate.should_emit(&id, OrderStatus::PartiallyFilled));
        assert!(gate.should_emit(&id, OrderStatus::Filled));
    }

    #[test]
    fn test_forget_clears_state() {
        let gate = StatusGate::new();
        let id = OrderId::new("1");

        assert!(gate.should_emit(&id, OrderStatus::Filled));
        gate.forget(&id);
        assert_eq!(gate.last_known(&id), None);
    }
}
