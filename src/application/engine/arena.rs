use crate::domain::signal::{Signal, SignalId, SignalState};
use std::collections::HashMap;

/// Compact arena of signal records keyed by opaque ids.
///
/// Signals reference each other only by id; slots hold value-type records
/// and are reclaimed after a terminal transition plus a grace interval
/// during which the signal stays visible to late subscribers.
pub struct SignalArena {
    slots: Vec<Option<Signal>>,
    index: HashMap<SignalId, usize>,
    free: Vec<usize>,
    grace_millis: i64,
}

impl SignalArena {
    pub fn new(grace_millis: i64) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            grace_millis,
        }
    }

    pub fn insert(&mut self, signal: Signal) {
        let id = signal.id.clone();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(signal);
                slot
            }
            None => {
                self.slots.push(Some(signal));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
    }

    pub fn get(&self, id: &SignalId) -> Option<&Signal> {
        self.index
            .get(id)
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    pub fn get_mut(&mut self, id: &SignalId) -> Option<&mut Signal> {
        let slot = *self.index.get(id)?;
        self.slots[slot].as_mut()
    }

    pub fn contains(&self, id: &SignalId) -> bool {
        self.index.contains_key(id)
    }

    /// Non-terminal signals in insertion order. Insertion order is the
    /// deterministic tie-break when several signals cross at the same path
    /// distance.
    pub fn live(&self) -> impl Iterator<Item = &Signal> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref())
            .filter(|s| !s.is_terminal())
    }

    /// Active signals, cloned for risk-check contexts.
    pub fn active_snapshot(&self) -> Vec<Signal> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref())
            .filter(|s| s.state == SignalState::Active)
            .cloned()
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    /// Reclaim slots of terminal signals whose grace interval has elapsed.
    pub fn reclaim(&mut self, now: i64) {
        let grace = self.grace_millis;
        let mut reclaimed: Vec<SignalId> = Vec::new();
        for slot in self.slots.iter_mut() {
            let expired = match slot {
                Some(s) if s.is_terminal() => match s.closed_at {
                    Some(closed_at) => closed_at + grace <= now,
                    None => false,
                },
                _ => false,
            };
            if expired {
                if let Some(s) = slot.take() {
                    reclaimed.push(s.id);
                }
            }
        }
        for id in reclaimed {
            if let Some(slot) = self.index.remove(&id) {
                self.free.push(slot);
            }
        }
    }
}
