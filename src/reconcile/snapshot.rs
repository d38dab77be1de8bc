use std::sync::RwLock;

use super::state::DesiredState;

/// Holds the node's current view of desired state. All reads return a deep
/// copy; callers can never mutate the stored state through a shared
/// reference.
#[derive(Default)]
pub struct Snapshot {
    inner: RwLock<DesiredState>,
}

impl Snapshot {
    pub fn new(initial: DesiredState) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    pub fn get(&self) -> DesiredState {
        self.inner.read().expect("snapshot lock poisoned").clone()
    }

    pub fn commit(&self, state: DesiredState) {
        *self.inner.write().expect("snapshot lock poisoned") = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_independent_copy() {
        let snapshot = Snapshot::new(DesiredState::default());
        let mut copy = snapshot.get();
        copy.metadata.insert("k".to_string(), "v".to_string());
        assert!(snapshot.get().metadata.is_empty());
    }
}
