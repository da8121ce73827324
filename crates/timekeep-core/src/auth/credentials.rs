use parking_lot::RwLock;

/// A bearer credential as seen by one outbound call.
///
/// `generation` increases every time the slot is written, which lets the
/// refresh coordinator tell whether a 401 was produced by the credential that
/// is current now or by one that has already been replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSnapshot {
    pub token: Option<String>,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct Slot {
    token: Option<String>,
    generation: u64,
}

/// In-memory holder of the current access credential.
///
/// Nothing here is ever written to disk; a restart loses the credential and
/// the refresh protocol recovers it from the session cookie.
#[derive(Debug, Default)]
pub struct CredentialStore {
    slot: RwLock<Slot>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current credential.
    pub fn set(&self, token: impl Into<String>) {
        let mut slot = self.slot.write();
        slot.token = Some(token.into());
        slot.generation += 1;
    }

    pub fn get(&self) -> Option<String> {
        self.slot.read().token.clone()
    }

    pub fn clear(&self) {
        let mut slot = self.slot.write();
        if slot.token.take().is_some() {
            slot.generation += 1;
        }
    }

    pub fn is_present(&self) -> bool {
        self.slot.read().token.is_some()
    }

    /// Token and generation read under a single lock.
    pub fn snapshot(&self) -> CredentialSnapshot {
        let slot = self.slot.read();
        CredentialSnapshot {
            token: slot.token.clone(),
            generation: slot.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_clear() {
        let store = CredentialStore::new();
        assert_eq!(store.get(), None);

        store.set("t1");
        assert_eq!(store.get().as_deref(), Some("t1"));

        store.set("t2");
        assert_eq!(store.get().as_deref(), Some("t2"));

        store.clear();
        assert_eq!(store.get(), None);
        assert!(!store.is_present());
    }

    #[test]
    fn test_generation_tracks_writes() {
        let store = CredentialStore::new();
        let g0 = store.snapshot().generation;

        store.set("a");
        let g1 = store.snapshot().generation;
        assert!(g1 > g0);

        store.clear();
        let g2 = store.snapshot().generation;
        assert!(g2 > g1);

        // Clearing an empty slot is not a write
        store.clear();
        assert_eq!(store.snapshot().generation, g2);
    }
}
