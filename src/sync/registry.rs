use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type RunMap = DashMap<String, Vec<(Uuid, CancellationToken)>>;

/// Tracks the cancellation token of every in-flight sync, keyed by user.
///
/// Several runs for one user may overlap; the store's idempotent insert keeps
/// that safe, so the registry only exists to let `/sync/cancel` reach them.
#[derive(Clone, Default)]
pub struct SyncRegistry {
    runs: Arc<RunMap>,
}

/// Live registration; dropping it removes the run from the registry.
pub struct SyncRegistration {
    run_id: Uuid,
    user_id: String,
    token: CancellationToken,
    runs: Arc<RunMap>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: &str) -> SyncRegistration {
        let run_id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.runs
            .entry(user_id.to_string())
            .or_default()
            .push((run_id, token.clone()));

        log::debug!("sync registry: run {} registered for {}", run_id, user_id);

        SyncRegistration {
            run_id,
            user_id: user_id.to_string(),
            token,
            runs: Arc::clone(&self.runs),
        }
    }

    /// Cancel every running sync for the user, returning how many were signalled.
    pub fn cancel(&self, user_id: &str) -> usize {
        self.runs
            .get(user_id)
            .map(|runs| {
                for (_, token) in runs.iter() {
                    token.cancel();
                }
                runs.len()
            })
            .unwrap_or(0)
    }

    pub fn running(&self, user_id: &str) -> usize {
        self.runs.get(user_id).map(|runs| runs.len()).unwrap_or(0)
    }
}

impl SyncRegistration {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for SyncRegistration {
    fn drop(&mut self) {
        let now_empty = match self.runs.get_mut(&self.user_id) {
            Some(mut runs) => {
                runs.retain(|(id, _)| *id != self.run_id);
                runs.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.runs
                .remove_if(&self.user_id, |_, runs| runs.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reaches_every_run_for_the_user_only() {
        let registry = SyncRegistry::new();
        let first = registry.register("u1");
        let second = registry.register("u1");
        let other = registry.register("u2");

        assert_eq!(registry.cancel("u1"), 2);
        assert!(first.token().is_cancelled());
        assert!(second.token().is_cancelled());
        assert!(!other.token().is_cancelled());
    }

    #[test]
    fn dropping_a_registration_deregisters_it() {
        let registry = SyncRegistry::new();
        let first = registry.register("u1");
        let second = registry.register("u1");
        assert_eq!(registry.running("u1"), 2);

        drop(first);
        assert_eq!(registry.running("u1"), 1);
        drop(second);
        assert_eq!(registry.running("u1"), 0);
        assert_eq!(registry.cancel("u1"), 0);
    }
}
