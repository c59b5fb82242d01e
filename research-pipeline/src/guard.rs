use research_core::CoreError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// At most one background run per research id.
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, research_id: &str) -> Result<RunPermit, CoreError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(research_id.to_string()) {
            return Err(CoreError::Conflict {
                message: format!("Research {} already has a run in progress", research_id),
            });
        }
        debug!("Acquired run permit for {}", research_id);
        Ok(RunPermit {
            research_id: research_id.to_string(),
            active: Arc::clone(&self.active),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self, research_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(research_id)
    }
}

/// Released when dropped, including when the run panics.
#[derive(Debug)]
pub struct RunPermit {
    research_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunPermit {
    pub fn research_id(&self) -> &str {
        &self.research_id
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.research_id);
        debug!("Released run permit for {}", self.research_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlapping_runs_rejected() {
        let guard = RunGuard::new();
        let permit = guard.try_acquire("r1").unwrap();
        assert!(matches!(
            guard.try_acquire("r1"),
            Err(CoreError::Conflict { .. })
        ));
        // Other research ids are independent
        let _other = guard.try_acquire("r2").unwrap();

        drop(permit);
        assert!(!guard.is_running("r1"));
        assert!(guard.try_acquire("r1").is_ok());
    }
}
