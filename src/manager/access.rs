// src/manager/access.rs

use crate::run::Run;

/// Decides who may stop a run.
pub trait AccessPolicy: Send + Sync {
    fn may_stop(&self, user: &str, run: &Run) -> bool;
}

/// The run's owner, or any configured administrator.
#[derive(Debug, Clone, Default)]
pub struct OwnerOrAdmin {
    admins: Vec<String>,
}

impl OwnerOrAdmin {
    pub fn new(admins: Vec<String>) -> Self {
        Self { admins }
    }
}

impl AccessPolicy for OwnerOrAdmin {
    fn may_stop(&self, user: &str, run: &Run) -> bool {
        run.user == user || self.admins.iter().any(|a| a == user)
    }
}
