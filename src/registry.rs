use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{TenantId, error::OpError, task::SharedTournament, tournament::Tournament};

/// The single authority for "is there an active tournament for this
/// tenant". Owned by the composition root and passed by reference; all
/// register/unregister traffic is serialized through its lock.
#[derive(Debug, Default)]
pub struct Registry {
    tenants: Mutex<HashMap<TenantId, SharedTournament>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<TenantId, SharedTournament>> {
        match self.tenants.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers a tournament for its tenant.
    ///
    /// # Errors
    ///
    /// `AlreadyRegistered` if the tenant has a live tournament; the
    /// first one has to be removed before a second can exist.
    pub fn register(&self, tournament: Tournament) -> Result<SharedTournament, OpError> {
        let mut map = self.map();

        if map.contains_key(&tournament.tenant) {
            return Err(OpError::AlreadyRegistered);
        }

        let tenant = tournament.tenant;
        let shared = Arc::new(Mutex::new(tournament));
        map.insert(tenant, Arc::clone(&shared));

        Ok(shared)
    }

    #[must_use]
    pub fn get(&self, tenant: TenantId) -> Option<SharedTournament> {
        self.map().get(&tenant).cloned()
    }

    /// # Errors
    ///
    /// `NoActiveTournament` if the tenant has none.
    pub fn require(&self, tenant: TenantId) -> Result<SharedTournament, OpError> {
        self.get(tenant).ok_or(OpError::NoActiveTournament)
    }

    pub fn remove(&self, tenant: TenantId) -> Option<SharedTournament> {
        self.map().remove(&tenant)
    }

    #[must_use]
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self.map().keys().copied().collect();
        tenants.sort_unstable();
        tenants
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
