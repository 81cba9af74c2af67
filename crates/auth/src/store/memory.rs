//! In-process token store for tests and local development
//!
//! Follows the same mock pattern as the reporting sink: shared state behind
//! `Arc<Mutex<..>>` so clones observe each other's writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{generate_key_pair, AdvanceOutcome, LeaseHandle, NonceLease, TokenStore, MAX_KEY_ATTEMPTS};
use crate::error::StoreError;
use crate::types::{IssuedToken, Principal, TokenRecord};

/// Uncommitted advances on one key.
///
/// The visible `last_nonce` is the highest of `committed` and every open
/// nonce, so leases may commit or roll back in any order.
struct OpenAdvances {
    committed: i32,
    open: Vec<i32>,
}

impl OpenAdvances {
    fn visible(&self) -> i32 {
        self.open.iter().copied().fold(self.committed, i32::max)
    }
}

#[derive(Default)]
struct MemoryState {
    principals: HashMap<Uuid, Principal>,
    tokens: HashMap<String, TokenRecord>,
    advances: HashMap<String, OpenAdvances>,
    unavailable: bool,
}

impl MemoryState {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }

    /// Close an open advance, keeping it when `commit` is set
    fn settle(&mut self, public_key: &str, nonce: i32, commit: bool) {
        let Some(advances) = self.advances.get_mut(public_key) else {
            return;
        };
        advances.open.retain(|&n| n != nonce);
        if commit {
            advances.committed = advances.committed.max(nonce);
        }

        let visible = advances.visible();
        if advances.open.is_empty() {
            self.advances.remove(public_key);
        }
        if let Some(token) = self.tokens.get_mut(public_key) {
            token.last_nonce = visible;
        }
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Token store backed by a process-local map
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_principal(&self, principal: Principal) {
        lock(&self.state).principals.insert(principal.id, principal);
    }

    /// Activate or deactivate an owner and every token it holds
    pub fn set_principal_active(&self, id: Uuid, active: bool) {
        let mut state = lock(&self.state);
        if let Some(principal) = state.principals.get_mut(&id) {
            principal.is_active = active;
        }
        for token in state.tokens.values_mut().filter(|t| t.owner.id == id) {
            token.owner.is_active = active;
        }
    }

    /// Seed a token with known keys; registers its owner as well
    pub fn insert_token(&self, record: TokenRecord) {
        let mut state = lock(&self.state);
        state
            .principals
            .entry(record.owner.id)
            .or_insert_with(|| record.owner.clone());
        state.tokens.insert(record.public_key.clone(), record);
    }

    pub fn last_nonce(&self, public_key: &str) -> Option<i32> {
        lock(&self.state)
            .tokens
            .get(public_key)
            .map(|t| t.last_nonce)
    }

    /// Simulate an outage: every operation, including lease commits, fails
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    pub fn token_count(&self) -> usize {
        lock(&self.state).tokens.len()
    }

    fn advance(&self, public_key: &str, nonce: i32) -> Result<AdvanceOutcome, StoreError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.check_available()?;

        let now = Utc::now();
        let Some(token) = state.tokens.get_mut(public_key) else {
            return Ok(AdvanceOutcome::Inactive);
        };
        if !token.is_usable(now) {
            return Ok(AdvanceOutcome::Inactive);
        }
        if token.last_nonce >= nonce {
            return Ok(AdvanceOutcome::Stale);
        }

        let committed = token.last_nonce;
        token.last_nonce = nonce;
        state
            .advances
            .entry(public_key.to_string())
            .or_insert_with(|| OpenAdvances {
                committed,
                open: Vec::new(),
            })
            .open
            .push(nonce);

        let handle = MemoryLease {
            state: self.state.clone(),
            public_key: public_key.to_string(),
            nonce,
            committed: false,
        };
        Ok(AdvanceOutcome::Advanced(NonceLease::new(public_key, nonce, handle)))
    }

    fn issue_sync(
        &self,
        owner_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedToken, StoreError> {
        let mut state = lock(&self.state);
        state.check_available()?;

        let owner = state
            .principals
            .get(&owner_id)
            .filter(|p| p.is_active)
            .cloned()
            .ok_or(StoreError::InactiveOwner(owner_id))?;

        for _ in 0..MAX_KEY_ATTEMPTS {
            let (public_key, secret_key) = generate_key_pair()?;
            let taken = state
                .tokens
                .values()
                .any(|t| t.public_key == public_key || t.secret_key() == secret_key);
            if taken {
                continue;
            }

            let mut record = TokenRecord::new(public_key.clone(), secret_key.clone(), owner);
            record.expires_at = expires_at;
            state.tokens.insert(public_key.clone(), record);

            return Ok(IssuedToken {
                public_key,
                secret_key,
                expires_at,
            });
        }

        Err(StoreError::KeyCollision(MAX_KEY_ATTEMPTS))
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn lookup_token(&self, public_key: &str) -> Result<Option<TokenRecord>, StoreError> {
        let state = lock(&self.state);
        state.check_available()?;
        Ok(state.tokens.get(public_key).cloned())
    }

    async fn atomic_advance_nonce(
        &self,
        public_key: &str,
        nonce: i32,
    ) -> Result<AdvanceOutcome, StoreError> {
        self.advance(public_key, nonce)
    }

    async fn issue(
        &self,
        owner_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedToken, StoreError> {
        self.issue_sync(owner_id, expires_at)
    }

    async fn revoke(&self, public_key: &str) -> Result<bool, StoreError> {
        let mut state = lock(&self.state);
        state.check_available()?;
        match state.tokens.get_mut(public_key) {
            Some(token) if token.revoked_at.is_none() => {
                token.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

struct MemoryLease {
    state: Arc<Mutex<MemoryState>>,
    public_key: String,
    nonce: i32,
    committed: bool,
}

#[async_trait]
impl LeaseHandle for MemoryLease {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut lease = self;
        let mut state = lock(&lease.state);
        state.check_available()?;
        state.settle(&lease.public_key, lease.nonce, true);
        drop(state);
        lease.committed = true;
        Ok(())
    }
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        lock(&self.state).settle(&self.public_key, self.nonce, false);
    }
}
