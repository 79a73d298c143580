//! Credential pool with per-token remaining balances.

use crate::types::token_suffix;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Interchangeable API tokens, each with a cached remaining balance.
///
/// Balances start at zero and are filled in by a provider-specific balance
/// check; selection only considers tokens with a positive balance.
#[derive(Debug)]
pub struct TokenPool {
    tokens: Vec<String>,
    balances: Mutex<HashMap<String, i64>>,
    queries: AtomicU32,
    refresh_every: u32,
}

impl TokenPool {
    pub fn new(tokens: Vec<String>, refresh_every: u32) -> Self {
        Self {
            tokens,
            balances: Mutex::new(HashMap::new()),
            queries: AtomicU32::new(0),
            refresh_every: refresh_every.max(1),
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    fn balances(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.balances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn balance(&self, token: &str) -> i64 {
        self.balances().get(token).copied().unwrap_or(0)
    }

    pub fn set_balance(&self, token: &str, balance: i64) {
        self.balances().insert(token.to_string(), balance);
    }

    /// Random token among those with a positive balance.
    pub fn pick(&self) -> Option<String> {
        let balances = self.balances();
        let available: Vec<&String> = self
            .tokens
            .iter()
            .filter(|t| balances.get(*t).copied().unwrap_or(0) > 0)
            .collect();
        available
            .choose(&mut rand::thread_rng())
            .map(|t| (*t).clone())
    }

    /// Record one successful use; returns the balance left.
    pub fn consume(&self, token: &str) -> i64 {
        let mut balances = self.balances();
        let entry = balances.entry(token.to_string()).or_insert(0);
        *entry -= 1;
        tracing::debug!(token = %token_suffix(token), remaining = *entry, "Token balance decremented");
        *entry
    }

    /// Count a query; returns `true` every `refresh_every` queries.
    pub fn tick(&self) -> bool {
        let count = self.queries.fetch_add(1, Ordering::Relaxed) + 1;
        count % self.refresh_every == 0
    }
}
