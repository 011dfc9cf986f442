use secrecy::{ExposeSecret, Secret};
use serde_json::Value;

/// Subscriptions that must survive a reconnect
///
/// Mutated only by the recording half of stateful calls; replay reads it.
#[derive(Debug, Default)]
pub struct SubscriptionState {
    token: Option<Secret<String>>,
    pub balance: bool,
    pub portfolio: bool,
    pub transactions: bool,
    ticks: Vec<String>,
    proposals: Vec<Value>,
}

impl SubscriptionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(Secret::new(token.into()));
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    /// Get the stored authorization token (use carefully - exposes secret)
    pub fn token(&self) -> Option<&str> {
        self.token
            .as_ref()
            .map(|token| token.expose_secret().as_str())
            .filter(|token| !token.is_empty())
    }

    pub fn add_tick(&mut self, symbol: impl Into<String>) {
        let symbol = symbol.into();
        if !self.ticks.contains(&symbol) {
            self.ticks.push(symbol);
        }
    }

    pub fn remove_tick(&mut self, symbol: &str) {
        self.ticks.retain(|tick| tick != symbol);
    }

    pub fn clear_ticks(&mut self) {
        self.ticks.clear();
    }

    /// Subscribed tick symbols in subscription order
    pub fn ticks(&self) -> &[String] {
        &self.ticks
    }

    pub fn add_proposal(&mut self, descriptor: Value) {
        if !self.proposals.contains(&descriptor) {
            self.proposals.push(descriptor);
        }
    }

    pub fn clear_proposals(&mut self) {
        self.proposals.clear();
    }

    /// Subscribed price-proposal descriptors in subscription order
    pub fn proposals(&self) -> &[Value] {
        &self.proposals
    }

    /// Snapshot of the feeds that may only be replayed once authorized
    pub fn auth_replay(&self) -> AuthReplay {
        AuthReplay {
            balance: self.balance,
            transactions: self.transactions,
            portfolio: self.portfolio,
        }
    }
}

/// One-shot continuation run after the next successful authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthReplay {
    pub balance: bool,
    pub transactions: bool,
    pub portfolio: bool,
}

impl AuthReplay {
    /// Registry calls to issue, in replay order
    pub fn calls(self) -> Vec<&'static str> {
        let mut calls = Vec::new();
        if self.balance {
            calls.push("subscribe_to_balance");
        }
        if self.transactions {
            calls.push("subscribe_to_transactions");
        }
        if self.portfolio {
            calls.push("subscribe_to_all_open_contracts");
        }
        calls
    }
}
