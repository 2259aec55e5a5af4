//! Credit ledger interface and in-memory implementation

use parking_lot::Mutex;

/// Balance the engine gates runs against and charges completed nodes to
pub trait CreditLedger: Send + Sync {
    /// Credits currently available
    fn balance(&self) -> u64;

    /// Charge `amount` credits and return the new balance.
    ///
    /// The balance never goes below zero; a charge larger than the balance
    /// empties it.
    fn deduct(&self, amount: u64) -> u64;
}

/// Ledger holding a single counter
#[derive(Debug, Default)]
pub struct InMemoryCreditLedger {
    state: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    balance: u64,
    spent: u64,
}

impl InMemoryCreditLedger {
    pub fn new(balance: u64) -> Self {
        Self {
            state: Mutex::new(LedgerState { balance, spent: 0 }),
        }
    }

    /// Add credits (purchase or grant) and return the new balance
    pub fn top_up(&self, amount: u64) -> u64 {
        let mut state = self.state.lock();
        state.balance = state.balance.saturating_add(amount);
        state.balance
    }

    /// Total credits deducted over the ledger's lifetime
    pub fn total_spent(&self) -> u64 {
        self.state.lock().spent
    }
}

impl CreditLedger for InMemoryCreditLedger {
    fn balance(&self) -> u64 {
        self.state.lock().balance
    }

    fn deduct(&self, amount: u64) -> u64 {
        let mut state = self.state.lock();
        let charged = amount.min(state.balance);
        if charged < amount {
            log::warn!(
                "Credit charge of {} exceeds balance {}; clamping to zero",
                amount,
                state.balance
            );
        }
        state.balance -= charged;
        state.spent += charged;
        state.balance
    }
}
