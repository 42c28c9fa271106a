/// session.rs – Account authorization progress and the "when ready" queue.
///
/// An account is ready once it is authorized, reconciled and its trader info
/// has arrived. The first ready account becomes current unless the operator
/// picked one explicitly. Commands that need an account wait in a FIFO queue
/// until then.
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::broker::BrokerCommand;
use crate::models::{AccountId, AccountMeta, TraderInfo};

/// Builds a command once the current account is known.
pub type Deferred = Box<dyn FnOnce(AccountId) -> BrokerCommand + Send>;

const FALLBACK_CURRENCY: &str = "USD";

#[derive(Default)]
pub struct Session {
    accounts: BTreeMap<AccountId, AccountMeta>,
    authorized: HashSet<AccountId>,
    auth_in_flight: HashSet<AccountId>,
    pending_reconcile: HashSet<AccountId>,
    traders: HashMap<AccountId, TraderInfo>,
    current: Option<AccountId>,
    preferred: Option<AccountId>,
    queue: VecDeque<Deferred>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything the broker granted; used on reconnect. Queued
    /// commands survive and run once an account is ready again.
    pub fn reset(&mut self) {
        self.authorized.clear();
        self.auth_in_flight.clear();
        self.pending_reconcile.clear();
        self.traders.clear();
        self.preferred = self.preferred.or(self.current);
        self.current = None;
    }

    // ------------------------------------------------------------------
    // Account list / auth
    // ------------------------------------------------------------------

    pub fn set_accounts(&mut self, accounts: Vec<AccountMeta>) {
        self.accounts = accounts.into_iter().map(|a| (a.account_id, a)).collect();
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountMeta> {
        self.accounts.values()
    }

    pub fn is_listed(&self, account_id: AccountId) -> bool {
        self.accounts.contains_key(&account_id)
    }

    /// Configured ids that the broker actually lists, in configured order.
    pub fn matching(&self, configured: &[AccountId]) -> Vec<AccountId> {
        configured
            .iter()
            .copied()
            .filter(|id| self.is_listed(*id))
            .collect()
    }

    /// Mark an auth request as sent. False when one is already in flight or
    /// the account is already authorized.
    pub fn begin_auth(&mut self, account_id: AccountId) -> bool {
        if self.authorized.contains(&account_id) {
            return false;
        }
        self.auth_in_flight.insert(account_id)
    }

    pub fn authorized(&mut self, account_id: AccountId) {
        self.auth_in_flight.remove(&account_id);
        self.authorized.insert(account_id);
        self.pending_reconcile.insert(account_id);
    }

    pub fn is_authorized(&self, account_id: AccountId) -> bool {
        self.authorized.contains(&account_id)
    }

    pub fn reconciled(&mut self, account_id: AccountId) {
        self.pending_reconcile.remove(&account_id);
    }

    /// Record trader info. Returns true if this made an account current.
    pub fn trader_info(&mut self, info: TraderInfo) -> bool {
        let id = info.account_id;
        self.traders.insert(id, info);
        if self.current.is_some() {
            return false;
        }
        let eligible = self.authorized.contains(&id) && !self.pending_reconcile.contains(&id);
        let wanted = self.preferred.map_or(true, |p| p == id);
        if eligible && wanted {
            self.current = Some(id);
            self.preferred = None;
            return true;
        }
        false
    }

    pub fn trader(&self, account_id: AccountId) -> Option<&TraderInfo> {
        self.traders.get(&account_id)
    }

    // ------------------------------------------------------------------
    // Current account
    // ------------------------------------------------------------------

    pub fn current(&self) -> Option<AccountId> {
        self.current
    }

    /// Switch to an already authorized account, or remember the choice until
    /// it becomes ready. Returns true if it switched immediately.
    pub fn select(&mut self, account_id: AccountId) -> bool {
        if self.authorized.contains(&account_id) && self.traders.contains_key(&account_id) {
            self.current = Some(account_id);
            self.preferred = None;
            true
        } else {
            self.current = None;
            self.preferred = Some(account_id);
            false
        }
    }

    /// Deposit currency of the current account, `USD` when unknown.
    pub fn currency(&self) -> &str {
        self.current
            .and_then(|id| self.accounts.get(&id))
            .map(|a| a.currency.trim())
            .filter(|c| !c.is_empty() && *c != "?")
            .unwrap_or(FALLBACK_CURRENCY)
    }

    // ------------------------------------------------------------------
    // Readiness queue
    // ------------------------------------------------------------------

    /// Build `cmd` now if an account is current, otherwise queue it.
    pub fn when_ready(&mut self, cmd: Deferred) -> Option<BrokerCommand> {
        match self.current {
            Some(id) => Some(cmd(id)),
            None => {
                self.queue.push_back(cmd);
                None
            }
        }
    }

    /// Drain the queue in submission order against the current account.
    pub fn flush_ready(&mut self) -> Vec<BrokerCommand> {
        let Some(id) = self.current else {
            return Vec::new();
        };
        self.queue.drain(..).map(|cmd| cmd(id)).collect()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: AccountId, currency: &str) -> AccountMeta {
        AccountMeta {
            account_id: id,
            currency: currency.into(),
            broker: "demo".into(),
            is_live: false,
        }
    }

    fn trader(id: AccountId) -> TraderInfo {
        TraderInfo {
            account_id: id,
            balance: 1000.0,
            ..TraderInfo::default()
        }
    }

    fn ready(session: &mut Session, id: AccountId) -> bool {
        session.begin_auth(id);
        session.authorized(id);
        session.reconciled(id);
        session.trader_info(trader(id))
    }

    #[test]
    fn first_ready_account_becomes_current() {
        let mut s = Session::new();
        s.set_accounts(vec![meta(1, "EUR"), meta(2, "USD")]);
        assert!(ready(&mut s, 2));
        assert!(!ready(&mut s, 1));
        assert_eq!(s.current(), Some(2));
    }

    #[test]
    fn trader_before_reconcile_does_not_promote() {
        let mut s = Session::new();
        s.begin_auth(1);
        s.authorized(1);
        assert!(!s.trader_info(trader(1)));
        s.reconciled(1);
        assert!(s.trader_info(trader(1)));
    }

    #[test]
    fn one_auth_in_flight_per_account() {
        let mut s = Session::new();
        assert!(s.begin_auth(7));
        assert!(!s.begin_auth(7));
        s.authorized(7);
        assert!(!s.begin_auth(7));
    }

    #[test]
    fn queue_flushes_in_submission_order() {
        let mut s = Session::new();
        assert!(s
            .when_ready(Box::new(|id| BrokerCommand::Reconcile { account_id: id }))
            .is_none());
        assert!(s
            .when_ready(Box::new(|id| BrokerCommand::Trader { account_id: id }))
            .is_none());
        assert_eq!(s.queued(), 2);
        assert!(s.flush_ready().is_empty());

        ready(&mut s, 3);
        assert_eq!(
            s.flush_ready(),
            vec![
                BrokerCommand::Reconcile { account_id: 3 },
                BrokerCommand::Trader { account_id: 3 },
            ]
        );
        assert_eq!(s.queued(), 0);
        let now = s.when_ready(Box::new(|id| BrokerCommand::UnrealizedPnl { account_id: id }));
        assert_eq!(now, Some(BrokerCommand::UnrealizedPnl { account_id: 3 }));
    }

    #[test]
    fn preferred_account_wins_over_first_ready() {
        let mut s = Session::new();
        assert!(!s.select(5));
        assert!(!ready(&mut s, 4));
        assert!(ready(&mut s, 5));
        assert_eq!(s.current(), Some(5));
    }

    #[test]
    fn currency_falls_back_to_usd() {
        let mut s = Session::new();
        assert_eq!(s.currency(), "USD");
        s.set_accounts(vec![meta(1, ""), meta(2, "GBP")]);
        ready(&mut s, 1);
        assert_eq!(s.currency(), "USD");
        assert!(!ready(&mut s, 2));
        assert!(s.select(2));
        assert_eq!(s.currency(), "GBP");
    }

    #[test]
    fn reset_keeps_queue_and_remembers_account() {
        let mut s = Session::new();
        ready(&mut s, 8);
        s.reset();
        assert_eq!(s.current(), None);
        s.when_ready(Box::new(|id| BrokerCommand::Reconcile { account_id: id }));
        assert!(!ready(&mut s, 9));
        assert!(ready(&mut s, 8));
        assert_eq!(s.flush_ready().len(), 1);
    }
}
