use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{debug, error, info, warn};
use vault_core::config::VaultConfig;
use vault_core::constants::MAX_PAGE_SIZE;
use vault_core::error::VaultError;
use vault_core::event::VaultEvent;
use vault_core::grant::Grant;
use vault_core::policy::WithdrawPolicy;
use vault_core::types::{AccountId, Balance, CallContext, GrantId, Timestamp};

use crate::access::AccessControl;
use crate::clock::Clock;
use crate::db::StateDb;
use crate::events::EventSink;
use crate::query::GrantQuery;
use crate::transfer::ValueTransfer;

// ── Offer validation ──────────────────────────────────────────────────────────

/// Creation checks, in order, failing on the first violation.
///
/// A zero amount is reported before a null beneficiary, so a call that gets
/// both wrong reports `InvalidAmount`.
pub fn validate_offer(
    amount: Balance,
    beneficiary: &AccountId,
    unlock_at: Timestamp,
    now: Timestamp,
) -> Result<(), VaultError> {
    if amount == 0 {
        return Err(VaultError::InvalidAmount);
    }
    if beneficiary.is_zero() {
        return Err(VaultError::InvalidBeneficiary);
    }
    if unlock_at <= now {
        return Err(VaultError::UnlockTimeNotFuture { unlock_at, now });
    }
    Ok(())
}

// ── Call guard ────────────────────────────────────────────────────────────────

/// Held for the duration of a mutating call. Clears the running-thread
/// marker before the serial lock is released.
struct CallGuard<'a> {
    holder: &'a Mutex<Option<ThreadId>>,
    _serial: MutexGuard<'a, ()>,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        *lock(self.holder) = None;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── GrantRegistry ─────────────────────────────────────────────────────────────

/// Owns the grant collection and every state transition on it.
///
/// Each mutating call is atomic: validation runs first, the new state is
/// committed in a single store transaction, and a failing value transfer
/// rolls the commit back. Mutating calls from different threads wait for
/// each other and run one at a time. A call made from inside the
/// value-transfer facility while its own call is still running is rejected
/// with `VaultError::Reentrant`.
pub struct GrantRegistry {
    db: Arc<StateDb>,
    access: AccessControl,
    clock: Arc<dyn Clock>,
    transfer: Arc<dyn ValueTransfer>,
    sink: Arc<dyn EventSink>,
    serial: Mutex<()>,
    holder: Mutex<Option<ThreadId>>,
}

impl GrantRegistry {
    /// Bind a registry to `db`. The first construction on a store records the
    /// owner; later constructions must name the same owner.
    pub fn new(
        db: Arc<StateDb>,
        config: &VaultConfig,
        clock: Arc<dyn Clock>,
        transfer: Arc<dyn ValueTransfer>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, VaultError> {
        db.init_owner(&config.owner)?;
        info!(
            owner = %config.owner,
            withdraw_policy = %config.withdraw_policy,
            grants = db.grant_count()?,
            "grant registry ready"
        );
        Ok(Self {
            db,
            access: AccessControl::new(config),
            clock,
            transfer,
            sink,
            serial: Mutex::new(()),
            holder: Mutex::new(None),
        })
    }

    /// Wait for any call on another thread to finish, then claim the registry.
    /// Only the thread already inside a call can see itself as the holder.
    fn enter(&self) -> Result<CallGuard<'_>, VaultError> {
        let me = thread::current().id();
        if *lock(&self.holder) == Some(me) {
            return Err(VaultError::Reentrant);
        }
        let serial = lock(&self.serial);
        *lock(&self.holder) = Some(me);
        Ok(CallGuard { holder: &self.holder, _serial: serial })
    }

    // ── Mutations ─────────────────────────────────────────────────────────────

    /// Deposit `ctx.value` from `ctx.caller` for `beneficiary`, releasable at
    /// or after `unlock_at`. Returns the new grant's id.
    pub fn offer_grant(
        &self,
        ctx: &CallContext,
        beneficiary: &AccountId,
        unlock_at: Timestamp,
    ) -> Result<GrantId, VaultError> {
        let _guard = self.enter()?;
        let now = self.clock.now();

        if let Err(e) = validate_offer(ctx.value, beneficiary, unlock_at, now) {
            debug!(donor = %ctx.caller, amount = ctx.value, unlock_at, now, error = %e, "offer rejected");
            return Err(e);
        }

        // ── Stage ─────────────────────────────────────────────────────────────
        let id = self.db.next_grant_id()?;
        let custody = self
            .db
            .custody()?
            .checked_add(ctx.value)
            .ok_or(VaultError::BalanceOverflow)?;
        let grant = Grant::new(
            id,
            ctx.caller.clone(),
            beneficiary.clone(),
            ctx.value,
            unlock_at,
            now,
        );

        // ── Inbound value, then commit ────────────────────────────────────────
        self.transfer.take_custody(&ctx.caller, ctx.value)?;

        if let Err(e) = self.db.commit_new_grant(&grant, custody) {
            warn!(grant_id = id.0, error = %e, "grant commit failed; returning deposit");
            if let Err(refund) = self.transfer.release(&ctx.caller, ctx.value) {
                error!(
                    donor = %ctx.caller,
                    amount = ctx.value,
                    error = %refund,
                    "deposit refund failed after aborted grant commit"
                );
                return Err(VaultError::RefundFailed {
                    amount: ctx.value,
                    commit: e.to_string(),
                    refund: refund.to_string(),
                });
            }
            return Err(e);
        }

        info!(grant_id = id.0, donor = %grant.donor, amount = grant.amount, unlock_at, "grant offered");
        self.publish(VaultEvent::GrantOffered {
            grant_id: id,
            donor: grant.donor,
            beneficiary: grant.beneficiary,
            amount: grant.amount,
            unlock_at,
            at: now,
        });
        Ok(id)
    }

    /// Release grant `id` to its beneficiary.
    ///
    /// The withdrawn flag is committed before the outbound transfer runs; if
    /// the transfer fails the flag and custody are restored.
    pub fn withdraw(&self, caller: &AccountId, id: GrantId) -> Result<(), VaultError> {
        let _guard = self.enter()?;
        let now = self.clock.now();

        let original = self.db.get_grant(id)?.ok_or(VaultError::NotFound(id))?;
        if original.withdrawn {
            return Err(VaultError::AlreadyWithdrawn(id));
        }
        if !original.is_unlocked(now) {
            return Err(VaultError::NotYetUnlocked {
                unlock_at: original.unlock_at,
            });
        }
        if let Err(e) = self.access.authorize_withdraw(caller, &original) {
            warn!(grant_id = id.0, caller = %caller, policy = %self.access.withdraw_policy(), "withdraw not authorized");
            return Err(e);
        }

        // ── Stage ─────────────────────────────────────────────────────────────
        let custody_before = self.db.custody()?;
        let custody_after = custody_before.checked_sub(original.amount).ok_or(
            VaultError::CustodyMismatch {
                recorded: custody_before,
                expected: original.amount,
            },
        )?;
        let mut grant = original.clone();
        grant.mark_withdrawn(now)?;

        // ── Commit, then outbound value ───────────────────────────────────────
        self.db.commit_grant_update(&grant, custody_after)?;

        if let Err(e) = self.transfer.release(&grant.beneficiary, grant.amount) {
            warn!(grant_id = id.0, error = %e, "payout failed; rolling back withdrawal");
            if let Err(rollback) = self.db.commit_grant_update(&original, custody_before) {
                error!(grant_id = id.0, error = %rollback, "withdrawal rollback failed");
                return Err(rollback);
            }
            return Err(e);
        }

        info!(grant_id = id.0, beneficiary = %grant.beneficiary, amount = grant.amount, "grant withdrawn");
        self.publish(VaultEvent::GrantWithdrawn {
            grant_id: id,
            beneficiary: grant.beneficiary,
            amount: grant.amount,
            by: caller.clone(),
            at: now,
        });
        Ok(())
    }

    fn publish(&self, event: VaultEvent) {
        if let Err(e) = self.db.append_event(&event) {
            warn!(
                kind = event.kind(),
                grant_id = event.grant_id().0,
                amount = event.amount(),
                error = %e,
                "event log append failed"
            );
        }
        self.sink.emit(&event);
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn owner(&self) -> &AccountId {
        self.access.owner()
    }

    pub fn withdraw_policy(&self) -> WithdrawPolicy {
        self.access.withdraw_policy()
    }

    /// Current clock reading as the registry sees it.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn grant(&self, id: GrantId) -> Result<Grant, VaultError> {
        self.db.get_grant(id)?.ok_or(VaultError::NotFound(id))
    }

    /// Like [`grant`](Self::grant) but an unknown id is `None`, not an error.
    pub fn find_grant(&self, id: GrantId) -> Result<Option<Grant>, VaultError> {
        GrantQuery::new(&self.db).get(id)
    }

    pub fn grant_count(&self) -> Result<u64, VaultError> {
        self.db.grant_count()
    }

    /// Grants in id order. `limit` is capped at `MAX_PAGE_SIZE`.
    pub fn grants(&self, offset: u32, limit: u32) -> Result<Vec<Grant>, VaultError> {
        self.db
            .iter_grants(offset as usize, limit.min(MAX_PAGE_SIZE) as usize)
    }

    pub fn grants_for_beneficiary(&self, account: &AccountId) -> Result<Vec<Grant>, VaultError> {
        self.db.grants_where(|g| g.beneficiary == *account)
    }

    pub fn grants_for_donor(&self, account: &AccountId) -> Result<Vec<Grant>, VaultError> {
        self.db.grants_where(|g| g.donor == *account)
    }

    pub fn custody(&self) -> Result<Balance, VaultError> {
        self.db.custody()
    }

    pub fn events(&self, offset: u32, limit: u32) -> Result<Vec<VaultEvent>, VaultError> {
        self.db
            .iter_events(offset as usize, limit.min(MAX_PAGE_SIZE) as usize)
    }

    pub fn event_count(&self) -> Result<u64, VaultError> {
        self.db.event_count()
    }

    /// Spendable ledger balance of `account`. Value held for grants is not
    /// counted here.
    pub fn balance(&self, account: &AccountId) -> Result<Balance, VaultError> {
        self.db.balance(account)
    }

    pub fn is_unlocked(&self, id: GrantId) -> Result<bool, VaultError> {
        GrantQuery::new(&self.db).is_unlocked(id, self.clock.now())
    }

    pub fn describe(&self, id: GrantId) -> Result<String, VaultError> {
        GrantQuery::new(&self.db).describe(id, self.clock.now())
    }

    /// Check that recorded custody equals the sum of active grant amounts.
    /// Returns the custody balance when it does.
    pub fn audit(&self) -> Result<Balance, VaultError> {
        let expected = self
            .db
            .grants_where(Grant::is_active)?
            .iter()
            .try_fold(0u128, |acc, g| acc.checked_add(g.amount))
            .ok_or(VaultError::BalanceOverflow)?;
        let recorded = self.db.custody()?;
        if recorded != expected {
            return Err(VaultError::CustodyMismatch { recorded, expected });
        }
        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{OnceLock, Weak};

    use rand::Rng;
    use vault_core::constants::UNITS_PER_COIN;

    use crate::clock::ManualClock;
    use crate::events::MemorySink;
    use crate::transfer::LedgerTransfer;

    const NOW: i64 = 1_700_000_000;

    fn temp_db(name: &str) -> Arc<StateDb> {
        let dir = std::env::temp_dir()
            .join(format!("vault_registry_test_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        Arc::new(StateDb::open(&dir).expect("open temp db"))
    }

    struct Harness {
        registry: GrantRegistry,
        clock: Arc<ManualClock>,
        ledger: Arc<LedgerTransfer>,
        sink: Arc<MemorySink>,
        owner: AccountId,
    }

    fn harness(name: &str, policy: WithdrawPolicy) -> Harness {
        let db = temp_db(name);
        let owner = AccountId::from_label("owner");
        let clock = Arc::new(ManualClock::new(NOW));
        let ledger = Arc::new(LedgerTransfer::new(Arc::clone(&db)));
        let sink = Arc::new(MemorySink::new());
        let registry = GrantRegistry::new(
            db,
            &VaultConfig::new(owner.clone()).with_policy(policy),
            clock.clone(),
            ledger.clone(),
            sink.clone(),
        )
        .expect("registry");
        Harness { registry, clock, ledger, sink, owner }
    }

    fn funded(h: &Harness, label: &str, amount: Balance) -> AccountId {
        let id = AccountId::from_label(label);
        h.ledger.fund(&id, amount).unwrap();
        id
    }

    // ── offer_grant ───────────────────────────────────────────────────────────

    #[test]
    fn offer_stores_exact_fields() {
        let h = harness("offer_fields", WithdrawPolicy::Owner);
        let donor = funded(&h, "donor", 10 * UNITS_PER_COIN);
        let beneficiary = AccountId::from_label("beneficiary");

        let id = h
            .registry
            .offer_grant(&CallContext::new(donor.clone(), 3 * UNITS_PER_COIN), &beneficiary, NOW + 1_000)
            .unwrap();

        assert_eq!(id, GrantId(0));
        let g = h.registry.grant(id).unwrap();
        assert_eq!(g.donor, donor);
        assert_eq!(g.beneficiary, beneficiary);
        assert_eq!(g.amount, 3 * UNITS_PER_COIN);
        assert_eq!(g.unlock_at, NOW + 1_000);
        assert_eq!(g.created_at, NOW);
        assert!(!g.withdrawn);
        assert_eq!(h.registry.custody().unwrap(), 3 * UNITS_PER_COIN);
        assert_eq!(h.ledger.balance(&donor).unwrap(), 7 * UNITS_PER_COIN);
        assert_eq!(h.sink.len(), 1);
    }

    #[test]
    fn ids_are_sequential() {
        let h = harness("offer_seq", WithdrawPolicy::Owner);
        let donor = funded(&h, "donor", 100);
        let b = AccountId::from_label("b");
        for expected in 0..4u64 {
            let id = h
                .registry
                .offer_grant(&CallContext::new(donor.clone(), 5), &b, NOW + 10)
                .unwrap();
            assert_eq!(id, GrantId(expected));
        }
        assert_eq!(h.registry.grant_count().unwrap(), 4);
    }

    #[test]
    fn zero_amount_rejected() {
        let h = harness("offer_zero", WithdrawPolicy::Owner);
        let donor = funded(&h, "donor", 100);
        let err = h
            .registry
            .offer_grant(&CallContext::bare(donor), &AccountId::from_label("b"), NOW + 1_000)
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidAmount));
    }

    #[test]
    fn zero_amount_reported_before_null_beneficiary() {
        let h = harness("offer_zero_null", WithdrawPolicy::Owner);
        let donor = funded(&h, "donor", 100);
        let err = h
            .registry
            .offer_grant(&CallContext::bare(donor), &AccountId::ZERO, NOW + 1_000)
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidAmount));
    }

    #[test]
    fn null_beneficiary_rejected() {
        let h = harness("offer_null", WithdrawPolicy::Owner);
        let donor = funded(&h, "donor", 100);
        let err = h
            .registry
            .offer_grant(&CallContext::new(donor, 10), &AccountId::ZERO, NOW + 1_000)
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidBeneficiary));
    }

    #[test]
    fn unlock_not_in_future_rejected() {
        let h = harness("offer_past", WithdrawPolicy::Owner);
        let donor = funded(&h, "donor", 100);
        let b = AccountId::from_label("b");
        for unlock_at in [NOW - 3_600, NOW - 1, NOW] {
            let err = h
                .registry
                .offer_grant(&CallContext::new(donor.clone(), 10), &b, unlock_at)
                .unwrap_err();
            assert!(
                matches!(err, VaultError::UnlockTimeNotFuture { now: NOW, .. }),
                "unlock_at {unlock_at}: {err}"
            );
        }
    }

    #[test]
    fn failed_offers_leave_no_trace() {
        let h = harness("offer_no_trace", WithdrawPolicy::Owner);
        let donor = funded(&h, "donor", 50);
        let b = AccountId::from_label("b");

        let attempts = [
            (CallContext::bare(donor.clone()), b.clone(), NOW + 10),
            (CallContext::new(donor.clone(), 10), AccountId::ZERO, NOW + 10),
            (CallContext::new(donor.clone(), 10), b.clone(), NOW),
            (CallContext::new(donor.clone(), 51), b.clone(), NOW + 10),
        ];
        for (ctx, beneficiary, unlock_at) in &attempts {
            assert!(h.registry.offer_grant(ctx, beneficiary, *unlock_at).is_err());
        }

        assert_eq!(h.registry.grant_count().unwrap(), 0);
        assert_eq!(h.registry.custody().unwrap(), 0);
        assert_eq!(h.ledger.balance(&donor).unwrap(), 50);
        assert!(h.sink.is_empty());
        assert_eq!(h.registry.event_count().unwrap(), 0);
    }

    #[test]
    fn offer_without_funds_is_insufficient_balance() {
        let h = harness("offer_broke", WithdrawPolicy::Owner);
        let donor = AccountId::from_label("broke");
        let err = h
            .registry
            .offer_grant(&CallContext::new(donor, 1), &AccountId::from_label("b"), NOW + 10)
            .unwrap_err();
        assert!(matches!(err, VaultError::InsufficientBalance { need: 1, have: 0 }));
        assert_eq!(h.registry.grant_count().unwrap(), 0);
    }

    // ── withdraw ──────────────────────────────────────────────────────────────

    #[test]
    fn withdraw_before_unlock_rejected() {
        let h = harness("wd_early", WithdrawPolicy::Owner);
        let donor = funded(&h, "donor", 100);
        let id = h
            .registry
            .offer_grant(&CallContext::new(donor, 100), &AccountId::from_label("b"), NOW + 1_000)
            .unwrap();

        h.clock.advance(999);
        let err = h.registry.withdraw(&h.owner, id).unwrap_err();
        assert!(matches!(err, VaultError::NotYetUnlocked { unlock_at } if unlock_at == NOW + 1_000));
        assert!(!h.registry.grant(id).unwrap().withdrawn);
        assert_eq!(h.registry.custody().unwrap(), 100);
    }

    #[test]
    fn withdraw_at_exact_unlock_time_succeeds() {
        let h = harness("wd_exact", WithdrawPolicy::Owner);
        let donor = funded(&h, "donor", 100);
        let b = AccountId::from_label("b");
        let id = h
            .registry
            .offer_grant(&CallContext::new(donor, 100), &b, NOW + 1_000)
            .unwrap();
        h.clock.set(NOW + 1_000);
        h.registry.withdraw(&h.owner, id).unwrap();
        assert_eq!(h.ledger.balance(&b).unwrap(), 100);
    }

    #[test]
    fn withdraw_unknown_grant_not_found() {
        let h = harness("wd_missing", WithdrawPolicy::Owner);
        let err = h.registry.withdraw(&h.owner, GrantId(42)).unwrap_err();
        assert!(matches!(err, VaultError::NotFound(GrantId(42))));
        assert!(matches!(h.registry.grant(GrantId(42)).unwrap_err(), VaultError::NotFound(_)));
    }

    #[test]
    fn deposit_withdraw_scenario() {
        let h = harness("wd_scenario", WithdrawPolicy::Owner);
        let amount = UNITS_PER_COIN;
        let donor = funded(&h, "donor", amount);
        let b = AccountId::from_label("B");

        let id = h
            .registry
            .offer_grant(&CallContext::new(donor, amount), &b, NOW + 1_000)
            .unwrap();
        assert_eq!(id, GrantId(0));
        assert!(!h.registry.grant(id).unwrap().withdrawn);

        h.clock.set(NOW + 1_001);
        h.registry.withdraw(&h.owner, id).unwrap();

        assert_eq!(h.ledger.balance(&b).unwrap(), amount);
        let g = h.registry.grant(id).unwrap();
        assert!(g.withdrawn);
        assert_eq!(g.withdrawn_at, Some(NOW + 1_001));
        assert_eq!(h.registry.custody().unwrap(), 0);

        let err = h.registry.withdraw(&h.owner, id).unwrap_err();
        assert!(matches!(err, VaultError::AlreadyWithdrawn(GrantId(0))));
        assert_eq!(h.ledger.balance(&b).unwrap(), amount, "second call must not pay out");

        let events = h.sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            VaultEvent::GrantWithdrawn { grant_id: GrantId(0), amount: a, .. } if *a == amount
        ));
        assert_eq!(h.registry.events(0, 10).unwrap(), events);
    }

    #[test]
    fn owner_policy_rejects_beneficiary() {
        let h = harness("wd_owner_only", WithdrawPolicy::Owner);
        let donor = funded(&h, "donor", 100);
        let b = AccountId::from_label("b");
        let id = h
            .registry
            .offer_grant(&CallContext::new(donor.clone(), 100), &b, NOW + 10)
            .unwrap();
        h.clock.advance(10);

        for caller in [&b, &donor] {
            let err = h.registry.withdraw(caller, id).unwrap_err();
            assert!(matches!(err, VaultError::Unauthorized));
        }
        assert!(!h.registry.grant(id).unwrap().withdrawn);
        h.registry.withdraw(&h.owner, id).unwrap();
    }

    #[test]
    fn beneficiary_policy_lets_beneficiary_withdraw() {
        let h = harness("wd_beneficiary", WithdrawPolicy::Beneficiary);
        let donor = funded(&h, "donor", 100);
        let b = AccountId::from_label("b");
        let id = h
            .registry
            .offer_grant(&CallContext::new(donor, 100), &b, NOW + 10)
            .unwrap();
        h.clock.advance(10);

        assert!(matches!(h.registry.withdraw(&h.owner, id).unwrap_err(), VaultError::Unauthorized));
        h.registry.withdraw(&b, id).unwrap();
        assert_eq!(h.ledger.balance(&b).unwrap(), 100);
    }

    #[test]
    fn already_withdrawn_reported_before_authorization() {
        let h = harness("wd_order", WithdrawPolicy::Owner);
        let donor = funded(&h, "donor", 100);
        let id = h
            .registry
            .offer_grant(&CallContext::new(donor, 100), &AccountId::from_label("b"), NOW + 10)
            .unwrap();
        h.clock.advance(10);
        h.registry.withdraw(&h.owner, id).unwrap();

        let err = h.registry.withdraw(&AccountId::from_label("mallory"), id).unwrap_err();
        assert!(matches!(err, VaultError::AlreadyWithdrawn(_)));
    }

    // ── Failing / re-entrant value transfer ───────────────────────────────────

    struct FlakyTransfer {
        inner: LedgerTransfer,
        fail_release: AtomicBool,
    }

    impl ValueTransfer for FlakyTransfer {
        fn take_custody(&self, from: &AccountId, amount: Balance) -> Result<(), VaultError> {
            self.inner.take_custody(from, amount)
        }

        fn release(&self, to: &AccountId, amount: Balance) -> Result<(), VaultError> {
            if self.fail_release.load(Ordering::SeqCst) {
                return Err(VaultError::TransferFailed("recipient rejected".into()));
            }
            self.inner.release(to, amount)
        }
    }

    #[test]
    fn failed_payout_rolls_back_withdrawal() {
        let db = temp_db("wd_rollback");
        let owner = AccountId::from_label("owner");
        let clock = Arc::new(ManualClock::new(NOW));
        let transfer = Arc::new(FlakyTransfer {
            inner: LedgerTransfer::new(Arc::clone(&db)),
            fail_release: AtomicBool::new(true),
        });
        let sink = Arc::new(MemorySink::new());
        let registry = GrantRegistry::new(
            Arc::clone(&db),
            &VaultConfig::new(owner.clone()),
            clock.clone(),
            transfer.clone(),
            sink.clone(),
        )
        .unwrap();

        let donor = AccountId::from_label("donor");
        let b = AccountId::from_label("b");
        db.credit(&donor, 100).unwrap();
        let id = registry
            .offer_grant(&CallContext::new(donor, 100), &b, NOW + 10)
            .unwrap();
        clock.advance(10);

        let err = registry.withdraw(&owner, id).unwrap_err();
        assert!(matches!(err, VaultError::TransferFailed(_)));
        let g = registry.grant(id).unwrap();
        assert!(!g.withdrawn);
        assert_eq!(g.withdrawn_at, None);
        assert_eq!(registry.custody().unwrap(), 100);
        assert_eq!(db.balance(&b).unwrap(), 0);
        assert_eq!(sink.len(), 1, "only the offer event");

        transfer.fail_release.store(false, Ordering::SeqCst);
        registry.withdraw(&owner, id).unwrap();
        assert_eq!(db.balance(&b).unwrap(), 100);
        assert_eq!(registry.audit().unwrap(), 0);
    }

    /// Tries to withdraw the same grant again from inside the payout.
    struct ReentrantTransfer {
        inner: LedgerTransfer,
        registry: OnceLock<Weak<GrantRegistry>>,
        nested: Mutex<Vec<String>>,
    }

    impl ValueTransfer for ReentrantTransfer {
        fn take_custody(&self, from: &AccountId, amount: Balance) -> Result<(), VaultError> {
            self.inner.take_custody(from, amount)
        }

        fn release(&self, to: &AccountId, amount: Balance) -> Result<(), VaultError> {
            if let Some(registry) = self.registry.get().and_then(Weak::upgrade) {
                let nested = match registry.withdraw(to, GrantId(0)) {
                    Ok(()) => "ok".to_string(),
                    Err(e) => e.to_string(),
                };
                self.nested.lock().unwrap().push(nested);
            }
            self.inner.release(to, amount)
        }
    }

    #[test]
    fn payout_cannot_reenter_withdraw() {
        let db = temp_db("wd_reentrant");
        let b = AccountId::from_label("b");
        let transfer = Arc::new(ReentrantTransfer {
            inner: LedgerTransfer::new(Arc::clone(&db)),
            registry: OnceLock::new(),
            nested: Mutex::new(Vec::new()),
        });
        let clock = Arc::new(ManualClock::new(NOW));
        let registry = Arc::new(
            GrantRegistry::new(
                Arc::clone(&db),
                &VaultConfig::new(b.clone()).with_policy(WithdrawPolicy::Beneficiary),
                clock.clone(),
                transfer.clone(),
                Arc::new(MemorySink::new()),
            )
            .unwrap(),
        );
        let _ = transfer.registry.set(Arc::downgrade(&registry));

        let donor = AccountId::from_label("donor");
        db.credit(&donor, 100).unwrap();
        registry
            .offer_grant(&CallContext::new(donor, 100), &b, NOW + 10)
            .unwrap();
        clock.advance(10);

        registry.withdraw(&b, GrantId(0)).unwrap();

        let nested = transfer.nested.lock().unwrap().clone();
        assert_eq!(nested.len(), 1);
        assert!(nested[0].contains("re-entrant"), "{}", nested[0]);
        assert_eq!(db.balance(&b).unwrap(), 100, "paid exactly once");
        assert_eq!(registry.audit().unwrap(), 0);

        // Guard is released once the outer call returns.
        assert!(matches!(
            registry.withdraw(&b, GrantId(0)).unwrap_err(),
            VaultError::AlreadyWithdrawn(_)
        ));
    }

    /// Records a rival grant during `take_custody`, so the registry's own
    /// commit finds its id taken. Refunds can be made to fail as well.
    struct RacingTransfer {
        db: Arc<StateDb>,
        inner: LedgerTransfer,
        fail_refund: bool,
    }

    impl ValueTransfer for RacingTransfer {
        fn take_custody(&self, from: &AccountId, amount: Balance) -> Result<(), VaultError> {
            self.inner.take_custody(from, amount)?;
            let id = self.db.next_grant_id()?;
            let rival = Grant::new(id, from.clone(), AccountId::from_label("rival"), 1, NOW + 5, NOW);
            self.db.commit_new_grant(&rival, self.db.custody()? + 1)
        }

        fn release(&self, to: &AccountId, amount: Balance) -> Result<(), VaultError> {
            if self.fail_refund {
                return Err(VaultError::TransferFailed("refund path down".into()));
            }
            self.inner.release(to, amount)
        }
    }

    fn racing_registry(name: &str, fail_refund: bool) -> (GrantRegistry, Arc<StateDb>) {
        let db = temp_db(name);
        let transfer = Arc::new(RacingTransfer {
            db: Arc::clone(&db),
            inner: LedgerTransfer::new(Arc::clone(&db)),
            fail_refund,
        });
        let registry = GrantRegistry::new(
            Arc::clone(&db),
            &VaultConfig::new(AccountId::from_label("owner")),
            Arc::new(ManualClock::new(NOW)),
            transfer,
            Arc::new(MemorySink::new()),
        )
        .unwrap();
        (registry, db)
    }

    #[test]
    fn aborted_commit_refunds_deposit() {
        let (registry, db) = racing_registry("commit_refund", false);
        let donor = AccountId::from_label("donor");
        db.credit(&donor, 100).unwrap();

        let err = registry
            .offer_grant(&CallContext::new(donor.clone(), 40), &AccountId::from_label("b"), NOW + 10)
            .unwrap_err();
        assert!(matches!(err, VaultError::Storage(_)), "{err}");
        assert_eq!(db.balance(&donor).unwrap(), 100);
        assert_eq!(registry.event_count().unwrap(), 0);
    }

    #[test]
    fn aborted_commit_with_failed_refund_reports_both() {
        let (registry, db) = racing_registry("commit_no_refund", true);
        let donor = AccountId::from_label("donor");
        db.credit(&donor, 100).unwrap();

        let err = registry
            .offer_grant(&CallContext::new(donor.clone(), 40), &AccountId::from_label("b"), NOW + 10)
            .unwrap_err();
        match err {
            VaultError::RefundFailed { amount, commit, refund } => {
                assert_eq!(amount, 40);
                assert!(commit.contains("not the next id"), "{commit}");
                assert!(refund.contains("refund path down"), "{refund}");
            }
            other => panic!("expected RefundFailed, got {other}"),
        }
        assert_eq!(db.balance(&donor).unwrap(), 60);
    }

    // ── Concurrency ───────────────────────────────────────────────────────────

    #[test]
    fn concurrent_offers_all_succeed() {
        let h = harness("concurrent_offers", WithdrawPolicy::Owner);
        let b = AccountId::from_label("b");
        let donors: Vec<AccountId> = (0..8).map(|i| funded(&h, &format!("donor{i}"), 50)).collect();

        std::thread::scope(|s| {
            for donor in &donors {
                let (registry, b) = (&h.registry, &b);
                s.spawn(move || {
                    for _ in 0..50 {
                        registry
                            .offer_grant(&CallContext::new(donor.clone(), 1), b, NOW + 1_000)
                            .expect("valid offer");
                    }
                });
            }
        });

        assert_eq!(h.registry.grant_count().unwrap(), 400);
        assert_eq!(h.registry.audit().unwrap(), 400);
        assert_eq!(h.sink.len(), 400);
        for donor in &donors {
            assert_eq!(h.registry.balance(donor).unwrap(), 0);
        }
    }

    #[test]
    fn concurrent_withdrawals_pay_each_grant_once() {
        let h = harness("concurrent_withdraw", WithdrawPolicy::Anyone);
        let donor = funded(&h, "donor", 100);
        let b = AccountId::from_label("b");
        for _ in 0..10 {
            h.registry
                .offer_grant(&CallContext::new(donor.clone(), 10), &b, NOW + 5)
                .unwrap();
        }
        h.clock.advance(5);

        let successes = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for id in 0..10u64 {
                        match h.registry.withdraw(&h.owner, GrantId(id)) {
                            Ok(()) => {
                                successes.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(e) => assert!(matches!(e, VaultError::AlreadyWithdrawn(_)), "{e}"),
                        }
                    }
                });
            }
        });

        assert_eq!(successes.load(Ordering::SeqCst), 10);
        assert_eq!(h.registry.balance(&b).unwrap(), 100);
        assert_eq!(h.registry.audit().unwrap(), 0);
    }

    // ── Owner / persistence ───────────────────────────────────────────────────

    #[test]
    fn owner_is_fixed_for_the_store() {
        let db = temp_db("owner_fixed");
        let alice = AccountId::from_label("alice");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(NOW));
        let transfer: Arc<dyn ValueTransfer> = Arc::new(LedgerTransfer::new(Arc::clone(&db)));
        let sink: Arc<dyn EventSink> = Arc::new(MemorySink::new());

        let first = GrantRegistry::new(
            Arc::clone(&db),
            &VaultConfig::new(alice.clone()),
            clock.clone(),
            transfer.clone(),
            sink.clone(),
        )
        .unwrap();
        assert_eq!(first.owner(), &alice);

        let err = GrantRegistry::new(
            Arc::clone(&db),
            &VaultConfig::new(AccountId::from_label("bob")),
            clock.clone(),
            transfer.clone(),
            sink.clone(),
        )
        .err()
        .expect("different owner must be refused");
        assert!(matches!(err, VaultError::OwnerMismatch { .. }));

        // Same owner on the same store picks up existing grants.
        db.credit(&alice, 10).unwrap();
        first
            .offer_grant(&CallContext::new(alice.clone(), 10), &AccountId::from_label("b"), NOW + 5)
            .unwrap();
        let again = GrantRegistry::new(db, &VaultConfig::new(alice), clock, transfer, sink).unwrap();
        assert_eq!(again.grant_count().unwrap(), 1);
        assert_eq!(again.custody().unwrap(), 10);
    }

    // ── Custody invariant ─────────────────────────────────────────────────────

    #[test]
    fn custody_matches_active_grants_under_random_activity() {
        let h = harness("custody_random", WithdrawPolicy::Anyone);
        let mut rng = rand::thread_rng();
        let donors: Vec<AccountId> = (0..4)
            .map(|i| funded(&h, &format!("donor{i}"), 1_000_000))
            .collect();
        let beneficiaries: Vec<AccountId> = (0..3)
            .map(|i| AccountId::from_label(&format!("beneficiary{i}")))
            .collect();

        let mut paid_out: Balance = 0;
        for _ in 0..200 {
            if rng.gen_bool(0.6) {
                let donor = &donors[rng.gen_range(0..donors.len())];
                let b = if rng.gen_bool(0.1) {
                    AccountId::ZERO
                } else {
                    beneficiaries[rng.gen_range(0..beneficiaries.len())].clone()
                };
                let amount: Balance = rng.gen_range(0..500);
                let unlock_at = h.registry.now() + rng.gen_range(-5i64..50);
                let _ = h
                    .registry
                    .offer_grant(&CallContext::new(donor.clone(), amount), &b, unlock_at);
            } else {
                let count = h.registry.grant_count().unwrap();
                if count > 0 {
                    let id = GrantId(rng.gen_range(0..count));
                    let before = h.registry.grant(id).unwrap();
                    if h.registry.withdraw(&h.owner, id).is_ok() {
                        assert!(!before.withdrawn);
                        paid_out += before.amount;
                    }
                }
            }
            h.clock.advance(rng.gen_range(0i64..5));
            h.registry.audit().expect("custody invariant");
        }

        let total_in: Balance = h
            .registry
            .grants(0, MAX_PAGE_SIZE)
            .unwrap()
            .iter()
            .map(|g| g.amount)
            .sum();
        let received: Balance = beneficiaries
            .iter()
            .map(|b| h.ledger.balance(b).unwrap())
            .sum();
        assert_eq!(received, paid_out);
        assert_eq!(h.registry.custody().unwrap() + paid_out, total_in);
    }
}
