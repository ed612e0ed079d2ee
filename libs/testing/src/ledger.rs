use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use grid_id::{ContractId, GroupId, TwinId};
use grid_reconcile::{ContractState, Ledger, LedgerError};

#[derive(Default)]
struct Inner {
    balances: HashMap<TwinId, u128>,
    invalid: BTreeSet<ContractId>,
    unavailable: bool,
    next_group: u32,
    groups: BTreeMap<GroupId, TwinId>,
    balance_checks: u32,
}

/// In-memory [`Ledger`].
///
/// Every contract is valid until invalidated. Accounts without a balance
/// are unknown.
#[derive(Default)]
pub struct FakeLedger {
    inner: Mutex<Inner>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger where `twin` holds plenty of funds.
    pub fn funded(twin: TwinId) -> Self {
        let ledger = Self::new();
        ledger.set_balance(twin, 1_000_000);
        ledger
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_balance(&self, twin: TwinId, balance: u128) {
        self.inner().balances.insert(twin, balance);
    }

    /// Expire a contract out of band.
    pub fn invalidate(&self, contract_id: ContractId) {
        self.inner().invalid.insert(contract_id);
    }

    /// Make every lookup fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner().unavailable = unavailable;
    }

    /// Delete a group out of band.
    pub fn drop_group(&self, group_id: GroupId) {
        self.inner().groups.remove(&group_id);
    }

    pub fn groups(&self) -> BTreeMap<GroupId, TwinId> {
        self.inner().groups.clone()
    }

    pub fn balance_checks(&self) -> u32 {
        self.inner().balance_checks
    }

    fn check_available(inner: &Inner) -> Result<(), LedgerError> {
        if inner.unavailable {
            return Err(LedgerError::Transport("ledger unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn contract_state(&self, contract_id: ContractId) -> Result<ContractState, LedgerError> {
        let inner = self.inner();
        Self::check_available(&inner)?;
        if inner.invalid.contains(&contract_id) {
            Ok(ContractState::Invalid)
        } else {
            Ok(ContractState::Valid)
        }
    }

    async fn account_balance(&self, identity: TwinId) -> Result<u128, LedgerError> {
        let mut inner = self.inner();
        inner.balance_checks += 1;
        Self::check_available(&inner)?;
        inner
            .balances
            .get(&identity)
            .copied()
            .ok_or_else(|| LedgerError::NotFound {
                what: format!("account of twin {identity}"),
            })
    }

    async fn create_group(&self, owner: TwinId) -> Result<GroupId, LedgerError> {
        let mut inner = self.inner();
        Self::check_available(&inner)?;
        inner.next_group += 1;
        let group_id = GroupId::new(inner.next_group);
        inner.groups.insert(group_id, owner);
        Ok(group_id)
    }

    async fn get_group(&self, group_id: GroupId) -> Result<(), LedgerError> {
        let inner = self.inner();
        Self::check_available(&inner)?;
        if inner.groups.contains_key(&group_id) {
            Ok(())
        } else {
            Err(LedgerError::NotFound {
                what: format!("group {group_id}"),
            })
        }
    }

    async fn delete_group(&self, owner: TwinId, group_id: GroupId) -> Result<(), LedgerError> {
        let mut inner = self.inner();
        Self::check_available(&inner)?;
        match inner.groups.get(&group_id) {
            Some(o) if *o == owner => {}
            Some(_) => {
                return Err(LedgerError::Transport(format!(
                    "twin {owner} does not own group {group_id}"
                )))
            }
            None => {
                return Err(LedgerError::NotFound {
                    what: format!("group {group_id}"),
                })
            }
        }
        inner.groups.remove(&group_id);
        Ok(())
    }
}
