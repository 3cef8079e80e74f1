//! Account provisioning and closure

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::Account;
use crate::repositories::AccountStore;
use crate::services::audit::AuditTrail;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditTrail>>,
}

impl AccountService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
        audit: Option<Arc<AuditTrail>>,
    ) -> Self {
        Self {
            accounts,
            clock,
            audit,
        }
    }

    /// Open an account with zero balances for `owner_ref`
    pub async fn provision(&self, owner_ref: &str) -> AppResult<Account> {
        let owner_ref = owner_ref.trim();
        if owner_ref.is_empty() {
            return Err(AppError::Validation("owner reference cannot be empty".to_string()));
        }

        let account = self
            .accounts
            .create_account(Account::new(owner_ref, self.clock.now()))
            .await?;
        info!("Provisioned account {} for {}", account.id, owner_ref);
        Ok(account)
    }

    pub async fn find_by_owner(&self, owner_ref: &str) -> AppResult<Option<Account>> {
        Ok(self.accounts.find_account_by_owner(owner_ref).await?)
    }

    /// Store the processor's customer and payout destination ids; `None`
    /// leaves the existing value
    pub async fn link_processor_ids(
        &self,
        account_id: Uuid,
        customer_id: Option<&str>,
        payout_id: Option<&str>,
    ) -> AppResult<Account> {
        let account = self
            .accounts
            .link_processor_ids(
                account_id,
                customer_id.map(str::to_string),
                payout_id.map(str::to_string),
            )
            .await?;
        info!("Linked processor ids for account {}", account_id);
        Ok(account)
    }

    /// Close an account with nothing left in it. Records and positions stay.
    pub async fn close(&self, account_id: Uuid) -> AppResult<Account> {
        let account = self.accounts.close_account(account_id, self.clock.now()).await?;

        if let Some(audit) = &self.audit {
            audit.log_account_closed(account.id, &account.owner_ref).await?;
        }
        info!("Closed account {}", account_id);
        Ok(account)
    }
}
