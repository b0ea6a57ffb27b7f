use super::{Money, TxKind};
use crate::error::{MarketError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "suspended" => Ok(AccountStatus::Suspended),
            _ => Err(MarketError::InvalidInput(format!(
                "unknown account status {:?}",
                s
            ))),
        }
    }
}

/// A user's balance. `available_balance` never goes negative and
/// `total_earnings` only grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: Uuid,
    pub available_balance: Money,
    pub total_earnings: Money,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Account {
            user_id,
            available_balance: Money::ZERO,
            total_earnings: Money::ZERO,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn ensure_active(&self) -> Result<()> {
        match self.status {
            AccountStatus::Active => Ok(()),
            AccountStatus::Suspended => Err(MarketError::AccountSuspended(self.user_id)),
        }
    }

    /// Credit `amount`. Earnings also count toward `total_earnings`;
    /// adjustments only move the withdrawable balance.
    pub fn apply_credit(&mut self, amount: Money, kind: TxKind, now: DateTime<Utc>) -> Result<()> {
        if !amount.is_positive() {
            return Err(MarketError::InvalidAmount(format!(
                "credit must be positive, got {}",
                amount
            )));
        }
        let overflow = || MarketError::InvalidAmount(format!("credit of {} overflows", amount));
        let available = self
            .available_balance
            .checked_add(amount)
            .ok_or_else(overflow)?;
        let total = match kind {
            TxKind::Earning => self.total_earnings.checked_add(amount).ok_or_else(overflow)?,
            TxKind::Adjustment => self.total_earnings,
            TxKind::WithdrawalRequest => {
                return Err(MarketError::InvalidInput(
                    "withdrawal requests are debits, not credits".into(),
                ))
            }
        };
        self.available_balance = available;
        self.total_earnings = total;
        self.updated_at = now;
        Ok(())
    }

    /// Debit a withdrawal request. Leaves `total_earnings` alone.
    pub fn debit(&mut self, amount: Money, now: DateTime<Utc>) -> Result<()> {
        self.ensure_active()?;
        if !amount.is_positive() {
            return Err(MarketError::InvalidAmount(format!(
                "withdrawal must be positive, got {}",
                amount
            )));
        }
        if amount > self.available_balance {
            return Err(MarketError::InsufficientBalance {
                available: self.available_balance,
                requested: amount,
            });
        }
        self.available_balance = Money::from_cents(self.available_balance.cents() - amount.cents());
        self.updated_at = now;
        Ok(())
    }

    /// Return a failed withdrawal to the withdrawable balance.
    pub fn refund(&mut self, amount: Money, now: DateTime<Utc>) -> Result<()> {
        self.available_balance = self
            .available_balance
            .checked_add(amount)
            .ok_or_else(|| MarketError::InvalidAmount(format!("refund of {} overflows", amount)))?;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded(cents: i64) -> Account {
        let mut account = Account::new(Uuid::new_v4(), Utc::now());
        account
            .apply_credit(Money::from_cents(cents), TxKind::Earning, Utc::now())
            .unwrap();
        account
    }

    #[test]
    fn earnings_raise_both_counters() {
        let account = funded(500);
        assert_eq!(account.available_balance, Money::from_cents(500));
        assert_eq!(account.total_earnings, Money::from_cents(500));
    }

    #[test]
    fn adjustments_leave_total_earnings_alone() {
        let mut account = funded(500);
        account
            .apply_credit(Money::from_cents(100), TxKind::Adjustment, Utc::now())
            .unwrap();
        assert_eq!(account.available_balance, Money::from_cents(600));
        assert_eq!(account.total_earnings, Money::from_cents(500));
    }

    #[test]
    fn non_positive_credit_is_rejected() {
        let mut account = funded(100);
        assert!(account
            .apply_credit(Money::ZERO, TxKind::Earning, Utc::now())
            .is_err());
        assert!(account
            .apply_credit(Money::from_cents(-5), TxKind::Earning, Utc::now())
            .is_err());
        assert_eq!(account.available_balance, Money::from_cents(100));
    }

    #[test]
    fn overdraft_is_rejected_without_mutation() {
        let mut account = funded(1000);
        let err = account.debit(Money::from_cents(1500), Utc::now()).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientBalance { .. }));
        assert_eq!(account.available_balance, Money::from_cents(1000));

        account.debit(Money::from_cents(400), Utc::now()).unwrap();
        assert_eq!(account.available_balance, Money::from_cents(600));
        assert_eq!(account.total_earnings, Money::from_cents(1000));

        account.debit(Money::from_cents(600), Utc::now()).unwrap();
        assert_eq!(account.available_balance, Money::ZERO);
    }

    #[test]
    fn suspended_accounts_cannot_withdraw() {
        let mut account = funded(1000);
        account.status = AccountStatus::Suspended;
        assert!(matches!(
            account.debit(Money::from_cents(100), Utc::now()),
            Err(MarketError::AccountSuspended(_))
        ));
    }

    #[test]
    fn refund_restores_balance() {
        let mut account = funded(1000);
        account.debit(Money::from_cents(400), Utc::now()).unwrap();
        account.refund(Money::from_cents(400), Utc::now()).unwrap();
        assert_eq!(account.available_balance, Money::from_cents(1000));
    }
}
