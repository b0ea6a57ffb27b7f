//! Domain types shared by every component and both storage backends.

mod account;
mod claim;
mod money;
pub(crate) mod task;
mod transaction;

pub use account::{Account, AccountStatus};
pub use claim::{Claim, ClaimState, ClaimStatus};
pub use money::{Money, ParseMoneyError};
pub use task::{NewTask, Task, TaskKind, TaskStatus};
pub use transaction::{Transaction, TxKind, TxStatus};
