pub mod orders;
pub mod reconciler;
pub mod users;
pub mod withdrawals;

pub use orders::{OrderService, Transition};
pub use reconciler::{Reconciler, ReconcilerConfig, ReconcilerStats, StatsSnapshot};
pub use users::{PasswordHasher, UserService};
pub use withdrawals::WithdrawalService;
