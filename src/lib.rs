pub mod accrual;
pub mod api;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod services;
pub mod validation;

pub use accrual::{AccrualApi, AccrualClient, AccrualClientConfig, Cooldown};
pub use config::AppConfig;
pub use coordination::{Shutdown, ShutdownListener};
pub use error::{AccrualError, LedgerError, Result};
pub use persistence::{LedgerStore, MemoryStore, OrderStore, PostgresStore, UserStore};
pub use services::{
    OrderService, Reconciler, ReconcilerConfig, StatsSnapshot, Transition, UserService,
    WithdrawalService,
};
