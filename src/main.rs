use clap::Parser;
use points_ledger::accrual::AccrualClient;
use points_ledger::api::{create_router, AppState, SessionKeys};
use points_ledger::cli::Cli;
use points_ledger::config::AppConfig;
use points_ledger::coordination::{shutdown_signal, Shutdown};
use points_ledger::error::{LedgerError, Result};
use points_ledger::logging::init_logging;
use points_ledger::persistence::{
    LedgerStore, MemoryStore, OrderStore, PostgresStore, UserStore,
};
use points_ledger::services::{
    OrderService, PasswordHasher, Reconciler, UserService, WithdrawalService,
};
use std::sync::Arc;
use tracing::{error, info, warn};

struct Stores {
    orders: Arc<dyn OrderStore>,
    ledger: Arc<dyn LedgerStore>,
    users: Arc<dyn UserStore>,
    postgres: Option<Arc<PostgresStore>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config_dir)?;
    cli.apply(&mut config);
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        return Err(LedgerError::Validation(errors.join("; ")));
    }

    let stores = open_stores(&cli, &config).await?;

    let accrual = Arc::new(AccrualClient::new(config.accrual_client_config())?);
    info!("Using accrual system at {}", accrual.base_url());

    let order_service = Arc::new(OrderService::new(stores.orders.clone(), accrual));
    let withdrawal_service = Arc::new(WithdrawalService::new(stores.ledger.clone()));
    let user_service = Arc::new(UserService::new(
        stores.users.clone(),
        stores.ledger.clone(),
        PasswordHasher::new(config.auth.password_iterations),
    ));

    let shutdown = Arc::new(Shutdown::new());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Received shutdown signal");
            shutdown.trigger();
        });
    }

    // A reconciler that cannot read or claim orders takes the process down
    let reconciler = Reconciler::new(order_service.clone(), config.reconciler_config());
    let reconciler_task = {
        let shutdown = shutdown.clone();
        let listener = shutdown.listener();
        tokio::spawn(async move {
            let result = reconciler.run(listener).await;
            if result.is_err() && !shutdown.is_triggered() {
                shutdown.trigger();
            }
            result
        })
    };

    let state = AppState::new(
        order_service,
        withdrawal_service,
        user_service,
        SessionKeys::new(&config.auth.secret_key, config.token_ttl()),
    );
    let app = create_router(state, config.server.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.address).await?;
    info!("Listening on {}", config.server.address);

    let mut server_shutdown = shutdown.listener();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await;
    if let Err(e) = &served {
        error!("HTTP server failed: {}", e);
    }
    if !shutdown.is_triggered() {
        shutdown.trigger();
    }

    let reconciled = reconciler_task
        .await
        .map_err(|e| LedgerError::Internal(format!("reconciler task failed: {}", e)))?;

    if let Some(store) = &stores.postgres {
        store.close().await;
    }
    info!("Shutdown complete");

    served?;
    reconciled
}

async fn open_stores(cli: &Cli, config: &AppConfig) -> Result<Stores> {
    if cli.in_memory {
        warn!("Using the in-memory store, all data is lost on exit");
        let store = Arc::new(MemoryStore::new());
        return Ok(Stores {
            orders: store.clone(),
            ledger: store.clone(),
            users: store,
            postgres: None,
        });
    }

    if config.database.url.is_empty() {
        return Err(LedgerError::Validation(
            "database.url must be set (or run with --in-memory)".to_string(),
        ));
    }

    let store = Arc::new(
        PostgresStore::new(&config.database.url, config.database.max_connections).await?,
    );
    store.migrate().await?;

    Ok(Stores {
        orders: store.clone(),
        ledger: store.clone(),
        users: store.clone(),
        postgres: Some(store),
    })
}
