use std::{sync::Arc, time::Duration};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::{
    accrual::{AccrualReconciler, AccrualSource, HttpAccrualClient, ReconcilerHandle},
    balance::{BalanceEngine, WithdrawalService},
    config::Config,
    error::AppResult,
    ledger::{LedgerStore, MemoryLedgerStore, PgLedgerStore},
    orders::OrderIntake,
};

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<OrderIntake>,
    pub balance: Arc<BalanceEngine>,
    pub withdrawals: Arc<WithdrawalService>,
}

impl AppState {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self {
            intake: Arc::new(OrderIntake::new(ledger.clone())),
            balance: Arc::new(BalanceEngine::new(ledger.clone())),
            withdrawals: Arc::new(WithdrawalService::new(ledger)),
        }
    }
}

/// Everything `main` needs to serve and later shut down
pub struct App {
    pub state: AppState,
    pub reconciler: ReconcilerHandle,
}

pub async fn initialize_app(config: &Config) -> AppResult<App> {
    info!("Initializing application components ...");

    let ledger = initialize_ledger(config).await?;

    let source: Arc<dyn AccrualSource> = Arc::new(HttpAccrualClient::new(
        &config.accrual_system_address,
        config.accrual_request_timeout(),
    )?);
    info!("✅ Accrual client targeting {}", config.accrual_system_address);

    let reconciler =
        Arc::new(AccrualReconciler::new(ledger.clone(), source, config.reconciler())).start();

    Ok(App {
        state: AppState::new(ledger),
        reconciler,
    })
}

async fn initialize_ledger(config: &Config) -> AppResult<Arc<dyn LedgerStore>> {
    match &config.database_uri {
        Some(uri) => {
            let pool = initialize_database(uri, config.database_max_connections).await?;
            let store = PgLedgerStore::new(pool);
            store.run_migrations().await?;
            info!("✓ Database initialized");
            Ok(Arc::new(store))
        }
        None => {
            warn!("⚠️  DATABASE_URI not set - using in-memory ledger, balances will not survive a restart");
            Ok(Arc::new(MemoryLedgerStore::new()))
        }
    }
}

async fn initialize_database(database_uri: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_uri)
        .await?;

    info!("✓ Database pool configured: {} max connections", max_connections);
    Ok(pool)
}
