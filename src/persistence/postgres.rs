use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument, warn};

use super::traits::{LedgerStore, OrderStore, UserStore};
use crate::domain::{Balance, Order, OrderStatus, User, Withdrawal};
use crate::error::{LedgerError, Result};
use crate::validation::validate_credit;

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    let status: String = row.get("status");
    Ok(Order {
        id: row.get("id"),
        user_id: row.get("user_id"),
        number: row.get("number"),
        status: status.parse()?,
        accrual: row.get("accrual"),
        created_at: row.get("created_at"),
    })
}

// ==================== Orders ====================

#[async_trait]
impl OrderStore for PostgresStore {
    #[instrument(skip(self))]
    async fn create_order(&self, number: &str, user_id: i64) -> Result<Order> {
        let row = sqlx::query(
            r#"
            INSERT INTO orders (number, user_id)
            VALUES ($1, $2)
            RETURNING id, user_id, number, status, created_at, NULL::NUMERIC AS accrual
            "#,
        )
        .bind(number)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                debug!("Order {} already registered", number);
                LedgerError::OrderAlreadyExists(number.to_string())
            } else {
                LedgerError::Database(e)
            }
        })?;

        order_from_row(&row)
    }

    async fn find_order_by_number(&self, number: &str) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT o.id, o.user_id, o.number, o.status, o.created_at, a.amount AS accrual
            FROM orders o LEFT JOIN accruals a ON a.order_id = o.id
            WHERE o.number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn orders_by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.user_id, o.number, o.status, o.created_at, a.amount AS accrual
            FROM orders o LEFT JOIN accruals a ON a.order_id = o.id
            WHERE o.user_id = $1
            ORDER BY o.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.user_id, o.number, o.status, o.created_at, a.amount AS accrual
            FROM orders o LEFT JOIN accruals a ON a.order_id = o.id
            WHERE o.status = $1
            ORDER BY o.created_at
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn set_status(&self, order_id: i64, status: OrderStatus) -> Result<()> {
        let status = status.ensure_simple_target()?;

        let result = sqlx::query("UPDATE orders SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::OrderNotFound(order_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, order), fields(order_id = order.id))]
    async fn set_processed_and_credit(&self, order: &Order, amount: Decimal) -> Result<()> {
        validate_credit(amount)?;

        // Dropping the transaction on any early return rolls it back
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE orders SET status = $1 WHERE id = $2")
            .bind(OrderStatus::Processed.as_str())
            .bind(order.id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::OrderNotFound(order.id.to_string()));
        }

        sqlx::query("INSERT INTO accruals (amount, user_id, order_id) VALUES ($1, $2, $3)")
            .bind(amount)
            .bind(order.user_id)
            .bind(order.id)
            .execute(&mut *tx)
            .await?;

        let credited =
            sqlx::query("UPDATE balances SET current = current + $1 WHERE user_id = $2")
                .bind(amount)
                .bind(order.user_id)
                .execute(&mut *tx)
                .await?;
        if credited.rows_affected() == 0 {
            return Err(LedgerError::UserNotFound(order.user_id.to_string()));
        }

        tx.commit().await?;
        debug!("Credited {} to user {}", amount, order.user_id);
        Ok(())
    }
}

// ==================== Balances & withdrawals ====================

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn balance(&self, user_id: i64) -> Result<Balance> {
        let row = sqlx::query("SELECT current, withdrawn FROM balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;

        Ok(Balance {
            current: row.get("current"),
            withdrawn: row.get("withdrawn"),
        })
    }

    #[instrument(skip(self))]
    async fn withdraw(&self, order_number: &str, amount: Decimal, user_id: i64) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent withdrawals of the same user
        let row = sqlx::query("SELECT current FROM balances WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
        let current: Decimal = row.get("current");

        if amount > current {
            warn!(
                "Insufficient balance for withdrawal, user {}, withdrawal order {}",
                user_id, order_number
            );
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: current,
            });
        }

        sqlx::query(
            r#"
            UPDATE balances
            SET current = current - $1, withdrawn = withdrawn + $1
            WHERE user_id = $2
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            INSERT INTO withdrawals (amount, user_id, order_number)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .bind(order_number)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                info!("Withdrawal order number {} already exists", order_number);
                LedgerError::DuplicateWithdrawalOrder(order_number.to_string())
            } else {
                LedgerError::Database(e)
            }
        })?;

        tx.commit().await?;
        Ok(row.get("id"))
    }

    async fn withdrawals_by_user(&self, user_id: i64) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, order_number, amount, created_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Withdrawal {
                id: row.get("id"),
                user_id: row.get("user_id"),
                order_number: row.get("order_number"),
                amount: row.get("amount"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

// ==================== Users ====================

#[async_trait]
impl UserStore for PostgresStore {
    #[instrument(skip(self, password_hash))]
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO users (login, password_hash) VALUES ($1, $2) RETURNING id",
        )
        .bind(login)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                info!("Login {} already taken", login);
                LedgerError::LoginTaken(login.to_string())
            } else {
                LedgerError::Database(e)
            }
        })?;
        let id: i64 = row.get("id");

        sqlx::query("INSERT INTO balances (user_id) VALUES ($1)")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(User {
            id,
            login: login.to_string(),
            password_hash: password_hash.to_string(),
        })
    }

    async fn find_user_by_login(&self, login: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, login, password_hash FROM users WHERE login = $1")
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| User {
            id: r.get("id"),
            login: r.get("login"),
            password_hash: r.get("password_hash"),
        }))
    }
}
