//! SQLite-backed [`Store`].
//!
//! One connection behind a mutex; every call runs on a blocking thread. Batches execute
//! inside a single immediate transaction, so a failed op rolls back everything before it and
//! two processes sharing a database file queue for the write lock instead of failing busy.

use anyhow::Context;
use raffle_execution::{Op, Store, StoreError, StoreResult};
use raffle_types::{
    Gift, GiftId, LotteryResult, Purchase, PurchaseId, ResultId, TicketStatus, UserId,
};
use rusqlite::types::Type;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const SCHEMA: &str = "
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=NORMAL;
    CREATE TABLE IF NOT EXISTS gifts (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        category TEXT NOT NULL DEFAULT '',
        donor TEXT NOT NULL DEFAULT '',
        price INTEGER NOT NULL CHECK (price >= 0),
        lottery_completed INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS purchases (
        id INTEGER PRIMARY KEY,
        gift_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        quantity INTEGER NOT NULL CHECK (quantity >= 1),
        status TEXT NOT NULL CHECK (status IN ('cart', 'paid')),
        paid_at_ms INTEGER
    );
    CREATE UNIQUE INDEX IF NOT EXISTS purchases_one_cart_row
        ON purchases (user_id, gift_id) WHERE status = 'cart';
    CREATE INDEX IF NOT EXISTS purchases_by_gift ON purchases (gift_id, status);
    CREATE INDEX IF NOT EXISTS purchases_by_user ON purchases (user_id, status);
    CREATE TABLE IF NOT EXISTS lottery_results (
        id INTEGER PRIMARY KEY,
        gift_id INTEGER NOT NULL UNIQUE,
        winner INTEGER NOT NULL,
        drawn_at_ms INTEGER NOT NULL
    );
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const PURCHASE_COLUMNS: &str = "id, gift_id, user_id, quantity, status, paid_at_ms";
const GIFT_COLUMNS: &str = "id, name, category, donor, price, lottery_completed";
const RESULT_COLUMNS: &str = "id, gift_id, winner, drawn_at_ms";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    next_purchase: AtomicU64,
    next_result: AtomicU64,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open raffle db {}", path.display()))?;
        Self::init(conn)
    }

    /// A private in-memory database; contents vanish with the process.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory raffle db")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT).context("set sqlite busy timeout")?;
        conn.execute_batch(SCHEMA).context("init raffle schema")?;
        let max_purchase = max_id(&conn, "purchases")?;
        let max_result = max_id(&conn, "lottery_results")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            next_purchase: AtomicU64::new(max_purchase),
            next_result: AtomicU64::new(max_result),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = match conn.lock() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    warn!("sqlite connection mutex poisoned; recovering");
                    poisoned.into_inner()
                }
            };
            f(&mut guard)
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("blocking task failed: {err}")))?
        .map_err(map_sqlite_error)
    }
}

fn max_id(conn: &Connection, table: &str) -> anyhow::Result<u64> {
    let max: Option<u64> = conn
        .query_row(&format!("SELECT MAX(id) FROM {table}"), [], |row| row.get(0))
        .with_context(|| format!("read max id of {table}"))?;
    Ok(max.unwrap_or(0))
}

fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => StoreError::Conflict(err.to_string()),
            _ => StoreError::Unavailable(err.to_string()),
        },
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => StoreError::Corrupt(err.to_string()),
        _ => StoreError::Unavailable(err.to_string()),
    }
}

fn gift_from_row(row: &Row<'_>) -> rusqlite::Result<Gift> {
    Ok(Gift {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        donor: row.get(3)?,
        price: row.get(4)?,
        lottery_completed: row.get(5)?,
    })
}

fn purchase_from_row(row: &Row<'_>) -> rusqlite::Result<Purchase> {
    let status: String = row.get(4)?;
    let status = status
        .parse::<TicketStatus>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(err)))?;
    Ok(Purchase {
        id: row.get(0)?,
        gift_id: row.get(1)?,
        user_id: row.get(2)?,
        quantity: row.get(3)?,
        status,
        paid_at_ms: row.get(5)?,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<LotteryResult> {
    Ok(LotteryResult {
        id: row.get(0)?,
        gift_id: row.get(1)?,
        winner: row.get(2)?,
        drawn_at_ms: row.get(3)?,
    })
}

fn query_purchases(
    conn: &Connection,
    filter: &str,
    args: impl rusqlite::Params,
) -> rusqlite::Result<Vec<Purchase>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE {filter} ORDER BY id ASC"
    ))?;
    let rows = stmt.query_map(args, purchase_from_row)?;
    rows.collect()
}

fn apply_op(conn: &Connection, op: &Op) -> rusqlite::Result<()> {
    match op {
        Op::PutGift(gift) => {
            conn.execute(
                "INSERT INTO gifts (id, name, category, donor, price, lottery_completed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     category = excluded.category,
                     donor = excluded.donor,
                     price = excluded.price,
                     lottery_completed = excluded.lottery_completed",
                params![
                    gift.id,
                    gift.name,
                    gift.category,
                    gift.donor,
                    gift.price,
                    gift.lottery_completed
                ],
            )?;
        }
        Op::PutPurchase(purchase) => {
            conn.execute(
                "INSERT INTO purchases (id, gift_id, user_id, quantity, status, paid_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     gift_id = excluded.gift_id,
                     user_id = excluded.user_id,
                     quantity = excluded.quantity,
                     status = excluded.status,
                     paid_at_ms = excluded.paid_at_ms",
                params![
                    purchase.id,
                    purchase.gift_id,
                    purchase.user_id,
                    purchase.quantity,
                    purchase.status.as_str(),
                    purchase.paid_at_ms
                ],
            )?;
        }
        Op::DeletePurchase(id) => {
            conn.execute("DELETE FROM purchases WHERE id = ?1", params![id])?;
        }
        Op::InsertResult(result) => {
            conn.execute(
                "INSERT INTO lottery_results (id, gift_id, winner, drawn_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![result.id, result.gift_id, result.winner, result.drawn_at_ms],
            )?;
        }
    }
    Ok(())
}

impl Store for SqliteStore {
    async fn gift(&self, id: GiftId) -> StoreResult<Option<Gift>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {GIFT_COLUMNS} FROM gifts WHERE id = ?1"),
                params![id],
                gift_from_row,
            )
            .optional()
        })
        .await
    }

    async fn gifts(&self) -> StoreResult<Vec<Gift>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {GIFT_COLUMNS} FROM gifts ORDER BY id ASC"))?;
            let rows = stmt.query_map([], gift_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn purchase(&self, id: PurchaseId) -> StoreResult<Option<Purchase>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = ?1"),
                params![id],
                purchase_from_row,
            )
            .optional()
        })
        .await
    }

    async fn purchases_for_user(
        &self,
        user: UserId,
        status: TicketStatus,
    ) -> StoreResult<Vec<Purchase>> {
        self.with_conn(move |conn| {
            query_purchases(
                conn,
                "user_id = ?1 AND status = ?2",
                params![user, status.as_str()],
            )
        })
        .await
    }

    async fn purchases_for_gift(
        &self,
        gift: GiftId,
        status: TicketStatus,
    ) -> StoreResult<Vec<Purchase>> {
        self.with_conn(move |conn| {
            query_purchases(
                conn,
                "gift_id = ?1 AND status = ?2",
                params![gift, status.as_str()],
            )
        })
        .await
    }

    async fn paid_purchases(&self) -> StoreResult<Vec<Purchase>> {
        self.with_conn(|conn| query_purchases(conn, "status = 'paid'", []))
            .await
    }

    async fn ticket_counts(&self, gifts: &[GiftId]) -> StoreResult<BTreeMap<GiftId, u64>> {
        if gifts.is_empty() {
            return Ok(BTreeMap::new());
        }
        let gifts = gifts.to_vec();
        self.with_conn(move |conn| {
            let placeholders = vec!["?"; gifts.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT gift_id, SUM(quantity) FROM purchases
                 WHERE status = 'paid' AND gift_id IN ({placeholders})
                 GROUP BY gift_id"
            ))?;
            let rows = stmt.query_map(params_from_iter(gifts.iter()), |row| {
                Ok((row.get::<_, GiftId>(0)?, row.get::<_, u64>(1)?))
            })?;
            rows.collect()
        })
        .await
    }

    async fn result(&self, gift: GiftId) -> StoreResult<Option<LotteryResult>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {RESULT_COLUMNS} FROM lottery_results WHERE gift_id = ?1"),
                params![gift],
                result_from_row,
            )
            .optional()
        })
        .await
    }

    async fn results(&self) -> StoreResult<Vec<LotteryResult>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RESULT_COLUMNS} FROM lottery_results ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map([], result_from_row)?;
            rows.collect()
        })
        .await
    }

    fn next_purchase_id(&self) -> PurchaseId {
        self.next_purchase.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn next_result_id(&self) -> ResultId {
        self.next_result.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn apply(&self, ops: Vec<Op>) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for op in &ops {
                apply_op(&tx, op)?;
            }
            tx.commit()
        })
        .await
    }
}
