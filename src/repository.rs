//! SQLite-backed storage for accounts, agreements and the purchase ledger.
//!
//! The purchase ledger is append-only. `purchases.order_id` carries a UNIQUE
//! constraint and every credit runs inside a `BEGIN IMMEDIATE` transaction, so
//! several shop processes sharing one database file still credit an order at
//! most once.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    Account, AccountDirectory, AccountId, Agreement, AgreementLedger, Currency, Error,
    LedgerInsert, Money, Purchase, PurchaseLedger, PurchasePage,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    name               TEXT    NOT NULL UNIQUE,
    coins_transferable INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS purchases (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id    TEXT    NOT NULL UNIQUE,
    account_id  INTEGER NOT NULL,
    price       TEXT    NOT NULL,
    currency    TEXT    NOT NULL,
    coins       INTEGER NOT NULL,
    payer_email TEXT    NOT NULL,
    created_at  TEXT    NOT NULL,
    capture_id  TEXT    UNIQUE
);
CREATE INDEX IF NOT EXISTS purchases_by_account
    ON purchases (account_id, created_at DESC);
CREATE TABLE IF NOT EXISTS agreements (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    agreement_id TEXT    NOT NULL UNIQUE,
    account_id   INTEGER NOT NULL,
    accepted_at  TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS agreements_by_account ON agreements (account_id);
";

const PURCHASE_COLUMNS: &str =
    "order_id, account_id, price, currency, coins, payer_email, created_at, capture_id";

#[derive(Debug, Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened shop database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("connection lock poisoned".to_string()))
    }

    /// Accounts belong to the game server; the shop only creates them when
    /// seeding a fresh database.
    pub fn create_account(&self, name: &str) -> Result<Account, Error> {
        let conn = self.lock()?;
        conn.execute("INSERT INTO accounts (name) VALUES (?1)", params![name])?;
        Ok(Account::new(conn.last_insert_rowid(), name))
    }

    pub fn balance(&self, account_id: AccountId) -> Result<i64, Error> {
        self.account(account_id)?
            .map(|a| a.coins_transferable)
            .ok_or_else(|| Error::NotFound(format!("account {}", account_id)))
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(Error::Internal(msg)),
    )
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp {}: {}", raw, e)))
}

fn purchase_from_row(row: &Row<'_>) -> rusqlite::Result<Purchase> {
    let price: String = row.get(2)?;
    let currency: String = row.get(3)?;
    let coins: i64 = row.get(4)?;
    let created_at: String = row.get(6)?;

    Ok(Purchase {
        order_id: row.get(0)?,
        account_id: row.get(1)?,
        amount: Money::from_decimal_str(&price)
            .ok_or_else(|| conversion_error(2, format!("bad price {}", price)))?,
        currency: Currency::new(&currency)
            .ok_or_else(|| conversion_error(3, format!("bad currency {}", currency)))?,
        coins: u64::try_from(coins)
            .map_err(|_| conversion_error(4, format!("negative coins {}", coins)))?,
        payer_email: row.get(5)?,
        created_at: parse_timestamp(6, &created_at)?,
        capture_id: row.get(7)?,
    })
}

fn agreement_from_row(row: &Row<'_>) -> rusqlite::Result<Agreement> {
    let accepted_at: String = row.get(2)?;
    Ok(Agreement {
        agreement_id: row.get(0)?,
        account_id: row.get(1)?,
        accepted_at: parse_timestamp(2, &accepted_at)?,
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        coins_transferable: row.get(2)?,
    })
}

fn select_purchase(conn: &Connection, order_id: &str) -> rusqlite::Result<Option<Purchase>> {
    conn.query_row(
        &format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE order_id = ?1"),
        params![order_id],
        purchase_from_row,
    )
    .optional()
}

/// A payment is known by its order id or its capture id. IPNs only carry
/// the latter, checkout knows both.
fn select_payment(
    conn: &Connection,
    order_id: &str,
    capture_id: Option<&str>,
) -> rusqlite::Result<Option<Purchase>> {
    conn.query_row(
        &format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases \
             WHERE order_id = ?1 OR capture_id = ?1 OR order_id = ?2 OR capture_id = ?2 \
             ORDER BY id LIMIT 1"
        ),
        params![order_id, capture_id],
        purchase_from_row,
    )
    .optional()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

impl PurchaseLedger for SqliteRepository {
    fn credit_purchase(&self, purchase: &Purchase) -> Result<LedgerInsert, Error> {
        let coins = i64::try_from(purchase.coins)
            .map_err(|_| Error::InvalidRequest(format!("coin amount {} too large", purchase.coins)))?;

        let mut conn = self.lock()?;
        // Dropping the transaction without commit rolls everything back.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let capture_id = purchase.capture_id.as_deref();
        if let Some(existing) = select_payment(&tx, &purchase.order_id, capture_id)? {
            return Ok(LedgerInsert::Existing(existing));
        }

        let credited = tx.execute(
            "UPDATE accounts SET coins_transferable = coins_transferable + ?1 WHERE id = ?2",
            params![coins, purchase.account_id],
        )?;
        if credited == 0 {
            return Err(Error::NotFound(format!("account {}", purchase.account_id)));
        }

        let inserted = tx.execute(
            &format!("INSERT INTO purchases ({PURCHASE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                purchase.order_id,
                purchase.account_id,
                purchase.amount.to_string(),
                purchase.currency.as_str(),
                coins,
                purchase.payer_email,
                timestamp(&purchase.created_at),
                capture_id,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                drop(tx);
                return match select_payment(&conn, &purchase.order_id, capture_id)? {
                    Some(existing) => Ok(LedgerInsert::Existing(existing)),
                    None => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;
        info!(
            order_id = %purchase.order_id,
            account_id = purchase.account_id,
            coins = purchase.coins,
            "purchase recorded and credited"
        );
        Ok(LedgerInsert::Inserted)
    }

    fn find_purchase(&self, order_id: &str) -> Result<Option<Purchase>, Error> {
        let conn = self.lock()?;
        Ok(select_purchase(&conn, order_id)?)
    }

    fn find_payment(&self, payment_id: &str) -> Result<Option<Purchase>, Error> {
        let conn = self.lock()?;
        Ok(select_payment(&conn, payment_id, None)?)
    }

    fn count_by_account(&self, account_id: AccountId) -> Result<u64, Error> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM purchases WHERE account_id = ?1",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn list_by_account(
        &self,
        account_id: AccountId,
        page: u32,
        page_size: u32,
    ) -> Result<PurchasePage, Error> {
        if page == 0 || page_size == 0 {
            return Err(Error::InvalidRequest(
                "page and page size start at 1".to_string(),
            ));
        }
        let offset = i64::from(page - 1) * i64::from(page_size);

        let mut conn = self.lock()?;
        // Count and page come from one snapshot.
        let tx = conn.transaction()?;
        let total: i64 = tx.query_row(
            "SELECT COUNT(*) FROM purchases WHERE account_id = ?1",
            params![account_id],
            |row| row.get(0),
        )?;
        let rows = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE account_id = ?1 \
                 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
            ))?;
            stmt.query_map(
                params![account_id, i64::from(page_size), offset],
                purchase_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;

        Ok(PurchasePage {
            rows,
            total_count: u64::try_from(total).unwrap_or(0),
        })
    }
}

impl AgreementLedger for SqliteRepository {
    fn record_acceptance(&self, account_id: AccountId) -> Result<Agreement, Error> {
        let agreement = Agreement {
            agreement_id: Uuid::new_v4().to_string(),
            account_id,
            accepted_at: Utc::now(),
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?1)",
            params![account_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(Error::NotFound(format!("account {}", account_id)));
        }
        tx.execute(
            "INSERT INTO agreements (agreement_id, account_id, accepted_at) VALUES (?1, ?2, ?3)",
            params![
                agreement.agreement_id,
                agreement.account_id,
                timestamp(&agreement.accepted_at)
            ],
        )?;
        tx.commit()?;

        info!(
            account_id,
            agreement_id = %agreement.agreement_id,
            "purchase terms accepted"
        );
        Ok(agreement)
    }

    fn has_accepted(&self, account_id: AccountId) -> Result<bool, Error> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM agreements WHERE account_id = ?1)",
            params![account_id],
            |row| row.get(0),
        )?)
    }

    fn find_agreement(&self, agreement_id: &str) -> Result<Option<Agreement>, Error> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT agreement_id, account_id, accepted_at FROM agreements \
                 WHERE agreement_id = ?1",
                params![agreement_id],
                agreement_from_row,
            )
            .optional()?)
    }
}

impl AccountDirectory for SqliteRepository {
    fn account(&self, account_id: AccountId) -> Result<Option<Account>, Error> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, name, coins_transferable FROM accounts WHERE id = ?1",
                params![account_id],
                account_from_row,
            )
            .optional()?)
    }

    fn account_by_name(&self, name: &str) -> Result<Option<Account>, Error> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, name, coins_transferable FROM accounts WHERE name = ?1",
                params![name],
                account_from_row,
            )
            .optional()?)
    }
}
