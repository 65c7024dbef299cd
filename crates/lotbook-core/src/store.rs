//! Persistent storage for accounts, transactions, prices and the lot ledger

use log::debug;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::Path;

use crate::error::CoreResult;
use crate::models::{
    Account, InvestmentDetail, Lot, LotAllocation, Price, Security, Transaction, TransactionDetail,
};

/// Rows written by one entry import
#[derive(Debug, Clone, Default)]
pub struct ImportRows {
    pub accounts: Vec<Account>,
    pub securities: Vec<Security>,
    /// New transactions plus existing ones whose running balance changed
    pub transactions: Vec<Transaction>,
    pub prices: Vec<Price>,
}

/// Storage used by the importer, the lot ledger and holdings queries.
///
/// Every mutating method is all-or-nothing.
pub trait LedgerStore {
    fn accounts(&self) -> CoreResult<Vec<Account>>;
    fn securities(&self) -> CoreResult<Vec<Security>>;
    /// All transactions in `(date, id)` order
    fn transactions(&self) -> CoreResult<Vec<Transaction>>;
    fn prices(&self) -> CoreResult<Vec<Price>>;
    fn lots(&self) -> CoreResult<Vec<Lot>>;
    fn allocations(&self) -> CoreResult<Vec<LotAllocation>>;

    /// Upsert imported rows in a single transaction
    fn import_rows(&mut self, rows: &ImportRows) -> CoreResult<()>;

    /// Delete every lot and allocation and insert the given ones in a single transaction
    fn replace_lots(&mut self, lots: &[Lot], allocations: &[LotAllocation]) -> CoreResult<()>;

    /// Upsert imported rows and replace the lot ledger in a single transaction
    fn commit_import(
        &mut self,
        rows: &ImportRows,
        lots: &[Lot],
        allocations: &[LotAllocation],
    ) -> CoreResult<()>;
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        account_type TEXT,
        description TEXT,
        credit_limit REAL
    );

    CREATE TABLE IF NOT EXISTS securities (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        symbol TEXT,
        security_type TEXT,
        goal TEXT
    );

    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL,
        date TEXT NOT NULL,
        kind TEXT NOT NULL,
        register TEXT,
        action TEXT,
        security_id TEXT,
        quantity REAL,
        price REAL,
        commission REAL,
        amount REAL,
        payee TEXT,
        memo TEXT,
        number TEXT,
        cleared TEXT,
        category TEXT,
        cash_balance REAL NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date, id);

    CREATE TABLE IF NOT EXISTS lots (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL,
        security_id TEXT NOT NULL,
        purchase_date TEXT NOT NULL,
        quantity REAL NOT NULL,
        cost_basis REAL NOT NULL,
        remaining_quantity REAL NOT NULL,
        closed_date TEXT,
        created_by_transaction_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS lot_allocations (
        id TEXT PRIMARY KEY,
        lot_id TEXT NOT NULL,
        transaction_id TEXT NOT NULL,
        shares_allocated REAL NOT NULL,
        cost_basis_allocated REAL NOT NULL,
        date TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_lot_allocations_lot ON lot_allocations(lot_id);

    CREATE TABLE IF NOT EXISTS prices (
        id TEXT PRIMARY KEY,
        security_id TEXT NOT NULL,
        date TEXT NOT NULL,
        price REAL NOT NULL,
        UNIQUE(security_id, date)
    );
"#;

/// SQLite-backed [`LedgerStore`]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (and create if needed) a database file
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        debug!("Opened database {}", path.as_ref().display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn query_all<T>(
        &self,
        sql: &str,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> CoreResult<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], map)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let kind: String = row.get(3)?;
    let detail = if kind == "investment" {
        let action: String = row.get(5)?;
        let action = action
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into()))?;
        TransactionDetail::Investment(InvestmentDetail {
            action,
            security_id: row.get(6)?,
            quantity: row.get(7)?,
            price: row.get(8)?,
            commission: row.get(9)?,
        })
    } else {
        TransactionDetail::Bank {
            register: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        }
    };

    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        date: row.get(2)?,
        amount: row.get(10)?,
        payee: row.get(11)?,
        memo: row.get(12)?,
        number: row.get(13)?,
        cleared: row.get(14)?,
        category: row.get(15)?,
        cash_balance: row.get(16)?,
        detail,
    })
}

impl LedgerStore for SqliteStore {
    fn accounts(&self) -> CoreResult<Vec<Account>> {
        self.query_all(
            "SELECT id, name, account_type, description, credit_limit FROM accounts ORDER BY name",
            |row| {
                Ok(Account {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    account_type: row.get(2)?,
                    description: row.get(3)?,
                    credit_limit: row.get(4)?,
                })
            },
        )
    }

    fn securities(&self) -> CoreResult<Vec<Security>> {
        self.query_all(
            "SELECT id, name, symbol, security_type, goal FROM securities ORDER BY name",
            |row| {
                Ok(Security {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    symbol: row.get(2)?,
                    security_type: row.get(3)?,
                    goal: row.get(4)?,
                })
            },
        )
    }

    fn transactions(&self) -> CoreResult<Vec<Transaction>> {
        self.query_all(
            r#"SELECT id, account_id, date, kind, register, action, security_id, quantity,
                      price, commission, amount, payee, memo, number, cleared, category,
                      cash_balance
               FROM transactions ORDER BY date, id"#,
            transaction_from_row,
        )
    }

    fn prices(&self) -> CoreResult<Vec<Price>> {
        self.query_all(
            "SELECT id, security_id, date, price FROM prices ORDER BY security_id, date",
            |row| {
                Ok(Price {
                    id: row.get(0)?,
                    security_id: row.get(1)?,
                    date: row.get(2)?,
                    price: row.get(3)?,
                })
            },
        )
    }

    fn lots(&self) -> CoreResult<Vec<Lot>> {
        self.query_all(
            r#"SELECT id, account_id, security_id, purchase_date, quantity, cost_basis,
                      remaining_quantity, closed_date, created_by_transaction_id, created_at
               FROM lots ORDER BY purchase_date, id"#,
            |row| {
                Ok(Lot {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    security_id: row.get(2)?,
                    purchase_date: row.get(3)?,
                    quantity: row.get(4)?,
                    cost_basis: row.get(5)?,
                    remaining_quantity: row.get(6)?,
                    closed_date: row.get(7)?,
                    created_by_transaction_id: row.get(8)?,
                    created_at: row.get(9)?,
                })
            },
        )
    }

    fn allocations(&self) -> CoreResult<Vec<LotAllocation>> {
        self.query_all(
            r#"SELECT id, lot_id, transaction_id, shares_allocated, cost_basis_allocated, date
               FROM lot_allocations ORDER BY date, id"#,
            |row| {
                Ok(LotAllocation {
                    id: row.get(0)?,
                    lot_id: row.get(1)?,
                    transaction_id: row.get(2)?,
                    shares_allocated: row.get(3)?,
                    cost_basis_allocated: row.get(4)?,
                    date: row.get(5)?,
                })
            },
        )
    }

    fn import_rows(&mut self, rows: &ImportRows) -> CoreResult<()> {
        let tx = self.conn.transaction()?;
        write_rows(&tx, rows)?;
        tx.commit()?;
        Ok(())
    }

    fn replace_lots(&mut self, lots: &[Lot], allocations: &[LotAllocation]) -> CoreResult<()> {
        let tx = self.conn.transaction()?;
        write_lots(&tx, lots, allocations)?;
        tx.commit()?;
        debug!("Stored {} lots and {} allocations", lots.len(), allocations.len());
        Ok(())
    }

    fn commit_import(
        &mut self,
        rows: &ImportRows,
        lots: &[Lot],
        allocations: &[LotAllocation],
    ) -> CoreResult<()> {
        let tx = self.conn.transaction()?;
        write_rows(&tx, rows)?;
        write_lots(&tx, lots, allocations)?;
        tx.commit()?;
        debug!(
            "Stored {} transactions, {} lots and {} allocations",
            rows.transactions.len(),
            lots.len(),
            allocations.len()
        );
        Ok(())
    }
}

fn write_rows(conn: &Connection, rows: &ImportRows) -> CoreResult<()> {
    let mut stmt = conn.prepare(
        r#"INSERT INTO accounts (id, name, account_type, description, credit_limit)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(id) DO UPDATE SET
               account_type = excluded.account_type,
               description = excluded.description,
               credit_limit = excluded.credit_limit"#,
    )?;
    for a in &rows.accounts {
        stmt.execute(params![a.id, a.name, a.account_type, a.description, a.credit_limit])?;
    }

    let mut stmt = conn.prepare(
        r#"INSERT INTO securities (id, name, symbol, security_type, goal)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(id) DO UPDATE SET
               symbol = excluded.symbol,
               security_type = excluded.security_type,
               goal = excluded.goal"#,
    )?;
    for s in &rows.securities {
        stmt.execute(params![s.id, s.name, s.symbol, s.security_type, s.goal])?;
    }

    let mut stmt = conn.prepare(
        r#"INSERT OR REPLACE INTO transactions
           (id, account_id, date, kind, register, action, security_id, quantity,
            price, commission, amount, payee, memo, number, cleared, category,
            cash_balance)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"#,
    )?;
    for t in &rows.transactions {
        let (kind, register, action, security_id, quantity, price, commission) = match &t.detail
        {
            TransactionDetail::Bank { register } => {
                ("bank", Some(register.as_str()), None, None, None, None, None)
            }
            TransactionDetail::Investment(d) => (
                "investment",
                None,
                Some(d.action.as_str()),
                d.security_id.as_deref(),
                d.quantity,
                d.price,
                d.commission,
            ),
        };
        stmt.execute(params![
            t.id,
            t.account_id,
            t.date,
            kind,
            register,
            action,
            security_id,
            quantity,
            price,
            commission,
            t.amount,
            t.payee,
            t.memo,
            t.number,
            t.cleared,
            t.category,
            t.cash_balance,
        ])?;
    }

    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO prices (id, security_id, date, price) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for p in &rows.prices {
        stmt.execute(params![p.id, p.security_id, p.date, p.price])?;
    }
    Ok(())
}

/// Swap the whole lot ledger for `lots` and `allocations`
fn write_lots(conn: &Connection, lots: &[Lot], allocations: &[LotAllocation]) -> CoreResult<()> {
    conn.execute("DELETE FROM lot_allocations", [])?;
    conn.execute("DELETE FROM lots", [])?;
    let mut stmt = conn.prepare(
        r#"INSERT INTO lots
           (id, account_id, security_id, purchase_date, quantity, cost_basis,
            remaining_quantity, closed_date, created_by_transaction_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
    )?;
    for l in lots {
        stmt.execute(params![
            l.id,
            l.account_id,
            l.security_id,
            l.purchase_date,
            l.quantity,
            l.cost_basis,
            l.remaining_quantity,
            l.closed_date,
            l.created_by_transaction_id,
            l.created_at,
        ])?;
    }

    let mut stmt = conn.prepare(
        r#"INSERT INTO lot_allocations
           (id, lot_id, transaction_id, shares_allocated, cost_basis_allocated, date)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
    )?;
    for a in allocations {
        stmt.execute(params![
            a.id,
            a.lot_id,
            a.transaction_id,
            a.shares_allocated,
            a.cost_basis_allocated,
            a.date,
        ])?;
    }
    Ok(())
}
