// =============================================================================
// store.rs — THE APPEND-ONLY LEDGER
// =============================================================================
//
// Three tables, zero updates, zero deletes:
//
//   funds    : one row per filer, inserted on first sighting
//   filings  : one row per accession number; this IS the checkpoint
//   holdings : every row of every information table, appended in batches
//
// Re-running the job is safe because the orchestrator asks `already_ingested`
// first and never re-queues a claimed filing. `claim` itself is INSERT OR
// IGNORE, so a claim repeated after a crash is a no-op.
//
// What this does NOT do: tell a fully ingested filing from one whose holdings
// write died halfway. A claimed filing is a claimed filing.
// =============================================================================

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{Filing, Fund, Holding, Quarter};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Filings per quarter, for the post-run report.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct QuarterCount {
    pub quarter: String,
    pub filings: i64,
}

/// Handle to the holdings database. Cheap to clone; every clone shares the pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    batch_size: usize,
}

impl Store {
    pub async fn connect(database_url: &str, batch_size: usize) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(database_url = %database_url, "store connected");
        Ok(Self {
            pool,
            batch_size: batch_size.max(1),
        })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS funds (
                cik TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                ticker TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS filings (
                accession_number TEXT PRIMARY KEY,
                cik TEXT NOT NULL,
                filing_date TEXT NOT NULL,
                quarter TEXT NOT NULL,
                FOREIGN KEY (cik) REFERENCES funds(cik)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS holdings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                accession_number TEXT NOT NULL,
                issuer TEXT NOT NULL,
                cusip TEXT,
                value REAL NOT NULL,
                shares REAL NOT NULL,
                FOREIGN KEY (accession_number) REFERENCES filings(accession_number)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_filings_quarter ON filings(quarter)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_holdings_accession ON holdings(accession_number)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Accession numbers already claimed for `quarter`.
    pub async fn already_ingested(&self, quarter: Quarter) -> Result<HashSet<String>, StoreError> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT accession_number FROM filings WHERE quarter = ?")
                .bind(quarter.to_string())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Insert-or-ignore the fund and the filing. Returns whether the filing
    /// row is new.
    pub async fn claim(&self, fund: &Fund, filing: &Filing) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO funds (cik, name, ticker) VALUES (?, ?, ?)")
            .bind(&fund.cik)
            .bind(&fund.name)
            .bind(&fund.ticker)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO filings (accession_number, cik, filing_date, quarter) VALUES (?, ?, ?, ?)",
        )
        .bind(&filing.accession_number)
        .bind(&filing.cik)
        .bind(&filing.filing_date)
        .bind(filing.quarter.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(inserted == 1)
    }

    /// Append holdings, one transaction per batch. Returns rows written.
    pub async fn append_holdings(
        &self,
        accession_number: &str,
        holdings: &[Holding],
    ) -> Result<u64, StoreError> {
        let mut written = 0u64;

        for batch in holdings.chunks(self.batch_size) {
            let mut tx = self.pool.begin().await?;
            for holding in batch {
                sqlx::query(
                    "INSERT INTO holdings (accession_number, issuer, cusip, value, shares) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(accession_number)
                .bind(&holding.issuer)
                .bind(&holding.cusip)
                .bind(holding.value)
                .bind(holding.shares)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            written += batch.len() as u64;
            debug!(accession = accession_number, written = written, "holdings batch committed");
        }

        Ok(written)
    }

    /// Filings per quarter, newest quarter first.
    pub async fn quarter_summary(&self) -> Result<Vec<QuarterCount>, StoreError> {
        let rows = sqlx::query_as::<_, QuarterCount>(
            "SELECT quarter, COUNT(*) AS filings FROM filings GROUP BY quarter ORDER BY quarter DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn holding_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM holdings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// A migrated store in a throwaway directory. Keep the TempDir alive.
    pub async fn temp_store(batch_size: usize) -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("holdings.db").display());
        let store = Store::connect(&url, batch_size).await.unwrap();
        store.migrate().await.unwrap();
        (store, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::temp_store;
    use super::*;

    fn fund() -> Fund {
        Fund {
            cik: "0001067983".to_string(),
            name: "BERKSHIRE HATHAWAY INC".to_string(),
            ticker: None,
        }
    }

    fn filing(accession: &str, quarter: Quarter) -> Filing {
        Filing {
            accession_number: accession.to_string(),
            cik: "0001067983".to_string(),
            filing_date: "2025-08-14".to_string(),
            quarter,
        }
    }

    fn holding(n: usize) -> Holding {
        Holding {
            issuer: format!("ISSUER {n}"),
            cusip: if n % 2 == 0 { Some(format!("{n:09}")) } else { None },
            value: 1_000.0 * n as f64,
            shares: 10.0 * n as f64,
        }
    }

    #[tokio::test]
    async fn test_claim_is_idempotent() {
        let (store, _dir) = temp_store(50).await;
        let q3 = Quarter::new(2025, 3).unwrap();

        assert!(store.claim(&fund(), &filing("0000950123-25-008343", q3)).await.unwrap());
        assert!(!store.claim(&fund(), &filing("0000950123-25-008343", q3)).await.unwrap());

        let funds: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM funds")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(funds, 1);
        assert_eq!(store.already_ingested(q3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_already_ingested_is_scoped_to_the_quarter() {
        let (store, _dir) = temp_store(50).await;
        let q2 = Quarter::new(2025, 2).unwrap();
        let q3 = Quarter::new(2025, 3).unwrap();
        store.claim(&fund(), &filing("A-1", q2)).await.unwrap();
        store.claim(&fund(), &filing("A-2", q3)).await.unwrap();
        store.claim(&fund(), &filing("A-3", q3)).await.unwrap();

        let seen = store.already_ingested(q3).await.unwrap();
        assert_eq!(seen, HashSet::from(["A-2".to_string(), "A-3".to_string()]));

        let summary = store.quarter_summary().await.unwrap();
        assert_eq!(
            summary,
            vec![
                QuarterCount { quarter: "2025-Q3".to_string(), filings: 2 },
                QuarterCount { quarter: "2025-Q2".to_string(), filings: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_holdings_are_appended_across_batches() {
        let (store, _dir) = temp_store(50).await;
        let q3 = Quarter::new(2025, 3).unwrap();
        store.claim(&fund(), &filing("A-1", q3)).await.unwrap();

        let holdings: Vec<Holding> = (1..=120).map(holding).collect();
        assert_eq!(store.append_holdings("A-1", &holdings).await.unwrap(), 120);
        assert_eq!(store.holding_count().await.unwrap(), 120);

        let (issuer, cusip, value): (String, Option<String>, f64) = sqlx::query_as(
            "SELECT issuer, cusip, value FROM holdings WHERE issuer = 'ISSUER 42'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(issuer, "ISSUER 42");
        assert_eq!(cusip.as_deref(), Some("000000042"));
        assert_eq!(value, 42_000.0);
    }

    #[tokio::test]
    async fn test_migrate_twice_is_harmless() {
        let (store, _dir) = temp_store(50).await;
        store.migrate().await.unwrap();
        assert_eq!(store.holding_count().await.unwrap(), 0);
        store.close().await;
    }
}
