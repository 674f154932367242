//! SQLite persistence for candidates, vote results, holdings and the
//! generation cache.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use common::{Candidate, Holding, HoldingStatus, PipelineError, Result};
use decision_engine::VoteResult;
use llm_client::GenerationCache;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS candidates (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        symbol TEXT NOT NULL,
        creator TEXT NOT NULL,
        description TEXT,
        eligible INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'discovered',
        status_reason TEXT,
        discovered_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS vote_results (
        candidate_id TEXT PRIMARY KEY,
        candidate_name TEXT NOT NULL,
        candidate_symbol TEXT NOT NULL,
        weighted_score REAL NOT NULL,
        yes_count INTEGER NOT NULL,
        decision TEXT NOT NULL,
        critical_flag INTEGER NOT NULL,
        votes_json TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS holdings (
        candidate_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        symbol TEXT NOT NULL,
        amount REAL NOT NULL,
        entry_spend REAL NOT NULL,
        entry_price REAL NOT NULL,
        entry_tx TEXT NOT NULL,
        exit_tx TEXT,
        status TEXT NOT NULL,
        last_price REAL,
        pnl_percent REAL,
        opened_at TEXT NOT NULL,
        closed_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_holdings_status ON holdings(status);
    CREATE TABLE IF NOT EXISTS llm_cache (
        cache_key TEXT PRIMARY KEY,
        model TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
";

/// Lifecycle of a candidate row. `Discovered` rows left over from a crash
/// are re-queued at startup; the other two are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateStatus {
    Discovered,
    Aborted,
    Analyzed,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Discovered => "discovered",
            CandidateStatus::Aborted => "aborted",
            CandidateStatus::Analyzed => "analyzed",
        }
    }
}

/// Counts behind the periodic summary report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub discovered: u64,
    pub analyzed: u64,
    pub invest: u64,
    pub pass: u64,
    pub active_holdings: u64,
    pub total_invested: f64,
    pub trades: u64,
    pub highest_score: Option<f64>,
    pub lowest_score: Option<f64>,
}

fn db_err(e: rusqlite::Error) -> PipelineError {
    PipelineError::Store(e.to_string())
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn holding_from_row(row: &Row<'_>) -> rusqlite::Result<Holding> {
    let status: String = row.get("status")?;
    let opened_at: String = row.get("opened_at")?;
    let closed_at: Option<String> = row.get("closed_at")?;
    Ok(Holding {
        candidate_id: row.get("candidate_id")?,
        name: row.get("name")?,
        symbol: row.get("symbol")?,
        amount: row.get("amount")?,
        entry_spend: row.get("entry_spend")?,
        entry_price: row.get("entry_price")?,
        entry_tx: row.get("entry_tx")?,
        exit_tx: row.get("exit_tx")?,
        status: HoldingStatus::parse(&status).unwrap_or(HoldingStatus::Pending),
        last_price: row.get("last_price")?,
        pnl_percent: row.get("pnl_percent")?,
        opened_at: parse_ts(&opened_at),
        closed_at: closed_at.as_deref().map(parse_ts),
    })
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_millis(5_000))?;
        let store = Self::init(conn)?;
        info!("Store opened at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self::init(Connection::open_in_memory()?)?)
    }

    fn init(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn().execute_batch(sql).map_err(db_err)
    }

    // ── Candidates ───────────────────────────────────────────────────

    /// First sighting. A row that already exists is left untouched.
    pub fn record_discovered(&self, candidate: &Candidate) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO candidates
                 (id, name, symbol, creator, description, eligible, status, discovered_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    candidate.id,
                    candidate.name,
                    candidate.symbol,
                    candidate.creator,
                    candidate.description,
                    candidate.eligible,
                    CandidateStatus::Discovered.as_str(),
                    candidate.discovered_at.to_rfc3339(),
                    now,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn set_status(&self, id: &str, status: CandidateStatus, reason: Option<&str>) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE candidates SET status = ?2, status_reason = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, status.as_str(), reason, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn mark_aborted(&self, id: &str, reason: &str) -> Result<()> {
        self.set_status(id, CandidateStatus::Aborted, Some(reason))
    }

    pub fn mark_analyzed(&self, id: &str) -> Result<()> {
        self.set_status(id, CandidateStatus::Analyzed, None)
    }

    pub fn candidate_status(&self, id: &str) -> Result<Option<CandidateStatus>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT status FROM candidates WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(raw.and_then(|s| match s.as_str() {
            "discovered" => Some(CandidateStatus::Discovered),
            "aborted" => Some(CandidateStatus::Aborted),
            "analyzed" => Some(CandidateStatus::Analyzed),
            _ => None,
        }))
    }

    fn ids_with_status(&self, sql: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(db_err)?;
        Ok(ids)
    }

    /// Candidates whose pipeline reached a terminal state.
    pub fn finished_ids(&self) -> Result<Vec<String>> {
        self.ids_with_status("SELECT id FROM candidates WHERE status IN ('aborted', 'analyzed')")
    }

    /// Candidates claimed but never finished, oldest first.
    pub fn pending_ids(&self) -> Result<Vec<String>> {
        self.ids_with_status(
            "SELECT id FROM candidates WHERE status = 'discovered' ORDER BY discovered_at",
        )
    }

    // ── Vote results ─────────────────────────────────────────────────

    pub fn save_vote_result(&self, result: &VoteResult) -> Result<()> {
        let votes_json = serde_json::to_string(&result.votes)?;
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO vote_results
                 (candidate_id, candidate_name, candidate_symbol, weighted_score, yes_count,
                  decision, critical_flag, votes_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    result.candidate_id,
                    result.candidate_name,
                    result.candidate_symbol,
                    result.weighted_score,
                    result.yes_count as i64,
                    result.decision.as_str(),
                    result.critical_flag,
                    votes_json,
                    result.timestamp.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn vote_decision(&self, candidate_id: &str) -> Result<Option<(f64, String)>> {
        self.conn()
            .query_row(
                "SELECT weighted_score, decision FROM vote_results WHERE candidate_id = ?1",
                params![candidate_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)
    }

    // ── Holdings ─────────────────────────────────────────────────────

    pub fn insert_holding(&self, holding: &Holding) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO holdings
                 (candidate_id, name, symbol, amount, entry_spend, entry_price, entry_tx,
                  exit_tx, status, last_price, pnl_percent, opened_at, closed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    holding.candidate_id,
                    holding.name,
                    holding.symbol,
                    holding.amount,
                    holding.entry_spend,
                    holding.entry_price,
                    holding.entry_tx,
                    holding.exit_tx,
                    holding.status.as_str(),
                    holding.last_price,
                    holding.pnl_percent,
                    holding.opened_at.to_rfc3339(),
                    holding.closed_at.map(|ts| ts.to_rfc3339()),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn holdings_where(&self, clause: &str) -> Result<Vec<Holding>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM holdings {} ORDER BY opened_at", clause))
            .map_err(db_err)?;
        let holdings = stmt
            .query_map([], holding_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<Holding>>>()
            .map_err(db_err)?;
        Ok(holdings)
    }

    pub fn active_holdings(&self) -> Result<Vec<Holding>> {
        self.holdings_where("WHERE status = 'holding'")
    }

    pub fn all_holdings(&self) -> Result<Vec<Holding>> {
        self.holdings_where("")
    }

    pub fn holding(&self, candidate_id: &str) -> Result<Option<Holding>> {
        self.conn()
            .query_row(
                "SELECT * FROM holdings WHERE candidate_id = ?1",
                params![candidate_id],
                holding_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    pub fn update_price(&self, candidate_id: &str, price: f64, pnl_percent: f64) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE holdings SET last_price = ?2, pnl_percent = ?3 WHERE candidate_id = ?1",
                params![candidate_id, price, pnl_percent],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn update_entry_price(&self, candidate_id: &str, price: f64) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE holdings SET entry_price = ?2, last_price = ?2, pnl_percent = 0 WHERE candidate_id = ?1",
                params![candidate_id, price],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Only a `holding` row can be sold; returns false when nothing changed.
    pub fn mark_sold(&self, candidate_id: &str, exit_tx: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute(
                "UPDATE holdings SET status = 'sold', exit_tx = ?2, closed_at = ?3
                 WHERE candidate_id = ?1 AND status = 'holding'",
                params![candidate_id, exit_tx, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    // ── Stats ────────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn();
        let count = |sql: &str| -> Result<u64> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n.max(0) as u64)
                .map_err(db_err)
        };

        let discovered = count("SELECT COUNT(*) FROM candidates")?;
        let analyzed = count("SELECT COUNT(*) FROM vote_results")?;
        let invest = count("SELECT COUNT(*) FROM vote_results WHERE decision = 'INVEST'")?;
        let pass = count("SELECT COUNT(*) FROM vote_results WHERE decision = 'PASS'")?;
        let active_holdings = count("SELECT COUNT(*) FROM holdings WHERE status = 'holding'")?;
        let buys = count("SELECT COUNT(*) FROM holdings")?;
        let sells = count("SELECT COUNT(*) FROM holdings WHERE status = 'sold'")?;

        let total_invested: f64 = conn
            .query_row("SELECT COALESCE(SUM(entry_spend), 0.0) FROM holdings", [], |row| {
                row.get(0)
            })
            .map_err(db_err)?;
        let (highest_score, lowest_score): (Option<f64>, Option<f64>) = conn
            .query_row(
                "SELECT MAX(weighted_score), MIN(weighted_score) FROM vote_results",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(db_err)?;

        Ok(StoreStats {
            discovered,
            analyzed,
            invest,
            pass,
            active_holdings,
            total_invested,
            trades: buys + sells,
            highest_score,
            lowest_score,
        })
    }
}

impl GenerationCache for SqliteStore {
    fn get(&self, key: &str) -> Option<String> {
        let result = self
            .conn()
            .query_row(
                "SELECT content FROM llm_cache WHERE cache_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional();
        match result {
            Ok(content) => content,
            Err(e) => {
                warn!("Generation cache read failed: {}", e);
                None
            }
        }
    }

    fn put(&self, key: &str, model: &str, content: &str) {
        let result = self.conn().execute(
            "INSERT OR REPLACE INTO llm_cache (cache_key, model, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, model, content, Utc::now().to_rfc3339()],
        );
        if let Err(e) = result {
            warn!("Generation cache write failed: {}", e);
        }
    }
}
