use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use super::models::*;

/// Async-safe handle to the console database.
///
/// Wraps `ConsoleDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so a slow query suspends only
/// the request that issued it.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ConsoleDb>>,
}

impl DbHandle {
    pub fn new(db: ConsoleDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ConsoleDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct ConsoleDb {
    conn: Connection,
}

const HISTORY_SELECT: &str = "
    SELECT gh.id, u.name, gh.screenshot_path, gh.player_cards, gh.board_cards,
           gh.position, gh.pot_size, gh.action_taken, gh.action_amount,
           strftime('%Y-%m-%d %H:%M:%S', gh.timestamp)
    FROM game_history gh
    JOIN users u ON gh.user_id = u.id";

fn history_entry_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let screenshot_path: String = row.get(2)?;
    Ok(HistoryEntry {
        id: row.get(0)?,
        username: row.get(1)?,
        screenshot_url: screenshot_url(&screenshot_path),
        player_cards: row.get(3)?,
        board_cards: row.get(4)?,
        position: row.get(5)?,
        pot_size: row.get(6)?,
        action_taken: row.get(7)?,
        action_amount: row.get(8)?,
        formatted_time: row.get(9)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl ConsoleDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS game_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    session_id TEXT NOT NULL,
                    screenshot_path TEXT NOT NULL,
                    game_state TEXT NOT NULL DEFAULT 'null',
                    player_cards TEXT,
                    board_cards TEXT,
                    position TEXT,
                    pot_size REAL,
                    action_taken TEXT,
                    action_amount REAL,
                    ai_decision TEXT,
                    timestamp TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_game_history_timestamp ON game_history(timestamp);
                CREATE INDEX IF NOT EXISTS idx_game_history_user ON game_history(user_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Liveness probe used by `POST /api/test-connection`.
    pub fn ping(&self) -> Result<()> {
        let one: i64 = self
            .conn
            .query_row("SELECT 1", [], |row| row.get(0))
            .context("Failed to run liveness query")?;
        anyhow::ensure!(one == 1, "Unexpected liveness result: {}", one);
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    /// Insert a user. Returns `None` if the email is already registered.
    pub fn create_user(&self, name: &str, email: &str, password_hash: &str) -> Result<Option<User>> {
        let inserted = self.conn.execute(
            "INSERT INTO users (name, email, password_hash) VALUES (?1, ?2, ?3)",
            params![name, email, password_hash],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Ok(None);
            }
            Err(e) => return Err(anyhow::Error::new(e).context("Failed to insert user")),
        }
        let id = self.conn.last_insert_rowid();
        let user = self.get_user(id)?.context("User not found after insert")?;
        Ok(Some(user))
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, name, email, password_hash, created_at FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, name, email, password_hash, created_at FROM users WHERE email = ?1",
                params![email],
                user_from_row,
            )
            .optional()
            .context("Failed to query user by email")
    }

    pub fn count_users(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("Failed to count users")
    }

    // ── Game history ──────────────────────────────────────────────────

    /// Insert one decision record stamped with the current time.
    pub fn insert_game_decision(&self, decision: &NewGameDecision) -> Result<i64> {
        self.insert_game_decision_at(decision, None)
    }

    /// Insert one decision record with an explicit `YYYY-MM-DD HH:MM:SS` timestamp.
    pub fn insert_game_decision_at(
        &self,
        decision: &NewGameDecision,
        timestamp: Option<&str>,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO game_history (
                    user_id, session_id, screenshot_path, game_state,
                    player_cards, board_cards, position, pot_size,
                    action_taken, action_amount, ai_decision, timestamp
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, COALESCE(?12, datetime('now')))",
                params![
                    decision.user_id,
                    decision.session_id,
                    decision.screenshot_path,
                    decision.game_state_text(),
                    decision.player_cards,
                    decision.board_cards,
                    decision.position,
                    decision.pot_size,
                    decision.action_taken,
                    decision.action_amount,
                    decision.ai_decision_text(),
                    timestamp,
                ],
            )
            .context("Failed to insert game decision")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_game_record(&self, id: i64) -> Result<Option<GameHistoryRecord>> {
        self.conn
            .query_row(
                "SELECT id, user_id, session_id, screenshot_path, game_state, player_cards,
                        board_cards, position, pot_size, action_taken, action_amount,
                        ai_decision, timestamp
                 FROM game_history WHERE id = ?1",
                params![id],
                |row| {
                    Ok(GameHistoryRecord {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        session_id: row.get(2)?,
                        screenshot_path: row.get(3)?,
                        game_state: row.get(4)?,
                        player_cards: row.get(5)?,
                        board_cards: row.get(6)?,
                        position: row.get(7)?,
                        pot_size: row.get(8)?,
                        action_taken: row.get(9)?,
                        action_amount: row.get(10)?,
                        ai_decision: row.get(11)?,
                        timestamp: row.get(12)?,
                    })
                },
            )
            .optional()
            .context("Failed to query game record")
    }

    /// Distinct days with history, newest first.
    pub fn list_game_dates(&self) -> Result<Vec<GameDate>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT date(timestamp) FROM game_history
                 WHERE date(timestamp) IS NOT NULL ORDER BY 1 DESC",
            )
            .context("Failed to prepare list_game_dates")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query game dates")?;
        let mut dates = Vec::new();
        for row in rows {
            let day = row.context("Failed to read game date row")?;
            dates.push(GameDate::from_iso(&day));
        }
        Ok(dates)
    }

    /// Rows whose date component equals `date` (`YYYY-MM-DD`), newest first.
    pub fn list_history_for_date(&self, date: &str) -> Result<Vec<HistoryEntry>> {
        let sql = format!(
            "{} WHERE date(gh.timestamp) = ?1 ORDER BY gh.timestamp DESC, gh.id DESC",
            HISTORY_SELECT
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_history_for_date")?;
        let rows = stmt
            .query_map(params![date], history_entry_from_row)
            .context("Failed to query history by date")?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.context("Failed to read history row")?);
        }
        Ok(entries)
    }

    /// The `limit` most recent rows, newest first.
    pub fn list_recent_history(&self, limit: i64) -> Result<Vec<HistoryEntry>> {
        let sql = format!(
            "{} ORDER BY gh.timestamp DESC, gh.id DESC LIMIT ?1",
            HISTORY_SELECT
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_recent_history")?;
        let rows = stmt
            .query_map(params![limit], history_entry_from_row)
            .context("Failed to query recent history")?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.context("Failed to read history row")?);
        }
        Ok(entries)
    }
}
