use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One finalized round row, mirroring the chain's round struct at the
/// moment its close was observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRound {
    pub market: String,
    pub round_id: u64,
    pub pair: String,
    pub start_ts: i64,
    pub lock_price: f64,
    pub close_price: f64,
    pub bet_volume: f64,
    pub pump_amount: f64,
    pub dump_amount: f64,
    pub total_payout: f64,
    pub oracle_called: bool,
    pub rewards_calculated: bool,
    pub cancelled: bool,
    pub winner: String,
}

/// One participant's stake and computed payout within a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedBet {
    pub player_address: String,
    pub pump_amount: f64,
    pub dump_amount: f64,
    pub payout: f64,
}

#[derive(Clone)]
pub struct RoundStore {
    conn: Arc<Mutex<Connection>>,
}

impl RoundStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open rounds db")?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("open in-memory rounds db")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rounds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market TEXT NOT NULL,
                round_id INTEGER NOT NULL,
                pair TEXT NOT NULL,
                start_ts INTEGER NOT NULL,
                lock_price REAL NOT NULL,
                close_price REAL NOT NULL,
                bet_volume REAL NOT NULL,
                pump_amount REAL NOT NULL,
                dump_amount REAL NOT NULL,
                total_payout REAL NOT NULL,
                oracle_called INTEGER NOT NULL,
                rewards_calculated INTEGER NOT NULL,
                cancelled INTEGER NOT NULL,
                winner TEXT NOT NULL,
                UNIQUE(market, round_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS round_players (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                round_ref INTEGER NOT NULL,
                player_address TEXT NOT NULL,
                pump_amount REAL NOT NULL,
                dump_amount REAL NOT NULL,
                payout REAL NOT NULL,
                FOREIGN KEY (round_ref) REFERENCES rounds(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rounds_market_round ON rounds(market, round_id DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_round_players_round ON round_players(round_ref)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Whether a round row already exists; recording is idempotent at
    /// round-row granularity.
    pub async fn round_exists(&self, market: &str, round_id: u64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached("SELECT 1 FROM rounds WHERE market = ?1 AND round_id = ?2 LIMIT 1")?;
        let mut rows = stmt.query(params![market, round_id as i64])?;
        Ok(rows.next()?.is_some())
    }

    /// Inserts the round row and returns its rowid for participant rows.
    pub async fn insert_round(&self, round: &PersistedRound) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO rounds \
             (market, round_id, pair, start_ts, lock_price, close_price, bet_volume, \
              pump_amount, dump_amount, total_payout, oracle_called, rewards_calculated, \
              cancelled, winner) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                &round.market,
                round.round_id as i64,
                &round.pair,
                round.start_ts,
                round.lock_price,
                round.close_price,
                round.bet_volume,
                round.pump_amount,
                round.dump_amount,
                round.total_payout,
                round.oracle_called,
                round.rewards_calculated,
                round.cancelled,
                &round.winner,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn insert_players(&self, round_ref: i64, bets: &[PersistedBet]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO round_players \
                 (round_ref, player_address, pump_amount, dump_amount, payout) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for bet in bets {
                stmt.execute(params![
                    round_ref,
                    &bet.player_address,
                    bet.pump_amount,
                    bet.dump_amount,
                    bet.payout,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub async fn player_count(&self, round_ref: i64) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM round_players WHERE round_ref = ?1",
            params![round_ref],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Most recently recorded rounds, newest first. Backs the liveness
    /// API's read-only view.
    pub async fn recent_rounds(&self, limit: usize) -> Result<Vec<PersistedRound>> {
        let limit = limit.clamp(1, 500) as i64;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT market, round_id, pair, start_ts, lock_price, close_price, bet_volume, \
             pump_amount, dump_amount, total_payout, oracle_called, rewards_calculated, \
             cancelled, winner \
             FROM rounds ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(PersistedRound {
                market: row.get(0)?,
                round_id: row.get::<_, i64>(1)? as u64,
                pair: row.get(2)?,
                start_ts: row.get(3)?,
                lock_price: row.get(4)?,
                close_price: row.get(5)?,
                bet_volume: row.get(6)?,
                pump_amount: row.get(7)?,
                dump_amount: row.get(8)?,
                total_payout: row.get(9)?,
                oracle_called: row.get(10)?,
                rewards_calculated: row.get(11)?,
                cancelled: row.get(12)?,
                winner: row.get(13)?,
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_round(market: &str, round_id: u64) -> PersistedRound {
        PersistedRound {
            market: market.to_string(),
            round_id,
            pair: format!("{market}/USD"),
            start_ts: 1_700_000_000,
            lock_price: 50_000.25,
            close_price: 50_100.75,
            bet_volume: 12.5,
            pump_amount: 7.5,
            dump_amount: 5.0,
            total_payout: 14.25,
            oracle_called: true,
            rewards_calculated: true,
            cancelled: false,
            winner: "pump".to_string(),
        }
    }

    #[tokio::test]
    async fn round_rows_are_unique_per_market_and_round() {
        let store = RoundStore::in_memory().unwrap();
        let round = sample_round("BTC", 10);

        assert!(!store.round_exists("BTC", 10).await.unwrap());
        store.insert_round(&round).await.unwrap();
        assert!(store.round_exists("BTC", 10).await.unwrap());

        // Same round id on another market is a distinct row.
        store.insert_round(&sample_round("ETH", 10)).await.unwrap();

        // Duplicate insert violates the unique key.
        assert!(store.insert_round(&round).await.is_err());
    }

    #[tokio::test]
    async fn players_attach_to_their_round() {
        let store = RoundStore::in_memory().unwrap();
        let round_ref = store.insert_round(&sample_round("BTC", 3)).await.unwrap();

        let bets = vec![
            PersistedBet {
                player_address: "0xaa".into(),
                pump_amount: 1.0,
                dump_amount: 0.0,
                payout: 1.9,
            },
            PersistedBet {
                player_address: "0xbb".into(),
                pump_amount: 0.0,
                dump_amount: 2.0,
                payout: 0.0,
            },
        ];
        store.insert_players(round_ref, &bets).await.unwrap();
        assert_eq!(store.player_count(round_ref).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn recent_rounds_newest_first() {
        let store = RoundStore::in_memory().unwrap();
        for id in 1..=5 {
            store.insert_round(&sample_round("SOL", id)).await.unwrap();
        }
        let recent = store.recent_rounds(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].round_id, 5);
        assert_eq!(recent[2].round_id, 3);
    }

    #[tokio::test]
    async fn recent_rounds_surfaces_undecodable_rows() {
        let store = RoundStore::in_memory().unwrap();
        store.insert_round(&sample_round("BTC", 1)).await.unwrap();
        // Corrupt a typed column; the read must fail loudly, not drop
        // the row.
        store
            .conn
            .lock()
            .await
            .execute("UPDATE rounds SET start_ts = 'garbage'", [])
            .unwrap();
        assert!(store.recent_rounds(10).await.is_err());
    }

    #[tokio::test]
    async fn persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.db");
        {
            let store = RoundStore::new(path.to_str().unwrap()).unwrap();
            store.insert_round(&sample_round("BTC", 1)).await.unwrap();
        }
        let store = RoundStore::new(path.to_str().unwrap()).unwrap();
        assert!(store.round_exists("BTC", 1).await.unwrap());
    }
}
