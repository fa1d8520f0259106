//! PostgreSQL state manager

use super::batch::{plan_batch, BatchReport};
use super::model::{
    Event, EventStatus, NewTxSent, SentResult, SentWrite, SkippedLog, TxLog, TxSent, TxSentStatus,
    TxType,
};
use super::store::Store;
use crate::config::DatabaseConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{debug, info};

const EVENT_COLUMNS: &str = "swap_id, origin_chain_id, destination_chain_id, resource_id, \
    deposit_nonce, sender_addr, receiver_addr, in_amount, out_amount, params, status, \
    check_deadline, create_time, update_time";

const LOG_COLUMNS: &str = "id, chain, tx_type, tx_hash, log_index, block_height, swap_id, \
    origin_chain_id, destination_chain_id, resource_id, deposit_nonce, sender_addr, \
    receiver_addr, in_amount, out_amount, params, swap_status, confirmed_num, status, \
    create_time, update_time";

const SENT_COLUMNS: &str =
    "id, chain, type, swap_id, tx_hash, nonce, status, err_msg, create_time, update_time";

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS chain_checkpoints (
                chain VARCHAR(32) PRIMARY KEY,
                block_number BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS events (
                swap_id VARCHAR(66) PRIMARY KEY,
                origin_chain_id VARCHAR(18) NOT NULL DEFAULT '',
                destination_chain_id VARCHAR(18) NOT NULL DEFAULT '',
                resource_id VARCHAR(66) NOT NULL DEFAULT '',
                deposit_nonce BIGINT NOT NULL DEFAULT 0,
                sender_addr VARCHAR(66) NOT NULL DEFAULT '',
                receiver_addr VARCHAR(66) NOT NULL DEFAULT '',
                in_amount TEXT NOT NULL DEFAULT '',
                out_amount TEXT NOT NULL DEFAULT '',
                params TEXT NOT NULL DEFAULT '',
                status VARCHAR(32),
                check_deadline BIGINT,
                create_time BIGINT NOT NULL,
                update_time BIGINT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_events_status ON events (status)",
            "CREATE INDEX IF NOT EXISTS idx_events_deadline ON events (check_deadline)",
            r#"
            CREATE TABLE IF NOT EXISTS tx_logs (
                id BIGSERIAL PRIMARY KEY,
                chain VARCHAR(32) NOT NULL,
                tx_type VARCHAR(16) NOT NULL,
                tx_hash VARCHAR(66) NOT NULL,
                log_index BIGINT NOT NULL,
                block_height BIGINT NOT NULL,
                swap_id VARCHAR(66) NOT NULL,
                origin_chain_id VARCHAR(18) NOT NULL,
                destination_chain_id VARCHAR(18) NOT NULL,
                resource_id VARCHAR(66) NOT NULL,
                deposit_nonce BIGINT NOT NULL,
                sender_addr VARCHAR(66) NOT NULL,
                receiver_addr VARCHAR(66) NOT NULL,
                in_amount TEXT NOT NULL,
                out_amount TEXT NOT NULL,
                params TEXT NOT NULL,
                swap_status SMALLINT NOT NULL,
                confirmed_num BIGINT NOT NULL DEFAULT 0,
                status VARCHAR(16) NOT NULL,
                create_time BIGINT NOT NULL,
                update_time BIGINT NOT NULL,
                UNIQUE (chain, tx_hash, log_index)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_tx_logs_chain_status ON tx_logs (chain, status)",
            "CREATE INDEX IF NOT EXISTS idx_tx_logs_swap_id ON tx_logs (swap_id)",
            "CREATE INDEX IF NOT EXISTS idx_tx_logs_tx_hash ON tx_logs (tx_hash)",
            r#"
            CREATE TABLE IF NOT EXISTS tx_sent (
                id BIGSERIAL PRIMARY KEY,
                chain VARCHAR(32) NOT NULL,
                type VARCHAR(16) NOT NULL,
                swap_id VARCHAR(66) NOT NULL,
                tx_hash VARCHAR(66) NOT NULL DEFAULT '',
                nonce BIGINT NOT NULL DEFAULT 0,
                status VARCHAR(16) NOT NULL,
                err_msg TEXT NOT NULL DEFAULT '',
                create_time BIGINT NOT NULL,
                update_time BIGINT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_tx_sent_tx_hash ON tx_sent (tx_hash)",
            "CREATE INDEX IF NOT EXISTS idx_tx_sent_swap_type ON tx_sent (swap_id, type)",
            "CREATE INDEX IF NOT EXISTS idx_tx_sent_chain_status ON tx_sent (chain, status)",
            r#"
            CREATE TABLE IF NOT EXISTS skipped_logs (
                id BIGSERIAL PRIMARY KEY,
                chain VARCHAR(32) NOT NULL,
                tx_hash VARCHAR(66) NOT NULL,
                log_index BIGINT,
                block_height BIGINT,
                reason TEXT NOT NULL,
                create_time BIGINT NOT NULL,
                UNIQUE (chain, tx_hash, log_index)
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!("Database migrations complete");
        Ok(())
    }
}

fn event_from_row(row: &PgRow) -> RelayerResult<Event> {
    let status: Option<String> = row.try_get("status")?;
    Ok(Event {
        swap_id: row.try_get("swap_id")?,
        origin_chain_id: row.try_get("origin_chain_id")?,
        destination_chain_id: row.try_get("destination_chain_id")?,
        resource_id: row.try_get("resource_id")?,
        deposit_nonce: row.try_get::<i64, _>("deposit_nonce")? as u64,
        sender_addr: row.try_get("sender_addr")?,
        receiver_addr: row.try_get("receiver_addr")?,
        in_amount: row.try_get("in_amount")?,
        out_amount: row.try_get("out_amount")?,
        params: row.try_get("params")?,
        status: status.map(|s| s.parse()).transpose()?,
        check_deadline: row.try_get("check_deadline")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}

fn log_from_row(row: &PgRow) -> RelayerResult<TxLog> {
    Ok(TxLog {
        id: row.try_get("id")?,
        chain: row.try_get("chain")?,
        tx_type: row.try_get::<String, _>("tx_type")?.parse()?,
        tx_hash: row.try_get("tx_hash")?,
        log_index: row.try_get::<i64, _>("log_index")? as u64,
        block_height: row.try_get::<i64, _>("block_height")? as u64,
        swap_id: row.try_get("swap_id")?,
        origin_chain_id: row.try_get("origin_chain_id")?,
        destination_chain_id: row.try_get("destination_chain_id")?,
        resource_id: row.try_get("resource_id")?,
        deposit_nonce: row.try_get::<i64, _>("deposit_nonce")? as u64,
        sender_addr: row.try_get("sender_addr")?,
        receiver_addr: row.try_get("receiver_addr")?,
        in_amount: row.try_get("in_amount")?,
        out_amount: row.try_get("out_amount")?,
        params: row.try_get("params")?,
        swap_status: row.try_get::<i16, _>("swap_status")? as u8,
        confirmed_num: row.try_get::<i64, _>("confirmed_num")? as u64,
        status: row.try_get::<String, _>("status")?.parse()?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}

fn sent_from_row(row: &PgRow) -> RelayerResult<TxSent> {
    Ok(TxSent {
        id: row.try_get("id")?,
        chain: row.try_get("chain")?,
        tx_type: row.try_get::<String, _>("type")?.parse()?,
        swap_id: row.try_get("swap_id")?,
        tx_hash: row.try_get("tx_hash")?,
        nonce: row.try_get::<i64, _>("nonce")? as u64,
        status: row.try_get::<String, _>("status")?.parse()?,
        err_msg: row.try_get("err_msg")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}

async fn insert_sent_row<'e, E>(executor: E, sent: &NewTxSent, now: i64) -> RelayerResult<TxSent>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO tx_sent (chain, type, swap_id, tx_hash, nonce, status, err_msg,
            create_time, update_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING {}
        "#,
        SENT_COLUMNS
    ))
    .bind(&sent.chain)
    .bind(sent.tx_type.as_str())
    .bind(&sent.swap_id)
    .bind(&sent.tx_hash)
    .bind(sent.nonce as i64)
    .bind(sent.status.as_str())
    .bind(&sent.err_msg)
    .bind(now)
    .fetch_one(executor)
    .await?;
    sent_from_row(&row)
}

async fn finish_sent_row<'e, E>(executor: E, id: i64, result: &SentResult, now: i64) -> RelayerResult<()>
where
    E: sqlx::PgExecutor<'e>,
{
    let done = sqlx::query(
        r#"
        UPDATE tx_sent SET tx_hash = $2, nonce = $3, status = $4, err_msg = $5, update_time = $6
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&result.tx_hash)
    .bind(result.nonce as i64)
    .bind(result.status.as_str())
    .bind(&result.err_msg)
    .bind(now)
    .execute(executor)
    .await?;

    if done.rows_affected() == 0 {
        return Err(RelayerError::Store(format!("tx_sent {} not found", id)));
    }
    Ok(())
}

#[async_trait]
impl Store for StateManager {
    async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_checkpoint(&self, chain: &str) -> RelayerResult<Option<u64>> {
        let row = sqlx::query("SELECT block_number FROM chain_checkpoints WHERE chain = $1")
            .bind(chain)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_get::<i64, _>("block_number").map(|b| b as u64))
            .transpose()
            .map_err(RelayerError::from)
    }

    async fn record_scan(&self, chain: &str, logs: &[TxLog], to_block: u64) -> RelayerResult<usize> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for log in logs {
            let result = sqlx::query(
                r#"
                INSERT INTO tx_logs (chain, tx_type, tx_hash, log_index, block_height, swap_id,
                    origin_chain_id, destination_chain_id, resource_id, deposit_nonce,
                    sender_addr, receiver_addr, in_amount, out_amount, params, swap_status,
                    confirmed_num, status, create_time, update_time)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, 'init', $18, $18)
                ON CONFLICT (chain, tx_hash, log_index) DO NOTHING
                "#,
            )
            .bind(&log.chain)
            .bind(log.tx_type.as_str())
            .bind(&log.tx_hash)
            .bind(log.log_index as i64)
            .bind(log.block_height as i64)
            .bind(&log.swap_id)
            .bind(&log.origin_chain_id)
            .bind(&log.destination_chain_id)
            .bind(&log.resource_id)
            .bind(log.deposit_nonce as i64)
            .bind(&log.sender_addr)
            .bind(&log.receiver_addr)
            .bind(&log.in_amount)
            .bind(&log.out_amount)
            .bind(&log.params)
            .bind(log.swap_status as i16)
            .bind(log.confirmed_num as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        sqlx::query(
            r#"
            INSERT INTO chain_checkpoints (chain, block_number, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (chain)
            DO UPDATE SET block_number = $2, updated_at = NOW()
            "#,
        )
        .bind(chain)
        .bind(to_block as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("Saved checkpoint for chain {}: block {}", chain, to_block);
        Ok(inserted)
    }

    async fn record_skipped_logs(&self, skipped: &[SkippedLog]) -> RelayerResult<usize> {
        let mut kept = 0;
        for log in skipped {
            let result = sqlx::query(
                r#"
                INSERT INTO skipped_logs (chain, tx_hash, log_index, block_height, reason, create_time)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&log.chain)
            .bind(&log.tx_hash)
            .bind(log.log_index.map(|i| i as i64))
            .bind(log.block_height.map(|b| b as i64))
            .bind(&log.reason)
            .bind(log.create_time)
            .execute(&self.pool)
            .await?;
            kept += result.rows_affected() as usize;
        }
        Ok(kept)
    }

    async fn refresh_confirmations(&self, chain: &str, head: u64) -> RelayerResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tx_logs SET confirmed_num = GREATEST($2 - block_height, 0)
            WHERE chain = $1 AND status = 'init'
            "#,
        )
        .bind(chain)
        .bind(head as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn confirm_batch(
        &self,
        chain: &str,
        threshold: u64,
        now: i64,
        stuck_timeout_secs: i64,
    ) -> RelayerResult<BatchReport> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM tx_logs WHERE chain = $1 AND status = 'init' AND confirmed_num >= $2 \
             ORDER BY id FOR UPDATE",
            LOG_COLUMNS
        ))
        .bind(chain)
        .bind(threshold as i64)
        .fetch_all(&mut *tx)
        .await?;
        let ready = rows.iter().map(log_from_row).collect::<RelayerResult<Vec<_>>>()?;
        if ready.is_empty() {
            return Ok(BatchReport::default());
        }

        let mut first_logs: HashMap<&str, &TxLog> = HashMap::new();
        for log in &ready {
            first_logs.entry(log.swap_id.as_str()).or_insert(log);
        }
        let mut swap_ids: Vec<String> = first_logs.keys().map(|s| s.to_string()).collect();
        swap_ids.sort();

        // Create missing rows up front so every touched swap can be locked,
        // including swaps another worker is creating concurrently.
        let mut created = Vec::new();
        for swap_id in &swap_ids {
            let event = first_logs[swap_id.as_str()].to_event(now);
            let result = sqlx::query(
                r#"
                INSERT INTO events (swap_id, origin_chain_id, destination_chain_id, resource_id,
                    deposit_nonce, create_time, update_time)
                VALUES ($1, $2, $3, $4, $5, $6, $6)
                ON CONFLICT (swap_id) DO NOTHING
                "#,
            )
            .bind(&event.swap_id)
            .bind(&event.origin_chain_id)
            .bind(&event.destination_chain_id)
            .bind(&event.resource_id)
            .bind(event.deposit_nonce as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 1 {
                created.push(swap_id.clone());
            }
        }

        let rows = sqlx::query(&format!(
            "SELECT {} FROM events WHERE swap_id = ANY($1) ORDER BY swap_id FOR UPDATE",
            EVENT_COLUMNS
        ))
        .bind(&swap_ids)
        .fetch_all(&mut *tx)
        .await?;
        let mut existing = HashMap::new();
        for row in &rows {
            let event = event_from_row(row)?;
            if !created.contains(&event.swap_id) {
                existing.insert(event.swap_id.clone(), event);
            }
        }

        let rows = sqlx::query(&format!(
            "SELECT {} FROM tx_logs WHERE swap_id = ANY($1) AND status = 'confirmed'",
            LOG_COLUMNS
        ))
        .bind(&swap_ids)
        .fetch_all(&mut *tx)
        .await?;
        let prior = rows.iter().map(log_from_row).collect::<RelayerResult<Vec<_>>>()?;

        let plan = plan_batch(&ready, &existing, &prior, now, stuck_timeout_secs);

        sqlx::query("UPDATE tx_logs SET status = 'confirmed', update_time = $1 WHERE id = ANY($2)")
            .bind(now)
            .bind(&plan.confirmed_log_ids)
            .execute(&mut *tx)
            .await?;

        for event in &plan.events {
            sqlx::query(
                r#"
                UPDATE events SET origin_chain_id = $2, destination_chain_id = $3,
                    resource_id = $4, deposit_nonce = $5, sender_addr = $6, receiver_addr = $7,
                    in_amount = $8, out_amount = $9, params = $10, status = $11,
                    check_deadline = $12, update_time = $13
                WHERE swap_id = $1
                "#,
            )
            .bind(&event.swap_id)
            .bind(&event.origin_chain_id)
            .bind(&event.destination_chain_id)
            .bind(&event.resource_id)
            .bind(event.deposit_nonce as i64)
            .bind(&event.sender_addr)
            .bind(&event.receiver_addr)
            .bind(&event.in_amount)
            .bind(&event.out_amount)
            .bind(&event.params)
            .bind(event.status.map(|s| s.as_str()))
            .bind(event.check_deadline)
            .bind(event.update_time)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(BatchReport::from(&plan))
    }

    async fn get_event(&self, swap_id: &str) -> RelayerResult<Option<Event>> {
        let row = sqlx::query(&format!("SELECT {} FROM events WHERE swap_id = $1", EVENT_COLUMNS))
            .bind(swap_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn events_by_statuses(&self, statuses: &[EventStatus]) -> RelayerResult<Vec<Event>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {} FROM events WHERE status = ANY($1) ORDER BY create_time",
            EVENT_COLUMNS
        ))
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn settle_report(
        &self,
        swap_id: &str,
        expected: EventStatus,
        next: EventStatus,
        sent: Option<SentWrite>,
    ) -> RelayerResult<bool> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM events WHERE swap_id = $1 FOR UPDATE")
            .bind(swap_id)
            .fetch_optional(&mut *tx)
            .await?;
        let current: Option<String> = match row {
            Some(row) => row.try_get("status")?,
            None => return Ok(false),
        };
        if current.as_deref() != Some(expected.as_str()) {
            return Ok(false);
        }

        sqlx::query("UPDATE events SET status = $2, update_time = $3 WHERE swap_id = $1")
            .bind(swap_id)
            .bind(next.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        match &sent {
            Some(SentWrite::Insert(sent)) => {
                insert_sent_row(&mut *tx, sent, now).await?;
            }
            Some(SentWrite::Finish(id, result)) => {
                finish_sent_row(&mut *tx, *id, result, now).await?;
            }
            None => {}
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn insert_tx_sent(&self, sent: NewTxSent) -> RelayerResult<TxSent> {
        insert_sent_row(&self.pool, &sent, Utc::now().timestamp()).await
    }

    async fn finish_tx_sent(&self, id: i64, result: &SentResult) -> RelayerResult<()> {
        finish_sent_row(&self.pool, id, result, Utc::now().timestamp()).await
    }

    async fn tx_sent_for_swap(&self, swap_id: &str, tx_type: TxType) -> RelayerResult<Vec<TxSent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tx_sent WHERE swap_id = $1 AND type = $2 ORDER BY id DESC",
            SENT_COLUMNS
        ))
        .bind(swap_id)
        .bind(tx_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sent_from_row).collect()
    }

    async fn tx_sent_by_hash(&self, tx_hash: &str) -> RelayerResult<Option<TxSent>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM tx_sent WHERE lower(tx_hash) = lower($1) ORDER BY id DESC LIMIT 1",
            SENT_COLUMNS
        ))
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(sent_from_row).transpose()
    }

    async fn unsettled_tx_sent(&self, chain: &str) -> RelayerResult<Vec<TxSent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tx_sent WHERE chain = $1 AND status IN ('init', 'pending', 'not_found') \
             ORDER BY id",
            SENT_COLUMNS
        ))
        .bind(chain)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sent_from_row).collect()
    }

    async fn update_tx_sent_status(&self, id: i64, status: TxSentStatus) -> RelayerResult<()> {
        sqlx::query("UPDATE tx_sent SET status = $2, update_time = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn overdue_swaps(&self, now: i64) -> RelayerResult<Vec<Event>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM events WHERE check_deadline IS NOT NULL AND check_deadline <= $1",
            EVENT_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn clear_deadline(&self, swap_id: &str) -> RelayerResult<()> {
        sqlx::query("UPDATE events SET check_deadline = NULL WHERE swap_id = $1")
            .bind(swap_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
