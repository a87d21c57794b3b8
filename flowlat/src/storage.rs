use crate::latency::FlowLatency;
use rusqlite::{params, Connection, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::Receiver;
use tokio::time::{interval, Duration};

const BATCH_SIZE: usize = 1000;

#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        let _: String = conn.query_row("PRAGMA journal_mode=WAL;", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS flows (
                id INTEGER PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                protocol TEXT NOT NULL,
                src_ip TEXT NOT NULL,
                src_port INTEGER,
                dst_ip TEXT NOT NULL,
                dst_port INTEGER,
                ttl INTEGER,
                latency_ms REAL NOT NULL,
                src_hostname TEXT,
                dst_hostname TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_flows_timestamp ON flows(timestamp)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Batch measurements from `rx` and write them every 2 seconds or every
    /// `BATCH_SIZE` rows, whichever comes first. Returns once the channel
    /// closes and the last batch is flushed.
    pub async fn run_writer(&self, mut rx: Receiver<FlowLatency>) {
        let mut buffer = Vec::new();
        let mut ticker = interval(Duration::from_secs(2));

        loop {
            tokio::select! {
                flow = rx.recv() => match flow {
                    Some(flow) => {
                        buffer.push(flow);
                        if buffer.len() >= BATCH_SIZE {
                            self.flush(&mut buffer);
                        }
                    }
                    None => {
                        if !buffer.is_empty() {
                            self.flush(&mut buffer);
                        }
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer);
                    }
                }
            }
        }
    }

    /// Write out `buffer` and empty it. A failed batch is dropped so a
    /// database that keeps failing cannot grow the backlog without bound.
    fn flush(&self, buffer: &mut Vec<FlowLatency>) {
        if let Err(e) = self.insert_batch(buffer) {
            tracing::error!("Failed to write {} flows, dropping them: {}", buffer.len(), e);
        }
        buffer.clear();
    }

    pub fn insert_batch(&self, flows: &[FlowLatency]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO flows (timestamp, protocol, src_ip, src_port, dst_ip, dst_port, ttl, latency_ms, src_hostname, dst_hostname)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;

            for flow in flows {
                stmt.execute(params![
                    flow.timestamp,
                    flow.protocol,
                    flow.src_ip,
                    flow.src_port,
                    flow.dst_ip,
                    flow.dst_port,
                    flow.ttl,
                    flow.latency_ms,
                    flow.src_hostname,
                    flow.dst_hostname
                ])?;
            }
        }
        tx.commit()
    }

    pub fn query_history(&self, limit: usize) -> Result<Vec<FlowLatency>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT timestamp, protocol, src_ip, src_port, dst_ip, dst_port, ttl, latency_ms, src_hostname, dst_hostname
             FROM flows ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok(FlowLatency {
                timestamp: row.get(0)?,
                protocol: row.get(1)?,
                src_ip: row.get(2)?,
                src_port: row.get(3)?,
                dst_ip: row.get(4)?,
                dst_port: row.get(5)?,
                ttl: row.get(6)?,
                latency_ms: row.get(7)?,
                src_hostname: row.get(8)?,
                dst_hostname: row.get(9)?,
            })
        })?;

        rows.collect()
    }

    pub fn delete_old_data(&self, older_than_seconds: u64) -> Result<usize> {
        let cutoff_ms =
            chrono::Utc::now().timestamp_millis() - (older_than_seconds as i64 * 1000);
        let conn = self.conn();
        conn.execute("DELETE FROM flows WHERE timestamp < ?1", params![cutoff_ms])
    }
}
