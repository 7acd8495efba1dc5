//! 旅行数据库（SQLite）
//!
//! 航班 / 机票、酒店、租车、游览推荐、日历事件。连接由 Mutex 保护，所有访问都在
//! spawn_blocking 中进行；写操作在事务内执行，提交成功后递增写计数。
//! 写调用带截止时间时，截止后不再开始写入，已在进行的写入在提交前回滚。
//! 只有动作处理函数会调用这里的方法。

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rusqlite::{Connection, Transaction};
use thiserror::Error;

use crate::actions::{write_deadline, ActionFault};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS flights (
    flight_id INTEGER PRIMARY KEY,
    flight_no TEXT NOT NULL,
    departure_airport TEXT NOT NULL,
    arrival_airport TEXT NOT NULL,
    scheduled_departure TEXT NOT NULL,
    scheduled_arrival TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'Scheduled'
);
CREATE TABLE IF NOT EXISTS tickets (
    ticket_no TEXT PRIMARY KEY,
    passenger_id TEXT NOT NULL,
    flight_id INTEGER NOT NULL REFERENCES flights(flight_id),
    fare_conditions TEXT NOT NULL,
    seat_no TEXT,
    cancelled INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS hotels (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    location TEXT NOT NULL,
    price_tier TEXT NOT NULL,
    checkin_date TEXT,
    checkout_date TEXT,
    booked INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS car_rentals (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    location TEXT NOT NULL,
    price_tier TEXT NOT NULL,
    start_date TEXT,
    end_date TEXT,
    booked INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS trip_recommendations (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    location TEXT NOT NULL,
    keywords TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '',
    booked INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS calendar_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    date TEXT NOT NULL,
    notes TEXT
);
"#;

const SEED: &str = r#"
INSERT INTO flights VALUES
    (1, 'LX0112', 'CDG', 'BSL', '2025-03-02 08:30', '2025-03-02 09:45', 'Scheduled'),
    (2, 'LX0112', 'CDG', 'BSL', '2025-03-04 08:30', '2025-03-04 09:45', 'Scheduled'),
    (3, 'LX0114', 'CDG', 'BSL', '2025-03-04 17:10', '2025-03-04 18:25', 'Scheduled'),
    (4, 'LX0638', 'ZRH', 'CDG', '2025-03-07 12:05', '2025-03-07 13:20', 'Scheduled'),
    (5, 'LX0318', 'ZRH', 'LHR', '2025-03-08 07:40', '2025-03-08 08:25', 'Scheduled');
INSERT INTO tickets VALUES
    ('7240005432906569', '3442 587242', 1, 'Economy', '18E', 0),
    ('7240005432906570', '3442 587242', 4, 'Economy', '21A', 0);
INSERT INTO hotels (id, name, location, price_tier) VALUES
    (1, 'Hilton Basel', 'Basel', 'Luxury'),
    (2, 'Marriott Zurich', 'Zurich', 'Upscale'),
    (3, 'Hyatt Regency Basel', 'Basel', 'Upper Upscale'),
    (4, 'Radisson Blu Lucerne', 'Lucerne', 'Midscale'),
    (5, 'Best Western Bern', 'Bern', 'Upper Midscale'),
    (6, 'InterContinental Geneva', 'Geneva', 'Luxury'),
    (7, 'Sheraton Zurich', 'Zurich', 'Upper Upscale'),
    (8, 'Hilton Zurich', 'Zurich', 'Luxury'),
    (9, 'Holiday Inn Basel', 'Basel', 'Upper Midscale'),
    (10, 'Four Seasons Lucerne', 'Lucerne', 'Luxury');
INSERT INTO car_rentals (id, name, location, price_tier) VALUES
    (1, 'Europcar', 'Basel', 'Economy'),
    (2, 'Avis', 'Basel', 'Luxury'),
    (3, 'Hertz', 'Zurich', 'Midsize'),
    (4, 'Sixt', 'Zurich', 'Luxury'),
    (5, 'Enterprise', 'Geneva', 'Premium'),
    (6, 'Thrifty', 'Bern', 'Economy');
INSERT INTO trip_recommendations (id, name, location, keywords, details) VALUES
    (1, 'Basel Minster', 'Basel', 'landmark, history', 'Visit the historic Basel Minster.'),
    (2, 'Kunstmuseum Basel', 'Basel', 'art, museum', 'Explore the extensive art collection.'),
    (3, 'Zurich Old Town', 'Zurich', 'history, architecture', 'Walk the medieval lanes of the Altstadt.'),
    (4, 'Swiss National Museum', 'Zurich', 'history, museum', 'Swiss cultural history in a castle-like building.'),
    (5, 'Chapel Bridge', 'Lucerne', 'landmark, bridge', 'Cross the oldest covered bridge in Europe.'),
    (6, 'Mount Pilatus', 'Lucerne', 'nature, mountain', 'Ride the steepest cogwheel railway to the summit.');
"#;

/// 旅行数据库句柄，可廉价克隆
#[derive(Clone)]
pub struct TravelStore {
    conn: Arc<Mutex<Connection>>,
    mutations: Arc<AtomicU64>,
}

impl TravelStore {
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// 打开（或创建）文件库；表为空时写入演示数据
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        let hotels: i64 = conn.query_row("SELECT COUNT(*) FROM hotels", [], |r| r.get(0))?;
        if hotels == 0 {
            conn.execute_batch(SEED)?;
            tracing::info!("Seeded travel store with demo data");
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            mutations: Arc::new(AtomicU64::new(0)),
        })
    }

    /// 已提交的写操作次数
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    pub async fn read<T, F>(&self, f: F) -> Result<T, ActionFault>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, ActionFault> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| ActionFault::unavailable("travel store is unavailable"))?;
            f(&*guard)
        })
        .await
        .map_err(|e| ActionFault::unavailable(format!("travel store task failed: {e}")))?
    }

    /// 在事务内执行写操作；f 返回 Err 或超过写截止时间时回滚，写计数不变
    pub async fn write<T, F>(&self, f: F) -> Result<T, ActionFault>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, ActionFault> + Send + 'static,
    {
        let deadline = write_deadline();
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ActionFault::unavailable("timed out before the write started"));
        }
        let conn = self.conn.clone();
        let mutations = self.mutations.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| ActionFault::unavailable("travel store is unavailable"))?;
            let tx = guard.transaction().map_err(db_fault)?;
            let out = f(&tx)?;
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!("write finished after its deadline; rolling back");
                return Err(ActionFault::unavailable("timed out; the write was rolled back"));
            }
            tx.commit().map_err(db_fault)?;
            mutations.fetch_add(1, Ordering::SeqCst);
            Ok(out)
        })
        .await
        .map_err(|e| ActionFault::unavailable(format!("travel store task failed: {e}")))?
    }
}

pub(crate) fn db_fault(e: rusqlite::Error) -> ActionFault {
    tracing::warn!(error = %e, "travel store error");
    ActionFault::unavailable(format!("travel database error: {e}"))
}

/// LIKE 模式：前后加 %
pub(crate) fn like(s: &str) -> String {
    format!("%{}%", s.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_in_memory() {
        let store = TravelStore::in_memory().unwrap();
        let count = store
            .read(|c| {
                c.query_row("SELECT COUNT(*) FROM hotels WHERE location = 'Zurich'", [], |r| {
                    r.get::<_, i64>(0)
                })
                .map_err(db_fault)
            })
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let store = TravelStore::in_memory().unwrap();
        let res: Result<(), _> = store
            .write(|tx| {
                tx.execute("UPDATE hotels SET booked = 1 WHERE id = 1", [])
                    .map_err(db_fault)?;
                Err(ActionFault::conflict("abort"))
            })
            .await;
        assert!(res.is_err());
        let booked: i64 = store
            .read(|c| {
                c.query_row("SELECT booked FROM hotels WHERE id = 1", [], |r| r.get(0))
                    .map_err(db_fault)
            })
            .await
            .unwrap();
        assert_eq!(booked, 0);
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("travel.sqlite");
        {
            let store = TravelStore::open(&path).unwrap();
            store
                .write(|tx| {
                    tx.execute(
                        "INSERT INTO calendar_events (title, date) VALUES ('Check in', '2025-03-03')",
                        [],
                    )
                    .map_err(db_fault)
                })
                .await
                .unwrap();
            assert_eq!(store.mutation_count(), 1);
        }
        let reopened = TravelStore::open(&path).unwrap();
        let events: i64 = reopened
            .read(|c| {
                c.query_row("SELECT COUNT(*) FROM calendar_events", [], |r| r.get(0))
                    .map_err(db_fault)
            })
            .await
            .unwrap();
        assert_eq!(events, 1);
    }
}
