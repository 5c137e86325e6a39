mod discovery_state;
mod route_table;

pub use discovery_state::DiscoveryState;
pub use route_table::RouteTable;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::RoutingError;
use crate::model::{Node, NodeId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS node (
    local_id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS route_entry (
    discovery_uuid TEXT PRIMARY KEY,
    destination_local_id INTEGER NOT NULL,
    next_hop_local_id INTEGER NOT NULL,
    previous_hop_local_id INTEGER,
    hop_count INTEGER NOT NULL,
    opened INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_route_destination ON route_entry(destination_local_id);

CREATE TABLE IF NOT EXISTS route_usage (
    usage_request_uuid TEXT PRIMARY KEY,
    route_entry_discovery_uuid TEXT NOT NULL
        REFERENCES route_entry(discovery_uuid) ON DELETE CASCADE,
    last_used_timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_usage_route ON route_usage(route_entry_discovery_uuid);

CREATE TABLE IF NOT EXISTS route_request_entry (
    request_uuid TEXT PRIMARY KEY,
    destination_local_id INTEGER NOT NULL,
    previous_hop_local_id INTEGER
);

CREATE TABLE IF NOT EXISTS broadcast_status_entry (
    request_uuid TEXT NOT NULL
        REFERENCES route_request_entry(request_uuid) ON DELETE CASCADE,
    neighbor_local_id INTEGER NOT NULL,
    pending_response_in_progress INTEGER NOT NULL,
    PRIMARY KEY (request_uuid, neighbor_local_id)
);
CREATE INDEX IF NOT EXISTS idx_broadcast_request ON broadcast_status_entry(request_uuid);
";

/// Address-to-`NodeId` resolution, backed by the same connection as the
/// route table and discovery state. A `Node` is created lazily on first
/// sighting and never deleted.
#[derive(Clone)]
pub struct NodeDirectory {
    conn: Arc<Mutex<Connection>>,
}

impl NodeDirectory {
    fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Resolve `address` to a `NodeId`, inserting a new `Node` row if this
    /// is the first time the address has been seen.
    pub fn resolve_or_create(&self, address: &str) -> Result<NodeId, RoutingError> {
        let conn = self.conn.lock().expect("node directory connection poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO node (address) VALUES (?1)",
            rusqlite::params![address],
        )?;
        let local_id: i64 = conn.query_row(
            "SELECT local_id FROM node WHERE address = ?1",
            rusqlite::params![address],
            |row| row.get(0),
        )?;
        Ok(NodeId(local_id))
    }

    /// Resolve `address` only if it has already been seen.
    pub fn resolve(&self, address: &str) -> Result<Option<NodeId>, RoutingError> {
        let conn = self.conn.lock().expect("node directory connection poisoned");
        let result = conn.query_row(
            "SELECT local_id FROM node WHERE address = ?1",
            rusqlite::params![address],
            |row| row.get::<_, i64>(0),
        );
        match result {
            Ok(id) => Ok(Some(NodeId(id))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get(&self, local_id: NodeId) -> Result<Option<Node>, RoutingError> {
        let conn = self.conn.lock().expect("node directory connection poisoned");
        let result = conn.query_row(
            "SELECT local_id, address FROM node WHERE local_id = ?1",
            rusqlite::params![local_id.0],
            |row| {
                Ok(Node {
                    local_id: NodeId(row.get(0)?),
                    address: row.get(1)?,
                })
            },
        );
        match result {
            Ok(node) => Ok(Some(node)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Open (or create) the sqlite-backed store at `path` and return the three
/// collaborating handles, all sharing one connection so that foreign-key
/// cascades span route table and discovery state rows alike.
pub fn open(path: &str) -> Result<(NodeDirectory, RouteTable, DiscoveryState), RoutingError> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA)?;
    let conn = Arc::new(Mutex::new(conn));
    Ok((
        NodeDirectory::new(conn.clone()),
        RouteTable::new(conn.clone()),
        DiscoveryState::new(conn),
    ))
}

/// Open an in-memory store, for tests.
pub fn open_in_memory() -> Result<(NodeDirectory, RouteTable, DiscoveryState), RoutingError> {
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA)?;
    let conn = Arc::new(Mutex::new(conn));
    Ok((
        NodeDirectory::new(conn.clone()),
        RouteTable::new(conn.clone()),
        DiscoveryState::new(conn),
    ))
}
