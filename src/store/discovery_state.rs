use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::RoutingError;
use crate::model::{BroadcastStatusEntry, NodeId, RouteRequestEntry};

/// Persistent store of in-flight route requests and per-neighbor
/// broadcast status (C2).
#[derive(Clone)]
pub struct DiscoveryState {
    conn: Arc<Mutex<Connection>>,
}

impl DiscoveryState {
    pub(super) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn insert_request(&self, entry: &RouteRequestEntry) -> Result<(), RoutingError> {
        let conn = self.conn.lock().expect("discovery state connection poisoned");
        conn.execute(
            "INSERT INTO route_request_entry
                (request_uuid, destination_local_id, previous_hop_local_id)
             VALUES (?1, ?2, ?3)",
            params![
                entry.request_uuid.to_string(),
                entry.destination_local_id.0,
                entry.previous_hop_local_id.map(|id| id.0),
            ],
        )?;
        Ok(())
    }

    /// Delete a request and, via `ON DELETE CASCADE`, all of its sibling
    /// broadcast statuses.
    pub fn delete_request(&self, request_uuid: Uuid) -> Result<(), RoutingError> {
        let conn = self.conn.lock().expect("discovery state connection poisoned");
        conn.execute(
            "DELETE FROM route_request_entry WHERE request_uuid = ?1",
            params![request_uuid.to_string()],
        )?;
        Ok(())
    }

    pub fn get_request(
        &self,
        request_uuid: Uuid,
    ) -> Result<Option<RouteRequestEntry>, RoutingError> {
        let conn = self.conn.lock().expect("discovery state connection poisoned");
        conn.query_row(
            "SELECT request_uuid, destination_local_id, previous_hop_local_id
             FROM route_request_entry WHERE request_uuid = ?1",
            params![request_uuid.to_string()],
            |row| {
                let request_uuid: String = row.get(0)?;
                let destination_local_id: i64 = row.get(1)?;
                let previous_hop_local_id: Option<i64> = row.get(2)?;
                Ok(RouteRequestEntry {
                    request_uuid: Uuid::parse_str(&request_uuid).unwrap_or_else(|_| Uuid::nil()),
                    destination_local_id: NodeId(destination_local_id),
                    previous_hop_local_id: previous_hop_local_id.map(NodeId),
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn insert_broadcast_status(
        &self,
        entry: &BroadcastStatusEntry,
    ) -> Result<(), RoutingError> {
        let conn = self.conn.lock().expect("discovery state connection poisoned");
        conn.execute(
            "INSERT INTO broadcast_status_entry
                (request_uuid, neighbor_local_id, pending_response_in_progress)
             VALUES (?1, ?2, ?3)",
            params![
                entry.request_uuid.to_string(),
                entry.neighbor_local_id.0,
                entry.pending_response_in_progress as i64,
            ],
        )?;
        Ok(())
    }

    pub fn update_broadcast_status(
        &self,
        request_uuid: Uuid,
        neighbor_local_id: NodeId,
        pending_response_in_progress: bool,
    ) -> Result<(), RoutingError> {
        let conn = self.conn.lock().expect("discovery state connection poisoned");
        conn.execute(
            "UPDATE broadcast_status_entry
             SET pending_response_in_progress = ?3
             WHERE request_uuid = ?1 AND neighbor_local_id = ?2",
            params![
                request_uuid.to_string(),
                neighbor_local_id.0,
                pending_response_in_progress as i64,
            ],
        )?;
        Ok(())
    }

    pub fn delete_broadcast_status(
        &self,
        request_uuid: Uuid,
        neighbor_local_id: NodeId,
    ) -> Result<(), RoutingError> {
        let conn = self.conn.lock().expect("discovery state connection poisoned");
        conn.execute(
            "DELETE FROM broadcast_status_entry
             WHERE request_uuid = ?1 AND neighbor_local_id = ?2",
            params![request_uuid.to_string(), neighbor_local_id.0],
        )?;
        Ok(())
    }

    pub fn delete_all_broadcast_statuses(&self, request_uuid: Uuid) -> Result<(), RoutingError> {
        let conn = self.conn.lock().expect("discovery state connection poisoned");
        conn.execute(
            "DELETE FROM broadcast_status_entry WHERE request_uuid = ?1",
            params![request_uuid.to_string()],
        )?;
        Ok(())
    }

    pub fn any_broadcast_status_with_pending(
        &self,
        request_uuid: Uuid,
        flag: bool,
    ) -> Result<bool, RoutingError> {
        let conn = self.conn.lock().expect("discovery state connection poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM broadcast_status_entry
             WHERE request_uuid = ?1 AND pending_response_in_progress = ?2",
            params![request_uuid.to_string(), flag as i64],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_broadcast_status(
        &self,
        request_uuid: Uuid,
        neighbor_local_id: NodeId,
    ) -> Result<Option<BroadcastStatusEntry>, RoutingError> {
        let conn = self.conn.lock().expect("discovery state connection poisoned");
        conn.query_row(
            "SELECT request_uuid, neighbor_local_id, pending_response_in_progress
             FROM broadcast_status_entry
             WHERE request_uuid = ?1 AND neighbor_local_id = ?2",
            params![request_uuid.to_string(), neighbor_local_id.0],
            |row| {
                let request_uuid: String = row.get(0)?;
                let neighbor_local_id: i64 = row.get(1)?;
                let pending: i64 = row.get(2)?;
                Ok(BroadcastStatusEntry {
                    request_uuid: Uuid::parse_str(&request_uuid).unwrap_or_else(|_| Uuid::nil()),
                    neighbor_local_id: NodeId(neighbor_local_id),
                    pending_response_in_progress: pending != 0,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::super::open_in_memory;
    use super::*;

    #[test]
    fn request_lifecycle() {
        let (_nodes, _routes, discovery) = open_in_memory().unwrap();
        let uuid = Uuid::new_v4();
        let entry = RouteRequestEntry {
            request_uuid: uuid,
            destination_local_id: NodeId(9),
            previous_hop_local_id: None,
        };
        discovery.insert_request(&entry).unwrap();
        assert_eq!(discovery.get_request(uuid).unwrap(), Some(entry));

        discovery.delete_request(uuid).unwrap();
        assert_eq!(discovery.get_request(uuid).unwrap(), None);
    }

    #[test]
    fn delete_request_cascades_to_broadcast_status() {
        let (_nodes, _routes, discovery) = open_in_memory().unwrap();
        let uuid = Uuid::new_v4();
        discovery
            .insert_request(&RouteRequestEntry {
                request_uuid: uuid,
                destination_local_id: NodeId(9),
                previous_hop_local_id: None,
            })
            .unwrap();
        discovery
            .insert_broadcast_status(&BroadcastStatusEntry {
                request_uuid: uuid,
                neighbor_local_id: NodeId(2),
                pending_response_in_progress: false,
            })
            .unwrap();

        discovery.delete_request(uuid).unwrap();

        assert_eq!(
            discovery.get_broadcast_status(uuid, NodeId(2)).unwrap(),
            None
        );
    }

    #[test]
    fn pending_flag_query() {
        let (_nodes, _routes, discovery) = open_in_memory().unwrap();
        let uuid = Uuid::new_v4();
        discovery
            .insert_request(&RouteRequestEntry {
                request_uuid: uuid,
                destination_local_id: NodeId(9),
                previous_hop_local_id: None,
            })
            .unwrap();
        discovery
            .insert_broadcast_status(&BroadcastStatusEntry {
                request_uuid: uuid,
                neighbor_local_id: NodeId(2),
                pending_response_in_progress: false,
            })
            .unwrap();

        assert!(discovery
            .any_broadcast_status_with_pending(uuid, false)
            .unwrap());
        assert!(!discovery
            .any_broadcast_status_with_pending(uuid, true)
            .unwrap());

        discovery
            .update_broadcast_status(uuid, NodeId(2), true)
            .unwrap();

        assert!(discovery
            .any_broadcast_status_with_pending(uuid, true)
            .unwrap());
    }
}
