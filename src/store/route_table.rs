use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::RoutingError;
use crate::model::{NodeId, RouteEntry, RouteUsage};

/// Persistent store of discovered routes, usage timestamps, and
/// backtracking entries (C1). A thin ACID-backed repository: every method
/// is a single statement or a short transaction, called only from inside
/// the scheduler's single-writer task.
#[derive(Clone)]
pub struct RouteTable {
    conn: Arc<Mutex<Connection>>,
}

fn row_to_route(row: &rusqlite::Row<'_>) -> rusqlite::Result<RouteEntry> {
    let discovery_uuid: String = row.get(0)?;
    let destination_local_id: i64 = row.get(1)?;
    let next_hop_local_id: i64 = row.get(2)?;
    let previous_hop_local_id: Option<i64> = row.get(3)?;
    let hop_count: i64 = row.get(4)?;
    let opened: i64 = row.get(5)?;

    Ok(RouteEntry {
        discovery_uuid: Uuid::parse_str(&discovery_uuid).unwrap_or_else(|_| Uuid::nil()),
        destination_local_id: NodeId(destination_local_id),
        next_hop_local_id: NodeId(next_hop_local_id),
        previous_hop_local_id: previous_hop_local_id.map(NodeId),
        hop_count: hop_count as u16,
        opened: opened != 0,
    })
}

impl RouteTable {
    pub(super) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Most recently discovered `opened=true` route to a destination.
    pub fn get_most_recent_opened_route(
        &self,
        destination_local_id: NodeId,
    ) -> Result<Option<RouteEntry>, RoutingError> {
        let conn = self.conn.lock().expect("route table connection poisoned");
        conn.query_row(
            "SELECT discovery_uuid, destination_local_id, next_hop_local_id,
                    previous_hop_local_id, hop_count, opened
             FROM route_entry
             WHERE destination_local_id = ?1 AND opened = 1
             ORDER BY created_at DESC
             LIMIT 1",
            params![destination_local_id.0],
            row_to_route,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Most recent usage of a route, joined through `RouteEntry`.
    pub fn get_most_recent_usage(
        &self,
        destination_local_id: NodeId,
    ) -> Result<Option<RouteUsage>, RoutingError> {
        let conn = self.conn.lock().expect("route table connection poisoned");
        conn.query_row(
            "SELECT u.usage_request_uuid, u.route_entry_discovery_uuid, u.last_used_timestamp
             FROM route_usage u
             JOIN route_entry r ON r.discovery_uuid = u.route_entry_discovery_uuid
             WHERE r.destination_local_id = ?1
             ORDER BY u.last_used_timestamp DESC
             LIMIT 1",
            params![destination_local_id.0],
            |row| {
                let usage_request_uuid: String = row.get(0)?;
                let route_entry_discovery_uuid: String = row.get(1)?;
                Ok(RouteUsage {
                    usage_request_uuid: Uuid::parse_str(&usage_request_uuid)
                        .unwrap_or_else(|_| Uuid::nil()),
                    route_entry_discovery_uuid: Uuid::parse_str(&route_entry_discovery_uuid)
                        .unwrap_or_else(|_| Uuid::nil()),
                    last_used_timestamp: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn insert_route(&self, route: &RouteEntry, created_at: i64) -> Result<(), RoutingError> {
        let conn = self.conn.lock().expect("route table connection poisoned");
        conn.execute(
            "INSERT INTO route_entry
                (discovery_uuid, destination_local_id, next_hop_local_id,
                 previous_hop_local_id, hop_count, opened, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                route.discovery_uuid.to_string(),
                route.destination_local_id.0,
                route.next_hop_local_id.0,
                route.previous_hop_local_id.map(|id| id.0),
                route.hop_count as i64,
                route.opened as i64,
                created_at,
            ],
        )?;
        Ok(())
    }

    pub fn insert_usage(&self, usage: &RouteUsage) -> Result<(), RoutingError> {
        let conn = self.conn.lock().expect("route table connection poisoned");
        conn.execute(
            "INSERT INTO route_usage
                (usage_request_uuid, route_entry_discovery_uuid, last_used_timestamp)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(usage_request_uuid) DO UPDATE SET last_used_timestamp = excluded.last_used_timestamp",
            params![
                usage.usage_request_uuid.to_string(),
                usage.route_entry_discovery_uuid.to_string(),
                usage.last_used_timestamp,
            ],
        )?;
        Ok(())
    }

    pub fn touch_usage(
        &self,
        usage_request_uuid: Uuid,
        last_used_timestamp: i64,
    ) -> Result<(), RoutingError> {
        let conn = self.conn.lock().expect("route table connection poisoned");
        conn.execute(
            "UPDATE route_usage SET last_used_timestamp = ?2 WHERE usage_request_uuid = ?1",
            params![usage_request_uuid.to_string(), last_used_timestamp],
        )?;
        Ok(())
    }

    /// Delete a route and, via `ON DELETE CASCADE`, all of its usages.
    pub fn delete_route_cascade(&self, discovery_uuid: Uuid) -> Result<(), RoutingError> {
        let conn = self.conn.lock().expect("route table connection poisoned");
        conn.execute(
            "DELETE FROM route_entry WHERE discovery_uuid = ?1",
            params![discovery_uuid.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::open_in_memory;
    use super::*;

    fn sample_route(uuid: Uuid) -> RouteEntry {
        RouteEntry {
            discovery_uuid: uuid,
            destination_local_id: NodeId(1),
            next_hop_local_id: NodeId(2),
            previous_hop_local_id: None,
            hop_count: 3,
            opened: true,
        }
    }

    #[test]
    fn insert_and_fetch_most_recent_route() {
        let (_nodes, routes, _discovery) = open_in_memory().unwrap();
        let uuid = Uuid::new_v4();
        routes.insert_route(&sample_route(uuid), 1000).unwrap();

        let fetched = routes
            .get_most_recent_opened_route(NodeId(1))
            .unwrap()
            .expect("route present");
        assert_eq!(fetched.discovery_uuid, uuid);
        assert_eq!(fetched.hop_count, 3);
    }

    #[test]
    fn delete_route_cascades_to_usage() {
        let (_nodes, routes, _discovery) = open_in_memory().unwrap();
        let uuid = Uuid::new_v4();
        routes.insert_route(&sample_route(uuid), 1000).unwrap();
        routes
            .insert_usage(&RouteUsage {
                usage_request_uuid: uuid,
                route_entry_discovery_uuid: uuid,
                last_used_timestamp: 1000,
            })
            .unwrap();

        assert!(routes.get_most_recent_usage(NodeId(1)).unwrap().is_some());

        routes.delete_route_cascade(uuid).unwrap();

        assert!(routes
            .get_most_recent_opened_route(NodeId(1))
            .unwrap()
            .is_none());
        assert!(routes.get_most_recent_usage(NodeId(1)).unwrap().is_none());
    }
}
