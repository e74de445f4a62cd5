//! Peer registry: known network peers keyed by their permanent identifier.

use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::db::schema::PEER_TABLE;
use crate::db::{unix_now, CacheDb, CacheError, PermId, Record, Table};

const PEER_COLUMNS: &[&str] = &["peer_id", "permid", "name", "added_time", "extra_info"];

/// Caller-supplied peer attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerAttributes {
    pub name: Option<String>,
    /// Free-form attributes stored alongside the peer.
    #[serde(default)]
    pub extra: Map<String, JsonValue>,
}

impl PeerAttributes {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Detached snapshot of a peer row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: i64,
    pub permid: PermId,
    pub name: Option<String>,
    /// Unix seconds when the peer was first added.
    pub added_time: i64,
    pub extra: Map<String, JsonValue>,
}

impl TryFrom<Record> for PeerRecord {
    type Error = CacheError;

    fn try_from(record: Record) -> Result<Self, Self::Error> {
        let missing = |column: &str| CacheError::Internal(format!("peer row without {column}"));

        Ok(Self {
            peer_id: record.get_i64("peer_id").ok_or_else(|| missing("peer_id"))?,
            permid: PermId::from(record.get_blob("permid").ok_or_else(|| missing("permid"))?),
            name: record.get_text("name").map(str::to_string),
            added_time: record.get_i64("added_time").unwrap_or_default(),
            extra: parse_extra(record.get_text("extra_info"))?,
        })
    }
}

/// Registry of known peers.
#[derive(Clone)]
pub struct PeerRegistry {
    table: Table,
}

impl PeerRegistry {
    pub fn new(db: Arc<CacheDb>) -> Self {
        Self {
            table: Table::new(db, PEER_TABLE),
        }
    }

    pub fn count(&self) -> Result<u64, CacheError> {
        self.table.count()
    }

    pub fn has(&self, permid: &PermId) -> Result<bool, CacheError> {
        self.table.exists(&[("permid", blob(permid))])
    }

    pub fn get(&self, permid: &PermId) -> Result<Option<PeerRecord>, CacheError> {
        self.table
            .fetch_one(PEER_COLUMNS, &[("permid", blob(permid))])?
            .map(PeerRecord::try_from)
            .transpose()
    }

    pub fn get_by_id(&self, peer_id: i64) -> Result<Option<PeerRecord>, CacheError> {
        self.table
            .fetch_one(PEER_COLUMNS, &[("peer_id", Value::Integer(peer_id))])?
            .map(PeerRecord::try_from)
            .transpose()
    }

    /// Surrogate id of `permid`, if known.
    pub fn get_peer_id(&self, permid: &PermId) -> Result<Option<i64>, CacheError> {
        Ok(self
            .table
            .get_one("peer_id", &[("permid", blob(permid))])?
            .and_then(|value| match value {
                Value::Integer(id) => Some(id),
                _ => None,
            }))
    }

    /// Add a new peer and return its surrogate id.
    ///
    /// Fails with `DuplicatePeer` if `permid` is already registered; probe
    /// with [`has`](Self::has) first when that is expected.
    pub fn add(&self, permid: &PermId, attributes: PeerAttributes) -> Result<i64, CacheError> {
        let permid = permid.clone();
        let extra = serde_json::to_string(&attributes.extra)?;

        self.table.db().submit(move |conn| {
            let tx = conn.transaction()?;
            let exists = tx
                .query_row(
                    "SELECT 1 FROM Peer WHERE permid = ?",
                    params![permid.as_bytes()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if exists {
                return Err(CacheError::DuplicatePeer(permid.to_string()));
            }

            tx.execute(
                "INSERT INTO Peer (permid, name, added_time, extra_info) VALUES (?, ?, ?, ?)",
                params![permid.as_bytes(), attributes.name, unix_now(), extra],
            )?;
            let peer_id = tx.last_insert_rowid();
            tx.commit()?;

            tracing::debug!(peer_id, "Added peer {}", permid);
            Ok(peer_id)
        })
    }

    /// Update an existing peer. A `Some` name replaces the stored one and
    /// `extra` keys are merged over the stored attributes.
    ///
    /// Returns `false` if the peer is unknown.
    pub fn update(&self, permid: &PermId, attributes: PeerAttributes) -> Result<bool, CacheError> {
        let permid = permid.clone();

        self.table.db().submit(move |conn| {
            let tx = conn.transaction()?;
            let stored: Option<Option<String>> = tx
                .query_row(
                    "SELECT extra_info FROM Peer WHERE permid = ?",
                    params![permid.as_bytes()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(stored) = stored else {
                return Ok(false);
            };

            let mut extra = parse_extra(stored.as_deref())?;
            extra.extend(attributes.extra);
            tx.execute(
                "UPDATE Peer SET name = COALESCE(?, name), extra_info = ? WHERE permid = ?",
                params![
                    attributes.name,
                    serde_json::to_string(&extra)?,
                    permid.as_bytes()
                ],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Remove a peer. Returns `false` if it was not registered.
    pub fn delete(&self, permid: &PermId) -> Result<bool, CacheError> {
        let permid = permid.clone();

        self.table.db().submit(move |conn| {
            let removed = conn.execute(
                "DELETE FROM Peer WHERE permid = ?",
                params![permid.as_bytes()],
            )?;
            if removed > 0 {
                tracing::debug!("Deleted peer {}", permid);
            }
            Ok(removed > 0)
        })
    }
}

fn blob(permid: &PermId) -> Value {
    Value::Blob(permid.as_bytes().to_vec())
}

pub(crate) fn parse_extra(json: Option<&str>) -> Result<Map<String, JsonValue>, CacheError> {
    match json {
        None | Some("") => Ok(Map::new()),
        Some(json) => Ok(serde_json::from_str(json)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PeerRegistry {
        PeerRegistry::new(Arc::new(CacheDb::in_memory().unwrap()))
    }

    fn fake_permid(tag: &str) -> PermId {
        let mut bytes = format!("fake_permid_{tag}").into_bytes();
        bytes.extend_from_slice(b"0R0\x10\x00\x07*\x86H\xce=\x02\x01\x06\x05+\x81\x04\x00\x1a");
        PermId::new(bytes)
    }

    #[test]
    fn test_add_get_delete_restores_count() {
        let peers = registry();
        let permid = fake_permid("x");
        let old_size = peers.count().unwrap();

        assert!(!peers.has(&permid).unwrap());
        let peer_id = peers.add(&permid, PeerAttributes::named("fake peer x")).unwrap();
        assert_eq!(peers.count().unwrap(), old_size + 1);

        let peer = peers.get(&permid).unwrap().unwrap();
        assert_eq!(peer.peer_id, peer_id);
        assert_eq!(peer.name.as_deref(), Some("fake peer x"));
        assert_eq!(peer.permid, permid);

        assert!(peers.delete(&permid).unwrap());
        assert!(!peers.has(&permid).unwrap());
        assert!(peers.get(&permid).unwrap().is_none());
        assert_eq!(peers.count().unwrap(), old_size);
    }

    #[test]
    fn test_add_duplicate_fails() {
        let peers = registry();
        let permid = fake_permid("dup");

        peers.add(&permid, PeerAttributes::named("first")).unwrap();
        let err = peers
            .add(&permid, PeerAttributes::named("second"))
            .unwrap_err();
        assert!(matches!(err, CacheError::DuplicatePeer(_)));

        let peer = peers.get(&permid).unwrap().unwrap();
        assert_eq!(peer.name.as_deref(), Some("first"));
        assert_eq!(peers.count().unwrap(), 1);
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let peers = registry();
        assert!(!peers.delete(&fake_permid("ghost")).unwrap());
        assert_eq!(peers.count().unwrap(), 0);
    }

    #[test]
    fn test_lookup_by_surrogate_id() {
        let peers = registry();
        let p1 = fake_permid("1");
        let p2 = fake_permid("2");

        let id1 = peers.add(&p1, PeerAttributes::named("one")).unwrap();
        let id2 = peers.add(&p2, PeerAttributes::named("two")).unwrap();
        assert_eq!((id1, id2), (1, 2));

        assert_eq!(peers.get_peer_id(&p2).unwrap(), Some(2));
        assert_eq!(peers.get_by_id(1).unwrap().unwrap().permid, p1);
        assert!(peers.get_by_id(99).unwrap().is_none());
        assert!(peers.get_peer_id(&fake_permid("3")).unwrap().is_none());
    }

    #[test]
    fn test_update_merges_attributes() {
        let peers = registry();
        let permid = fake_permid("u");

        let mut attributes = PeerAttributes::named("before");
        attributes.extra.insert("ip".to_string(), "10.0.0.1".into());
        attributes.extra.insert("port".to_string(), 7762.into());
        peers.add(&permid, attributes).unwrap();

        let mut change = PeerAttributes::default();
        change.extra.insert("port".to_string(), 7763.into());
        assert!(peers.update(&permid, change).unwrap());

        let peer = peers.get(&permid).unwrap().unwrap();
        assert_eq!(peer.name.as_deref(), Some("before"));
        assert_eq!(peer.extra["ip"], "10.0.0.1");
        assert_eq!(peer.extra["port"], 7763);

        assert!(!peers
            .update(&fake_permid("missing"), PeerAttributes::named("x"))
            .unwrap());
    }
}
