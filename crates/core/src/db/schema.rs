//! Relational layout of the backing store and its fixed vocabulary seed.
//!
//! Foreign keys between tables are maintained by the handlers, not by the
//! engine, so no `REFERENCES` clauses appear here.

use rusqlite::{params, Connection};

pub const PEER_TABLE: &str = "Peer";
pub const TORRENT_TABLE: &str = "Torrent";
pub const TRACKER_TABLE: &str = "TrackerInfo";
pub const SOURCE_TABLE: &str = "TorrentSource";
pub const CATEGORY_TABLE: &str = "Category";
pub const STATUS_TABLE: &str = "Status";
pub const PREFERENCE_TABLE: &str = "MyPreference";

/// Fixed category set, `(id, name)`.
pub const CATEGORIES: &[(i64, &str)] = &[
    (1, "Video"),
    (2, "VideoClips"),
    (3, "Audio"),
    (4, "Compressed"),
    (5, "Document"),
    (6, "Picture"),
    (7, "xxx"),
    (8, "other"),
];

/// Fixed torrent status set, `(id, name)`.
pub const STATUSES: &[(i64, &str)] = &[(0, "unknown"), (1, "good"), (2, "dead")];

/// Sources present in every fresh store. More are added on first use.
pub const SEED_SOURCES: &[(i64, &str)] = &[(1, "BC")];

pub(crate) fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS Category (
            category_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT
        );

        CREATE TABLE IF NOT EXISTS Status (
            status_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT
        );

        CREATE TABLE IF NOT EXISTS TorrentSource (
            source_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT
        );

        -- One row per known infohash, collected or not
        CREATE TABLE IF NOT EXISTS Torrent (
            torrent_id INTEGER PRIMARY KEY AUTOINCREMENT,
            infohash BLOB NOT NULL UNIQUE,
            name TEXT,
            torrent_file_name TEXT,
            length INTEGER,
            num_files INTEGER,
            creation_date INTEGER,
            comment TEXT,
            category_id INTEGER,
            status_id INTEGER NOT NULL DEFAULT 0,
            source_id INTEGER,
            relevance REAL NOT NULL DEFAULT 0,
            num_seeders INTEGER NOT NULL DEFAULT 0,
            num_leechers INTEGER NOT NULL DEFAULT 0,
            last_tracker_check INTEGER NOT NULL DEFAULT 0,
            collected INTEGER NOT NULL DEFAULT 0,
            insert_time INTEGER NOT NULL,
            extra_info TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_torrent_collected ON Torrent(collected, relevance);

        CREATE TABLE IF NOT EXISTS TrackerInfo (
            tracker_id INTEGER PRIMARY KEY AUTOINCREMENT,
            torrent_id INTEGER NOT NULL,
            tracker TEXT NOT NULL,
            UNIQUE(torrent_id, tracker)
        );

        CREATE TABLE IF NOT EXISTS Peer (
            peer_id INTEGER PRIMARY KEY AUTOINCREMENT,
            permid BLOB NOT NULL UNIQUE,
            name TEXT,
            added_time INTEGER NOT NULL,
            extra_info TEXT
        );

        CREATE TABLE IF NOT EXISTS MyPreference (
            torrent_id INTEGER PRIMARY KEY,
            destination_path TEXT,
            progress REAL NOT NULL DEFAULT 0,
            creation_time INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_mypreference_creation ON MyPreference(creation_time);
        "#,
    )?;

    seed(conn, "INSERT OR IGNORE INTO Category (category_id, name) VALUES (?, ?)", CATEGORIES)?;
    seed(conn, "INSERT OR IGNORE INTO Status (status_id, name) VALUES (?, ?)", STATUSES)?;
    seed(
        conn,
        "INSERT OR IGNORE INTO TorrentSource (source_id, name) VALUES (?, ?)",
        SEED_SOURCES,
    )?;

    Ok(())
}

fn seed(conn: &Connection, sql: &str, rows: &[(i64, &str)]) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(sql)?;
    for (id, name) in rows {
        stmt.execute(params![id, name])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent_and_seeded() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        let categories: i64 = conn
            .query_row("SELECT COUNT(*) FROM Category", [], |row| row.get(0))
            .unwrap();
        assert_eq!(categories, CATEGORIES.len() as i64);

        let good: i64 = conn
            .query_row("SELECT status_id FROM Status WHERE name = 'good'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(good, 1);

        let sources: i64 = conn
            .query_row("SELECT COUNT(*) FROM TorrentSource", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sources, 1);
    }
}
