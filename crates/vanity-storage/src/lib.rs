use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vanity_core::{KeypairRecord, SecretKey};

pub const KEYSTORE_SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store connection descriptor is empty (set DATABASE_URL)")]
    MissingDescriptor,
    #[error("unsupported store descriptor {0:?}, expected a sqlite path or sqlite:// url")]
    UnsupportedDescriptor(String),
    #[error("stored private key for {public_key} has {found} bytes, expected 64")]
    CorruptKey { public_key: String, found: usize },
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Where the keyed store lives, parsed from a connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

impl StoreLocation {
    pub fn parse(descriptor: &str) -> Result<Self, StorageError> {
        let descriptor = descriptor.trim();
        if descriptor.is_empty() {
            return Err(StorageError::MissingDescriptor);
        }

        let rest = descriptor
            .strip_prefix("sqlite://")
            .or_else(|| descriptor.strip_prefix("sqlite:"))
            .or_else(|| descriptor.strip_prefix("file:"))
            .unwrap_or(descriptor);

        if rest == ":memory:" {
            return Ok(Self::Memory);
        }
        if rest.is_empty() || rest.contains("://") {
            return Err(StorageError::UnsupportedDescriptor(descriptor.to_string()));
        }
        Ok(Self::File(PathBuf::from(rest)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKeypair {
    pub public_key: String,
    pub private_key_hex: String,
    pub created_at: DateTime<Utc>,
}

pub struct KeyStore {
    conn: Connection,
}

impl KeyStore {
    pub fn connect(descriptor: &str) -> Result<Self, StorageError> {
        match StoreLocation::parse(descriptor)? {
            StoreLocation::File(path) => Self::open(path),
            StoreLocation::Memory => Self::open_in_memory(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > KEYSTORE_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: KEYSTORE_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_keypairs.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    /// Insert-or-ignore keyed on the public key. Returns `false` when a row
    /// for the key already existed; that row is left untouched.
    pub fn insert_keypair(&self, record: &KeypairRecord) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            INSERT INTO keypairs (
                public_key,
                private_key,
                created_at
            ) VALUES (?1, ?2, ?3)
            ON CONFLICT(public_key) DO NOTHING
            ",
            params![
                record.public_key,
                record.private_key.as_bytes(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(changes > 0)
    }

    pub fn keypair(&self, public_key: &str) -> Result<Option<StoredKeypair>, StorageError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT public_key, private_key, created_at
                FROM keypairs
                WHERE public_key = ?1
                ",
                params![public_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(public_key, private_key, created_at)| {
            let key = SecretKey::from_bytes(&private_key).map_err(|_| {
                StorageError::CorruptKey {
                    public_key: public_key.clone(),
                    found: private_key.len(),
                }
            })?;
            Ok(StoredKeypair {
                public_key,
                private_key_hex: key.to_hex(),
                created_at: parse_timestamp(created_at)?,
            })
        })
        .transpose()
    }

    pub fn keypair_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM keypairs", [], |row| row.get(0))?)
    }
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}
