use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::error::ServerError;

/// Milliseconds since the Unix epoch; the unit of every stored timestamp.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialLinks {
    pub twitter: Option<String>,
    pub github: Option<String>,
    pub website: Option<String>,
}

/// A wallet-identified account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub wallet_address: String,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub social_links: SocialLinks,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Partial account update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub twitter: Option<String>,
    pub github: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrSettings {
    pub background_color: String,
    pub foreground_color: String,
}

/// Public payment page attached to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProfile {
    pub id: i64,
    pub account_id: i64,
    pub slug: String,
    pub active: bool,
    pub default_amount: Option<String>,
    pub qr_settings: Option<QrSettings>,
    pub theme: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct ProfileSettings {
    pub slug: String,
    pub default_amount: Option<String>,
    pub qr_settings: Option<QrSettings>,
    pub theme: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    File,
    Link,
    Document,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::File => "file",
            ResourceKind::Link => "link",
            ResourceKind::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(ResourceKind::File),
            "link" => Some(ResourceKind::Link),
            "document" => Some(ResourceKind::Document),
            _ => None,
        }
    }
}

/// What a paid request actually receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourcePayload {
    #[serde(rename_all = "camelCase")]
    File {
        file_url: String,
        file_name: String,
        file_size: Option<i64>,
        mime_type: Option<String>,
    },
    Link {
        link: String,
    },
    #[serde(rename_all = "camelCase")]
    Document {
        document_content: String,
    },
}

impl ResourcePayload {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourcePayload::File { .. } => ResourceKind::File,
            ResourcePayload::Link { .. } => ResourceKind::Link,
            ResourcePayload::Document { .. } => ResourceKind::Document,
        }
    }
}

/// A paywalled resource, payload included. Never serialized to non-owners;
/// see [`PublicResource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: i64,
    pub short_id: String,
    pub account_id: i64,
    pub title: String,
    pub description: Option<String>,
    #[serde(flatten)]
    pub payload: ResourcePayload,
    pub price: String,
    pub preview_content: Option<String>,
    pub expires_at: Option<i64>,
    pub max_downloads: Option<i64>,
    pub download_count: i64,
    pub view_count: i64,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Metadata and preview only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicResource {
    pub short_id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub price: String,
    pub preview_content: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub expires_at: Option<i64>,
    pub max_downloads: Option<i64>,
    pub download_count: i64,
    pub view_count: i64,
    pub active: bool,
    pub created_at: i64,
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        self.payload.kind()
    }

    pub fn public_view(&self) -> PublicResource {
        let (file_name, file_size, mime_type) = match &self.payload {
            ResourcePayload::File {
                file_name,
                file_size,
                mime_type,
                ..
            } => (Some(file_name.clone()), *file_size, mime_type.clone()),
            _ => (None, None, None),
        };
        PublicResource {
            short_id: self.short_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            kind: self.kind(),
            price: self.price.clone(),
            preview_content: self.preview_content.clone(),
            file_name,
            file_size,
            mime_type,
            expires_at: self.expires_at,
            max_downloads: self.max_downloads,
            download_count: self.download_count,
            view_count: self.view_count,
            active: self.active,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewResource {
    pub title: String,
    pub description: Option<String>,
    pub payload: ResourcePayload,
    pub price: String,
    pub preview_content: Option<String>,
    pub expires_at: Option<i64>,
    pub max_downloads: Option<i64>,
}

/// Partial resource update. The outer `Option` of a nullable field says
/// whether to touch it; the inner one is the new value.
#[derive(Debug, Clone, Default)]
pub struct ResourcePatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub price: Option<String>,
    pub preview_content: Option<Option<String>>,
    pub expires_at: Option<Option<i64>>,
    pub max_downloads: Option<Option<i64>>,
    pub active: Option<bool>,
}

const ACCOUNT_COLUMNS: &str = "id, wallet_address, handle, display_name, bio, avatar_url, \
     twitter, github, website, created_at, updated_at";

const PROFILE_COLUMNS: &str = "id, account_id, slug, active, default_amount, qr_background, \
     qr_foreground, theme, created_at, updated_at";

pub(crate) const RESOURCE_COLUMNS: &str = "id, short_id, account_id, title, description, kind, \
     file_url, file_name, file_size, mime_type, link, document_content, price, preview_content, \
     expires_at, max_downloads, download_count, view_count, active, created_at, updated_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        wallet_address: row.get(1)?,
        handle: row.get(2)?,
        display_name: row.get(3)?,
        bio: row.get(4)?,
        avatar_url: row.get(5)?,
        social_links: SocialLinks {
            twitter: row.get(6)?,
            github: row.get(7)?,
            website: row.get(8)?,
        },
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<PaymentProfile> {
    let background: Option<String> = row.get(5)?;
    let foreground: Option<String> = row.get(6)?;
    Ok(PaymentProfile {
        id: row.get(0)?,
        account_id: row.get(1)?,
        slug: row.get(2)?,
        active: row.get::<_, i32>(3)? == 1,
        default_amount: row.get(4)?,
        qr_settings: match (background, foreground) {
            (Some(background_color), Some(foreground_color)) => Some(QrSettings {
                background_color,
                foreground_color,
            }),
            _ => None,
        },
        theme: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub(crate) fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<Resource> {
    let kind: String = row.get(5)?;
    let payload = match ResourceKind::parse(&kind) {
        Some(ResourceKind::File) => ResourcePayload::File {
            file_url: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            file_name: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            file_size: row.get(8)?,
            mime_type: row.get(9)?,
        },
        Some(ResourceKind::Link) => ResourcePayload::Link {
            link: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        },
        Some(ResourceKind::Document) => ResourcePayload::Document {
            document_content: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
        },
        None => {
            return Err(rusqlite::Error::InvalidColumnType(
                5,
                "kind".to_string(),
                rusqlite::types::Type::Text,
            ))
        }
    };
    Ok(Resource {
        id: row.get(0)?,
        short_id: row.get(1)?,
        account_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        payload,
        price: row.get(12)?,
        preview_content: row.get(13)?,
        expires_at: row.get(14)?,
        max_downloads: row.get(15)?,
        download_count: row.get(16)?,
        view_count: row.get(17)?,
        active: row.get::<_, i32>(18)? == 1,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

/// SQLite database wrapper
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, ServerError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), ServerError> {
        self.with_connection(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS accounts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    wallet_address TEXT UNIQUE NOT NULL,
                    handle TEXT UNIQUE,
                    display_name TEXT,
                    bio TEXT,
                    avatar_url TEXT,
                    twitter TEXT,
                    github TEXT,
                    website TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS payment_profiles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    account_id INTEGER UNIQUE NOT NULL REFERENCES accounts(id),
                    slug TEXT UNIQUE NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    default_amount TEXT,
                    qr_background TEXT,
                    qr_foreground TEXT,
                    theme TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS resources (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    short_id TEXT UNIQUE NOT NULL,
                    account_id INTEGER NOT NULL REFERENCES accounts(id),
                    title TEXT NOT NULL,
                    description TEXT,
                    kind TEXT NOT NULL CHECK (kind IN ('file', 'link', 'document')),
                    file_url TEXT,
                    file_name TEXT,
                    file_size INTEGER,
                    mime_type TEXT,
                    link TEXT,
                    document_content TEXT,
                    price TEXT NOT NULL,
                    preview_content TEXT,
                    expires_at INTEGER,
                    max_downloads INTEGER,
                    download_count INTEGER NOT NULL DEFAULT 0,
                    view_count INTEGER NOT NULL DEFAULT 0,
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_resources_account ON resources(account_id);

                CREATE TABLE IF NOT EXISTS settlements (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    payer TEXT NOT NULL,
                    payee TEXT NOT NULL,
                    payee_account_id INTEGER,
                    amount TEXT NOT NULL,
                    network TEXT NOT NULL,
                    transaction_hash TEXT UNIQUE NOT NULL,
                    resource_id INTEGER,
                    profile_id INTEGER,
                    status TEXT NOT NULL,
                    memo TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    failure_reason TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_settlements_payer ON settlements(payer);
                CREATE INDEX IF NOT EXISTS idx_settlements_payee ON settlements(payee);
                CREATE INDEX IF NOT EXISTS idx_settlements_resource ON settlements(resource_id);
                CREATE INDEX IF NOT EXISTS idx_settlements_profile ON settlements(profile_id);
                CREATE INDEX IF NOT EXISTS idx_settlements_account ON settlements(payee_account_id);

                CREATE TABLE IF NOT EXISTS analytics_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    event_type TEXT NOT NULL,
                    account_id INTEGER,
                    resource_id INTEGER,
                    profile_id INTEGER,
                    payload TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_events_type ON analytics_events(event_type);
                "#,
            )?;
            Ok(())
        })
    }

    /// Scoped access to the connection. The lock is held for the whole closure,
    /// so a closure's statements never interleave with another caller's.
    pub fn with_connection<F, T>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Connection) -> Result<T, ServerError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ServerError::Internal("database lock poisoned".to_string()))?;
        f(&conn)
    }

    // ── accounts ────────────────────────────────────────────────────────

    /// Fetch the account for `wallet`, creating it on first sight.
    pub fn get_or_create_account(&self, wallet: &str) -> Result<Account, ServerError> {
        self.with_connection(|conn| {
            let now = now_ms();
            conn.execute(
                "INSERT INTO accounts (wallet_address, created_at, updated_at) VALUES (?1, ?2, ?2)
                 ON CONFLICT(wallet_address) DO NOTHING",
                params![wallet, now],
            )?;
            let account = conn.query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE wallet_address = ?1"),
                params![wallet],
                account_from_row,
            )?;
            Ok(account)
        })
    }

    pub fn get_account_by_wallet(&self, wallet: &str) -> Result<Option<Account>, ServerError> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE wallet_address = ?1"),
                    params![wallet],
                    account_from_row,
                )
                .optional()?)
        })
    }

    pub fn get_account_by_handle(&self, handle: &str) -> Result<Option<Account>, ServerError> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE handle = ?1"),
                    params![handle],
                    account_from_row,
                )
                .optional()?)
        })
    }

    pub fn get_account(&self, id: i64) -> Result<Option<Account>, ServerError> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                    params![id],
                    account_from_row,
                )
                .optional()?)
        })
    }

    /// Apply a partial update. A handle held by someone else is a `Conflict`.
    pub fn update_account(&self, wallet: &str, patch: &AccountPatch) -> Result<Account, ServerError> {
        self.with_connection(|conn| {
            let mut updates = vec!["updated_at = ?1".to_string()];
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now_ms())];

            let fields: [(&str, &Option<String>); 7] = [
                ("handle", &patch.handle),
                ("display_name", &patch.display_name),
                ("bio", &patch.bio),
                ("avatar_url", &patch.avatar_url),
                ("twitter", &patch.twitter),
                ("github", &patch.github),
                ("website", &patch.website),
            ];
            for (column, value) in fields {
                if let Some(v) = value {
                    values.push(Box::new(v.clone()));
                    updates.push(format!("{column} = ?{}", values.len()));
                }
            }
            values.push(Box::new(wallet.to_string()));

            let query = format!(
                "UPDATE accounts SET {} WHERE wallet_address = ?{}",
                updates.join(", "),
                values.len()
            );
            let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|p| p.as_ref()).collect();

            let rows = conn.execute(&query, refs.as_slice()).map_err(|e| match ServerError::from(e) {
                ServerError::Conflict(_) => ServerError::Conflict("Handle is already taken".to_string()),
                other => other,
            })?;
            if rows == 0 {
                return Err(ServerError::not_found("Account not found"));
            }

            Ok(conn.query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE wallet_address = ?1"),
                params![wallet],
                account_from_row,
            )?)
        })
    }

    // ── payment profiles ────────────────────────────────────────────────

    /// Create or replace the account's profile in one statement. The slug's
    /// UNIQUE constraint rejects a slug owned by another account; re-saving
    /// one's own slug is a plain update.
    pub fn save_profile(
        &self,
        account_id: i64,
        settings: &ProfileSettings,
    ) -> Result<PaymentProfile, ServerError> {
        self.with_connection(|conn| {
            let (background, foreground) = match &settings.qr_settings {
                Some(qr) => (
                    Some(qr.background_color.as_str()),
                    Some(qr.foreground_color.as_str()),
                ),
                None => (None, None),
            };
            conn.execute(
                r#"
                INSERT INTO payment_profiles
                    (account_id, slug, active, default_amount, qr_background, qr_foreground, theme, created_at, updated_at)
                VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?7)
                ON CONFLICT(account_id) DO UPDATE SET
                    slug = excluded.slug,
                    default_amount = excluded.default_amount,
                    qr_background = excluded.qr_background,
                    qr_foreground = excluded.qr_foreground,
                    theme = excluded.theme,
                    updated_at = excluded.updated_at
                "#,
                params![
                    account_id,
                    settings.slug,
                    settings.default_amount,
                    background,
                    foreground,
                    settings.theme,
                    now_ms()
                ],
            )
            .map_err(|e| match ServerError::from(e) {
                ServerError::Conflict(_) => {
                    ServerError::Conflict(format!("Slug '{}' is already taken", settings.slug))
                }
                other => other,
            })?;

            Ok(conn.query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM payment_profiles WHERE account_id = ?1"),
                params![account_id],
                profile_from_row,
            )?)
        })
    }

    /// Active profile by slug.
    pub fn get_profile_by_slug(&self, slug: &str) -> Result<Option<PaymentProfile>, ServerError> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {PROFILE_COLUMNS} FROM payment_profiles WHERE slug = ?1 AND active = 1"
                    ),
                    params![slug],
                    profile_from_row,
                )
                .optional()?)
        })
    }

    /// Profile by slug, active or not.
    pub fn find_profile(&self, slug: &str) -> Result<Option<PaymentProfile>, ServerError> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {PROFILE_COLUMNS} FROM payment_profiles WHERE slug = ?1"),
                    params![slug],
                    profile_from_row,
                )
                .optional()?)
        })
    }

    pub fn get_profile_for_account(
        &self,
        account_id: i64,
    ) -> Result<Option<PaymentProfile>, ServerError> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {PROFILE_COLUMNS} FROM payment_profiles WHERE account_id = ?1"),
                    params![account_id],
                    profile_from_row,
                )
                .optional()?)
        })
    }

    /// True when no profile holds `slug`, or the one that does belongs to
    /// `account_id`. Advisory only; [`Database::save_profile`] is the guard.
    pub fn slug_available(&self, slug: &str, account_id: Option<i64>) -> Result<bool, ServerError> {
        self.with_connection(|conn| {
            let owner: Option<i64> = conn
                .query_row(
                    "SELECT account_id FROM payment_profiles WHERE slug = ?1",
                    params![slug],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(match owner {
                None => true,
                Some(owner) => Some(owner) == account_id,
            })
        })
    }

    /// Flip the profile's activity flag. Only the owning account may do so.
    pub fn toggle_profile(&self, slug: &str, account_id: i64) -> Result<PaymentProfile, ServerError> {
        self.with_connection(|conn| {
            let rows = conn.execute(
                "UPDATE payment_profiles SET active = 1 - active, updated_at = ?1
                 WHERE slug = ?2 AND account_id = ?3",
                params![now_ms(), slug, account_id],
            )?;
            if rows == 0 {
                let exists: bool = conn
                    .query_row(
                        "SELECT 1 FROM payment_profiles WHERE slug = ?1",
                        params![slug],
                        |_| Ok(true),
                    )
                    .optional()?
                    .unwrap_or(false);
                return Err(if exists {
                    ServerError::NotOwner
                } else {
                    ServerError::not_found("Profile not found")
                });
            }
            Ok(conn.query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM payment_profiles WHERE slug = ?1"),
                params![slug],
                profile_from_row,
            )?)
        })
    }

    // ── resources ───────────────────────────────────────────────────────

    pub fn short_id_taken(&self, short_id: &str) -> Result<bool, ServerError> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM resources WHERE short_id = ?1",
                params![short_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Insert a resource under a freshly allocated short id. A duplicate id
    /// is a `Conflict`; callers may retry with a new one.
    pub fn insert_resource(
        &self,
        account_id: i64,
        short_id: &str,
        new: &NewResource,
    ) -> Result<Resource, ServerError> {
        let (file_url, file_name, file_size, mime_type, link, document_content) = match &new.payload
        {
            ResourcePayload::File {
                file_url,
                file_name,
                file_size,
                mime_type,
            } => (
                Some(file_url.as_str()),
                Some(file_name.as_str()),
                *file_size,
                mime_type.as_deref(),
                None,
                None,
            ),
            ResourcePayload::Link { link } => (None, None, None, None, Some(link.as_str()), None),
            ResourcePayload::Document { document_content } => {
                (None, None, None, None, None, Some(document_content.as_str()))
            }
        };

        self.with_connection(|conn| {
            let now = now_ms();
            conn.execute(
                r#"
                INSERT INTO resources (
                    short_id, account_id, title, description, kind, file_url, file_name, file_size,
                    mime_type, link, document_content, price, preview_content, expires_at,
                    max_downloads, download_count, view_count, active, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0, 0, 1, ?16, ?16)
                "#,
                params![
                    short_id,
                    account_id,
                    new.title,
                    new.description,
                    new.payload.kind().as_str(),
                    file_url,
                    file_name,
                    file_size,
                    mime_type,
                    link,
                    document_content,
                    new.price,
                    new.preview_content,
                    new.expires_at,
                    new.max_downloads,
                    now
                ],
            )?;
            let id = conn.last_insert_rowid();

            Ok(Resource {
                id,
                short_id: short_id.to_string(),
                account_id,
                title: new.title.clone(),
                description: new.description.clone(),
                payload: new.payload.clone(),
                price: new.price.clone(),
                preview_content: new.preview_content.clone(),
                expires_at: new.expires_at,
                max_downloads: new.max_downloads,
                download_count: 0,
                view_count: 0,
                active: true,
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Resource by short id, active or not.
    pub fn get_resource(&self, short_id: &str) -> Result<Option<Resource>, ServerError> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE short_id = ?1"),
                    params![short_id],
                    resource_from_row,
                )
                .optional()?)
        })
    }

    /// Owner's resources, newest first. `limit` is clamped to 1..=500.
    pub fn list_resources_for_account(
        &self,
        account_id: i64,
        limit: u32,
    ) -> Result<Vec<Resource>, ServerError> {
        let limit = limit.clamp(1, 500);
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RESOURCE_COLUMNS} FROM resources WHERE account_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let resources = stmt
                .query_map(params![account_id, limit], resource_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(resources)
        })
    }

    /// Partial update by the owning account.
    pub fn update_resource(
        &self,
        short_id: &str,
        account_id: i64,
        patch: &ResourcePatch,
    ) -> Result<Resource, ServerError> {
        self.with_connection(|conn| {
            let mut updates = vec!["updated_at = ?1".to_string()];
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now_ms())];

            let mut set = |column: &str, value: Box<dyn rusqlite::ToSql>| {
                values.push(value);
                updates.push(format!("{column} = ?{}", values.len()));
            };
            if let Some(v) = &patch.title {
                set("title", Box::new(v.clone()));
            }
            if let Some(v) = &patch.description {
                set("description", Box::new(v.clone()));
            }
            if let Some(v) = &patch.price {
                set("price", Box::new(v.clone()));
            }
            if let Some(v) = &patch.preview_content {
                set("preview_content", Box::new(v.clone()));
            }
            if let Some(v) = patch.expires_at {
                set("expires_at", Box::new(v));
            }
            if let Some(v) = patch.max_downloads {
                set("max_downloads", Box::new(v));
            }
            if let Some(v) = patch.active {
                set("active", Box::new(v as i32));
            }

            values.push(Box::new(short_id.to_string()));
            values.push(Box::new(account_id));
            let query = format!(
                "UPDATE resources SET {} WHERE short_id = ?{} AND account_id = ?{}",
                updates.join(", "),
                values.len() - 1,
                values.len()
            );
            let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|p| p.as_ref()).collect();

            if conn.execute(&query, refs.as_slice())? == 0 {
                return Err(missing_or_not_owner(conn, short_id)?);
            }

            Ok(conn.query_row(
                &format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE short_id = ?1"),
                params![short_id],
                resource_from_row,
            )?)
        })
    }

    /// Hard delete by the owning account. Settlements that referenced the
    /// resource keep their (now dangling) id.
    pub fn delete_resource(&self, short_id: &str, account_id: i64) -> Result<(), ServerError> {
        self.with_connection(|conn| {
            let rows = conn.execute(
                "DELETE FROM resources WHERE short_id = ?1 AND account_id = ?2",
                params![short_id, account_id],
            )?;
            if rows == 0 {
                return Err(missing_or_not_owner(conn, short_id)?);
            }
            Ok(())
        })
    }
}

/// Classify a zero-row owner write.
fn missing_or_not_owner(conn: &Connection, short_id: &str) -> Result<ServerError, ServerError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM resources WHERE short_id = ?1",
            params![short_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(if exists {
        ServerError::NotOwner
    } else {
        ServerError::not_found("Content not found")
    })
}
