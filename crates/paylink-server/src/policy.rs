//! Usage policy for paywalled resources.
//!
//! [`ResourcePolicyEngine::check`] is a read-only pre-flight used before a
//! caller is charged. [`ResourcePolicyEngine::admit`] is the authoritative
//! decision: one conditional `UPDATE ... RETURNING` that re-applies every
//! rule and bumps the counter in the same statement, so two racing requests
//! can never both take the last download.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{resource_from_row, Database, Resource, ResourceKind, RESOURCE_COLUMNS};
use crate::error::ServerError;

/// What the caller wants to do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Inline content; counts a view.
    Read,
    /// Signed file URL; counts a download and is subject to the quota.
    Download,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Read => "read",
            Scope::Download => "download",
        }
    }
}

/// Why a resource refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Denial {
    /// Missing, inactive, or (for downloads) not a file
    #[error("not_found")]
    NotFound,
    #[error("expired")]
    Expired,
    #[error("quota_exceeded")]
    QuotaExceeded,
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Denial::NotFound => "not_found",
            Denial::Expired => "expired",
            Denial::QuotaExceeded => "quota_exceeded",
        }
    }
}

impl From<Denial> for ServerError {
    fn from(d: Denial) -> Self {
        ServerError::Denied(d)
    }
}

/// Apply the rules in order: exists and active, then not expired, then
/// (downloads only) quota not exhausted.
pub fn evaluate(resource: Option<&Resource>, scope: Scope, now_ms: i64) -> Result<(), Denial> {
    let resource = match resource {
        Some(r) if r.active => r,
        _ => return Err(Denial::NotFound),
    };
    if scope == Scope::Download && resource.kind() != ResourceKind::File {
        return Err(Denial::NotFound);
    }
    if let Some(expires_at) = resource.expires_at {
        if now_ms >= expires_at {
            return Err(Denial::Expired);
        }
    }
    if scope == Scope::Download {
        if let Some(max) = resource.max_downloads {
            if resource.download_count >= max {
                return Err(Denial::QuotaExceeded);
            }
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct ResourcePolicyEngine {
    db: Database,
}

impl ResourcePolicyEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Non-mutating check. Returns the resource as it stands now.
    pub fn check(&self, short_id: &str, scope: Scope, now_ms: i64) -> Result<Resource, ServerError> {
        let resource = self.db.get_resource(short_id)?;
        match (evaluate(resource.as_ref(), scope, now_ms), resource) {
            (Ok(()), Some(resource)) => Ok(resource),
            (Err(denial), _) => Err(deny(short_id, scope, denial)),
            (Ok(()), None) => Err(deny(short_id, scope, Denial::NotFound)),
        }
    }

    /// Admit the request and increment the matching counter atomically.
    /// Returns the resource with its counters after the increment.
    pub fn admit(&self, short_id: &str, scope: Scope, now_ms: i64) -> Result<Resource, ServerError> {
        let statement = match scope {
            Scope::Read => format!(
                "UPDATE resources SET view_count = view_count + 1
                 WHERE short_id = ?1 AND active = 1
                   AND (expires_at IS NULL OR expires_at > ?2)
                 RETURNING {RESOURCE_COLUMNS}"
            ),
            Scope::Download => format!(
                "UPDATE resources SET download_count = download_count + 1
                 WHERE short_id = ?1 AND active = 1 AND kind = 'file'
                   AND (expires_at IS NULL OR expires_at > ?2)
                   AND (max_downloads IS NULL OR download_count < max_downloads)
                 RETURNING {RESOURCE_COLUMNS}"
            ),
        };

        let outcome = self.db.with_connection(|conn| {
            if let Some(resource) = conn
                .query_row(&statement, params![short_id, now_ms], resource_from_row)
                .optional()?
            {
                return Ok(Ok(resource));
            }
            // Nothing matched: read the row back to say why.
            let current = conn
                .query_row(
                    &format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE short_id = ?1"),
                    params![short_id],
                    resource_from_row,
                )
                .optional()?;
            Ok(Err(evaluate(current.as_ref(), scope, now_ms)
                .err()
                .unwrap_or(Denial::QuotaExceeded)))
        })?;

        match outcome {
            Ok(resource) => {
                tracing::debug!(short_id, scope = scope.as_str(), "policy admitted request");
                Ok(resource)
            }
            Err(denial) => Err(deny(short_id, scope, denial)),
        }
    }
}

fn deny(short_id: &str, scope: Scope, denial: Denial) -> ServerError {
    crate::metrics::POLICY_DENIALS
        .with_label_values(&[denial.as_str()])
        .inc();
    tracing::info!(
        short_id,
        scope = scope.as_str(),
        reason = denial.as_str(),
        "policy denied request"
    );
    ServerError::Denied(denial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewResource, ResourcePayload};

    const WALLET: &str = "0x1111111111111111111111111111111111111111";

    fn file(max_downloads: Option<i64>, expires_at: Option<i64>) -> NewResource {
        NewResource {
            title: "Report".to_string(),
            description: None,
            payload: ResourcePayload::File {
                file_url: "https://files.example.com/report.pdf".to_string(),
                file_name: "report.pdf".to_string(),
                file_size: Some(2048),
                mime_type: Some("application/pdf".to_string()),
            },
            price: "$0.50".to_string(),
            preview_content: None,
            expires_at,
            max_downloads,
        }
    }

    fn setup(new: NewResource) -> (Database, ResourcePolicyEngine) {
        let db = Database::new(":memory:").unwrap();
        let owner = db.get_or_create_account(WALLET).unwrap();
        db.insert_resource(owner.id, "res00001", &new).unwrap();
        let engine = ResourcePolicyEngine::new(db.clone());
        (db, engine)
    }

    #[test]
    fn unknown_resource_is_not_found() {
        let (_, engine) = setup(file(None, None));
        for scope in [Scope::Read, Scope::Download] {
            assert!(matches!(
                engine.check("missing0", scope, 0),
                Err(ServerError::Denied(Denial::NotFound))
            ));
            assert!(matches!(
                engine.admit("missing0", scope, 0),
                Err(ServerError::Denied(Denial::NotFound))
            ));
        }
    }

    #[test]
    fn read_increments_views_only() {
        let (_, engine) = setup(file(Some(1), None));
        let r = engine.admit("res00001", Scope::Read, 0).unwrap();
        assert_eq!(r.view_count, 1);
        assert_eq!(r.download_count, 0);
        // reads ignore the download quota
        engine.admit("res00001", Scope::Read, 0).unwrap();
    }

    #[test]
    fn expired_is_never_admitted() {
        let (_, engine) = setup(file(None, Some(1_000)));
        assert!(engine.admit("res00001", Scope::Read, 999).is_ok());
        assert!(matches!(
            engine.check("res00001", Scope::Read, 1_000),
            Err(ServerError::Denied(Denial::Expired))
        ));
        assert!(matches!(
            engine.admit("res00001", Scope::Download, 5_000),
            Err(ServerError::Denied(Denial::Expired))
        ));
    }

    #[test]
    fn quota_admits_exactly_n() {
        let (db, engine) = setup(file(Some(3), None));
        for _ in 0..3 {
            engine.admit("res00001", Scope::Download, 0).unwrap();
        }
        assert!(matches!(
            engine.admit("res00001", Scope::Download, 0),
            Err(ServerError::Denied(Denial::QuotaExceeded))
        ));
        assert_eq!(db.get_resource("res00001").unwrap().unwrap().download_count, 3);
    }

    #[test]
    fn download_requires_file_kind() {
        let mut new = file(None, None);
        new.payload = ResourcePayload::Link {
            link: "https://example.com".to_string(),
        };
        let (_, engine) = setup(new);
        assert!(matches!(
            engine.admit("res00001", Scope::Download, 0),
            Err(ServerError::Denied(Denial::NotFound))
        ));
        assert!(engine.admit("res00001", Scope::Read, 0).is_ok());
    }

    #[test]
    fn inactive_is_not_found() {
        let (db, engine) = setup(file(None, None));
        let owner = db.get_account_by_wallet(WALLET).unwrap().unwrap();
        db.update_resource(
            "res00001",
            owner.id,
            &crate::db::ResourcePatch {
                active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(
            engine.admit("res00001", Scope::Read, 0),
            Err(ServerError::Denied(Denial::NotFound))
        ));
    }

    #[test]
    fn concurrent_downloads_never_double_admit() {
        let (db, engine) = setup(file(Some(1), None));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || engine.admit("res00001", Scope::Download, 0).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(db.get_resource("res00001").unwrap().unwrap().download_count, 1);
    }
}
