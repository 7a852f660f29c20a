//! Access grants minted after a settled payment.
//!
//! A grant token is `base64url(claims JSON) "." hex(HMAC)`, keyed by the
//! server's grant secret under [`paylink::auth::GRANT_DOMAIN`]. The claims
//! name the resource, scope, payer and the settlement transaction that paid
//! for it, so a token cannot be moved to another resource or forged without
//! the key. Redemption is single-use within this process.

use base64::Engine;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use paylink::auth::{self, GRANT_DOMAIN};

use crate::db::{Resource, ResourcePayload};
use crate::error::ServerError;
use crate::policy::Scope;

/// Lifetime of a read grant.
pub const READ_GRANT_TTL_MS: i64 = 60 * 60 * 1000;
/// Lifetime of a download grant and its URL.
pub const DOWNLOAD_GRANT_TTL_MS: i64 = 15 * 60 * 1000;

/// Upper bound on remembered redemptions before a purge is forced.
const MAX_REDEMPTIONS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantClaims {
    pub grant_id: Uuid,
    /// Short id of the resource
    pub resource: String,
    pub scope: Scope,
    /// Payer address (lowercase hex)
    pub payer: String,
    /// Settlement transaction hash
    pub settlement: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct ReadGrant {
    pub token: String,
    pub claims: GrantClaims,
}

#[derive(Debug, Clone)]
pub struct DownloadGrant {
    pub token: String,
    pub claims: GrantClaims,
    pub download_url: String,
    pub file_name: String,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
}

pub struct AccessGrantIssuer {
    secret: Vec<u8>,
    /// grant id -> grant expiry (ms)
    redeemed: DashMap<Uuid, i64>,
}

impl AccessGrantIssuer {
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            redeemed: DashMap::new(),
        }
    }

    fn claims(
        resource: &Resource,
        scope: Scope,
        payer: &str,
        settlement: &str,
        now_ms: i64,
        ttl_ms: i64,
    ) -> GrantClaims {
        GrantClaims {
            grant_id: Uuid::new_v4(),
            resource: resource.short_id.clone(),
            scope,
            payer: payer.to_string(),
            settlement: settlement.to_string(),
            issued_at: now_ms,
            expires_at: now_ms + ttl_ms,
        }
    }

    fn sign(&self, claims: &GrantClaims) -> Result<String, ServerError> {
        let json = serde_json::to_vec(claims)
            .map_err(|e| ServerError::Internal(format!("failed to encode grant: {e}")))?;
        let body = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json);
        let signature = auth::sign(&self.secret, GRANT_DOMAIN, body.as_bytes());
        Ok(format!("{body}.{signature}"))
    }

    /// Grant for inline content, valid for one hour.
    pub fn issue_read(
        &self,
        resource: &Resource,
        payer: &str,
        settlement: &str,
        now_ms: i64,
    ) -> Result<ReadGrant, ServerError> {
        let claims = Self::claims(resource, Scope::Read, payer, settlement, now_ms, READ_GRANT_TTL_MS);
        let token = self.sign(&claims)?;
        crate::metrics::GRANTS_ISSUED.with_label_values(&["read"]).inc();
        Ok(ReadGrant { token, claims })
    }

    /// Signed delivery URL for a file, valid for fifteen minutes. The URL
    /// carries the grant token and its expiry as query parameters.
    pub fn issue_download(
        &self,
        resource: &Resource,
        payer: &str,
        settlement: &str,
        now_ms: i64,
    ) -> Result<DownloadGrant, ServerError> {
        let ResourcePayload::File {
            file_url,
            file_name,
            file_size,
            mime_type,
        } = &resource.payload
        else {
            return Err(ServerError::not_found("File not found"));
        };

        let claims = Self::claims(
            resource,
            Scope::Download,
            payer,
            settlement,
            now_ms,
            DOWNLOAD_GRANT_TTL_MS,
        );
        let token = self.sign(&claims)?;

        let mut url = url::Url::parse(file_url)
            .map_err(|e| ServerError::Internal(format!("stored file URL is invalid: {e}")))?;
        url.query_pairs_mut()
            .append_pair("token", &token)
            .append_pair("expires", &claims.expires_at.to_string());

        crate::metrics::GRANTS_ISSUED
            .with_label_values(&["download"])
            .inc();
        Ok(DownloadGrant {
            token,
            claims,
            download_url: url.into(),
            file_name: file_name.clone(),
            file_size: *file_size,
            mime_type: mime_type.clone(),
        })
    }

    /// Check signature and expiry without consuming the grant.
    pub fn verify(&self, token: &str, now_ms: i64) -> Result<GrantClaims, ServerError> {
        let (body, signature) = token.split_once('.').ok_or(ServerError::InvalidGrant)?;
        if !auth::verify(&self.secret, GRANT_DOMAIN, body.as_bytes(), signature) {
            return Err(ServerError::InvalidGrant);
        }
        let json = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| ServerError::InvalidGrant)?;
        let claims: GrantClaims =
            serde_json::from_slice(&json).map_err(|_| ServerError::InvalidGrant)?;
        if now_ms >= claims.expires_at {
            return Err(ServerError::InvalidGrant);
        }
        Ok(claims)
    }

    /// Verify and consume. A second redemption of the same grant fails with
    /// `GrantAlreadyRedeemed` until the grant would have expired anyway.
    pub fn redeem(&self, token: &str, now_ms: i64) -> Result<GrantClaims, ServerError> {
        use dashmap::mapref::entry::Entry;

        let claims = self.verify(token, now_ms)?;
        if self.redeemed.len() >= MAX_REDEMPTIONS {
            self.purge_expired(now_ms);
        }
        match self.redeemed.entry(claims.grant_id) {
            Entry::Occupied(_) => Err(ServerError::GrantAlreadyRedeemed),
            Entry::Vacant(v) => {
                v.insert(claims.expires_at);
                Ok(claims)
            }
        }
    }

    /// Forget redemptions of grants that have expired. Returns the number purged.
    pub fn purge_expired(&self, now_ms: i64) -> usize {
        let before = self.redeemed.len();
        self.redeemed.retain(|_, expires_at| *expires_at > now_ms);
        before.saturating_sub(self.redeemed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYER: &str = "0x3333333333333333333333333333333333333333";
    const TX: &str = "0xabc123";

    fn resource(payload: ResourcePayload) -> Resource {
        Resource {
            id: 1,
            short_id: "AbCd1234".to_string(),
            account_id: 1,
            title: "Report".to_string(),
            description: None,
            payload,
            price: "$0.50".to_string(),
            preview_content: None,
            expires_at: None,
            max_downloads: None,
            download_count: 0,
            view_count: 0,
            active: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn file() -> Resource {
        resource(ResourcePayload::File {
            file_url: "https://files.example.com/report.pdf?v=2".to_string(),
            file_name: "report.pdf".to_string(),
            file_size: Some(4096),
            mime_type: Some("application/pdf".to_string()),
        })
    }

    #[test]
    fn read_grant_expires_in_one_hour() {
        let issuer = AccessGrantIssuer::new(b"k".to_vec());
        let grant = issuer.issue_read(&file(), PAYER, TX, 1_000).unwrap();
        assert_eq!(grant.claims.expires_at, 1_000 + 3_600_000);
        assert_eq!(grant.claims.scope, Scope::Read);

        let claims = issuer.verify(&grant.token, 2_000).unwrap();
        assert_eq!(claims, grant.claims);
        assert!(issuer.verify(&grant.token, 1_000 + 3_600_000).is_err());
    }

    #[test]
    fn download_url_carries_token_and_expiry() {
        let issuer = AccessGrantIssuer::new(b"k".to_vec());
        let grant = issuer.issue_download(&file(), PAYER, TX, 0).unwrap();
        assert_eq!(grant.claims.expires_at, 900_000);
        assert_eq!(grant.file_name, "report.pdf");
        assert_eq!(grant.file_size, Some(4096));

        let url = url::Url::parse(&grant.download_url).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("v").map(String::as_str), Some("2"));
        assert_eq!(pairs.get("token"), Some(&grant.token));
        assert_eq!(pairs.get("expires").map(String::as_str), Some("900000"));
    }

    #[test]
    fn download_of_non_file_is_not_found() {
        let issuer = AccessGrantIssuer::new(b"k".to_vec());
        let link = resource(ResourcePayload::Link {
            link: "https://example.com".to_string(),
        });
        assert!(matches!(
            issuer.issue_download(&link, PAYER, TX, 0),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn tampered_or_foreign_tokens_fail() {
        let issuer = AccessGrantIssuer::new(b"k".to_vec());
        let other = AccessGrantIssuer::new(b"other".to_vec());
        let grant = issuer.issue_read(&file(), PAYER, TX, 0).unwrap();

        assert!(matches!(other.verify(&grant.token, 1), Err(ServerError::InvalidGrant)));
        assert!(matches!(issuer.verify("garbage", 1), Err(ServerError::InvalidGrant)));

        let (body, sig) = grant.token.split_once('.').unwrap();
        let mut claims = grant.claims.clone();
        claims.resource = "Other123".to_string();
        let forged_body = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&claims).unwrap());
        assert_ne!(forged_body, body);
        let forged = format!("{forged_body}.{sig}");
        assert!(matches!(issuer.verify(&forged, 1), Err(ServerError::InvalidGrant)));
    }

    #[test]
    fn redeem_is_single_use() {
        let issuer = AccessGrantIssuer::new(b"k".to_vec());
        let grant = issuer.issue_read(&file(), PAYER, TX, 0).unwrap();
        assert!(issuer.redeem(&grant.token, 10).is_ok());
        assert!(matches!(
            issuer.redeem(&grant.token, 20),
            Err(ServerError::GrantAlreadyRedeemed)
        ));
    }

    #[test]
    fn purge_drops_only_expired() {
        let issuer = AccessGrantIssuer::new(b"k".to_vec());
        let read = issuer.issue_read(&file(), PAYER, TX, 0).unwrap();
        let download = issuer.issue_download(&file(), PAYER, TX, 0).unwrap();
        issuer.redeem(&read.token, 1).unwrap();
        issuer.redeem(&download.token, 1).unwrap();

        assert_eq!(issuer.purge_expired(DOWNLOAD_GRANT_TTL_MS), 1);
        assert_eq!(issuer.purge_expired(DOWNLOAD_GRANT_TTL_MS), 0);
        assert_eq!(issuer.purge_expired(READ_GRANT_TTL_MS), 1);
    }
}
