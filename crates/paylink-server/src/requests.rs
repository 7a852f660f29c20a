//! Request bodies and query strings, validated into domain inputs before
//! any handler logic runs.

use serde::{Deserialize, Deserializer};

use crate::db::{AccountPatch, NewResource, ProfileSettings, QrSettings, ResourceKind, ResourcePatch, ResourcePayload};
use crate::error::ServerError;
use crate::validation::{validate_amount, validate_handle, validate_public_url, validate_slug};

const MAX_TITLE_LEN: usize = 200;
const MAX_TEXT_LEN: usize = 100_000;

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn required(value: Option<String>, message: &str) -> Result<String, ServerError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServerError::validation(message))
}

fn optional_text(value: Option<String>, field: &str) -> Result<Option<String>, ServerError> {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) if v.len() > MAX_TEXT_LEN => Err(ServerError::validation(format!(
            "{field} is too long"
        ))),
        other => Ok(other),
    }
}

fn title(value: String) -> Result<String, ServerError> {
    let title = value.trim().to_string();
    if title.is_empty() {
        return Err(ServerError::validation("Title is required"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(ServerError::validation(format!(
            "Title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title)
}

fn max_downloads(value: i64) -> Result<i64, ServerError> {
    if value < 1 {
        return Err(ServerError::validation("maxDownloads must be at least 1"));
    }
    Ok(value)
}

fn price(value: &str, decimals: u32) -> Result<String, ServerError> {
    validate_amount(value, decimals)?;
    Ok(value.trim().to_string())
}

// ── paywall ─────────────────────────────────────────────────────────────

/// `contentId` from the query string or a JSON body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRequest {
    pub content_id: Option<String>,
}

impl ContentRequest {
    pub fn validate(self) -> Result<String, ServerError> {
        required(self.content_id, "Content ID is required")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub file_id: Option<String>,
}

impl DownloadRequest {
    pub fn validate(self) -> Result<String, ServerError> {
        required(self.file_id, "File ID is required")
    }
}

#[derive(Debug, Deserialize)]
pub struct RedeemGrantRequest {
    pub token: Option<String>,
}

impl RedeemGrantRequest {
    pub fn validate(self) -> Result<String, ServerError> {
        required(self.token, "Grant token is required")
    }
}

/// A JSON number or string; numbers keep their literal digits.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Number(serde_json::Number),
    Text(String),
}

impl AmountInput {
    fn as_text(&self) -> String {
        match self {
            AmountInput::Number(n) => n.to_string(),
            AmountInput::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePaymentRequest {
    pub profile_id: Option<String>,
    pub amount: Option<AmountInput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePayment {
    pub slug: String,
    /// Amount as the payer entered it
    pub amount: String,
    pub units: u128,
}

impl ProfilePaymentRequest {
    pub fn validate(self, decimals: u32) -> Result<ProfilePayment, ServerError> {
        let slug = required(self.profile_id, "Profile ID is required")?;
        let amount = self
            .amount
            .map(|a| a.as_text())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ServerError::validation("Amount is required"))?;
        let units = validate_amount(&amount, decimals)?;
        Ok(ProfilePayment {
            slug: slug.to_ascii_lowercase(),
            amount,
            units,
        })
    }
}

// ── accounts ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub wallet_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SocialLinksInput {
    pub twitter: Option<String>,
    pub github: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub social_links: Option<SocialLinksInput>,
}

impl UpdateAccountRequest {
    pub fn validate(self) -> Result<AccountPatch, ServerError> {
        let handle = self.handle.as_deref().map(validate_handle).transpose()?;
        if let Some(url) = self.avatar_url.as_deref() {
            validate_public_url(url, true)?;
        }
        let links = self.social_links.unwrap_or_default();
        if let Some(url) = links.website.as_deref() {
            validate_public_url(url, false)?;
        }
        Ok(AccountPatch {
            handle,
            display_name: optional_text(self.display_name, "Display name")?,
            bio: optional_text(self.bio, "Bio")?,
            avatar_url: self.avatar_url,
            twitter: optional_text(links.twitter, "Twitter")?,
            github: optional_text(links.github, "GitHub")?,
            website: links.website,
        })
    }
}

// ── profiles ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrSettingsInput {
    pub background_color: String,
    pub foreground_color: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProfileRequest {
    pub slug: Option<String>,
    pub default_amount: Option<AmountInput>,
    pub qr_code_settings: Option<QrSettingsInput>,
    pub theme: Option<String>,
}

fn is_hex_colour(s: &str) -> bool {
    s.strip_prefix('#')
        .is_some_and(|h| (h.len() == 6 || h.len() == 3) && h.chars().all(|c| c.is_ascii_hexdigit()))
}

impl SaveProfileRequest {
    pub fn validate(self, decimals: u32) -> Result<ProfileSettings, ServerError> {
        let slug = validate_slug(&required(self.slug, "Slug is required")?)?;
        let default_amount = match self.default_amount.map(|a| a.as_text()) {
            Some(a) if !a.is_empty() => {
                validate_amount(&a, decimals)?;
                Some(a)
            }
            _ => None,
        };
        let qr_settings = match self.qr_code_settings {
            Some(qr) => {
                if !is_hex_colour(&qr.background_color) || !is_hex_colour(&qr.foreground_color) {
                    return Err(ServerError::validation(
                        "QR colours must be hex values like #ffffff",
                    ));
                }
                Some(QrSettings {
                    background_color: qr.background_color,
                    foreground_color: qr.foreground_color,
                })
            }
            None => None,
        };
        Ok(ProfileSettings {
            slug,
            default_amount,
            qr_settings,
            theme: optional_text(self.theme, "Theme")?,
        })
    }
}

// ── resources ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub link: Option<String>,
    pub document_content: Option<String>,
    pub price: Option<String>,
    pub preview_content: Option<String>,
    pub expires_at: Option<i64>,
    pub max_downloads: Option<i64>,
}

impl CreateResourceRequest {
    pub fn validate(self, decimals: u32, now_ms: i64) -> Result<NewResource, ServerError> {
        let title = title(self.title.unwrap_or_default())?;
        let kind_str = required(self.kind, "Content type is required")?;
        let kind = ResourceKind::parse(&kind_str).ok_or_else(|| {
            ServerError::validation("Content type must be one of file, link, document")
        })?;

        let payload = match kind {
            ResourceKind::File => {
                let file_url = required(self.file_url, "fileUrl is required for files")?;
                validate_public_url(&file_url, true)?;
                let file_name = required(self.file_name, "fileName is required for files")?;
                if self.file_size.is_some_and(|s| s < 0) {
                    return Err(ServerError::validation("fileSize cannot be negative"));
                }
                ResourcePayload::File {
                    file_url,
                    file_name,
                    file_size: self.file_size,
                    mime_type: optional_text(self.mime_type, "mimeType")?,
                }
            }
            ResourceKind::Link => {
                let link = required(self.link, "link is required for links")?;
                validate_public_url(&link, false)?;
                ResourcePayload::Link { link }
            }
            ResourceKind::Document => {
                let document_content = optional_text(self.document_content, "documentContent")?
                    .ok_or_else(|| {
                        ServerError::validation("documentContent is required for documents")
                    })?;
                ResourcePayload::Document { document_content }
            }
        };

        let price = price(&required(self.price, "Price is required")?, decimals)?;
        if self.expires_at.is_some_and(|t| t <= now_ms) {
            return Err(ServerError::validation("expiresAt must be in the future"));
        }

        Ok(NewResource {
            title,
            description: optional_text(self.description, "Description")?,
            payload,
            price,
            preview_content: optional_text(self.preview_content, "previewContent")?,
            expires_at: self.expires_at,
            max_downloads: self.max_downloads.map(max_downloads).transpose()?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResourceRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    pub price: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub preview_content: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub expires_at: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub max_downloads: Option<Option<i64>>,
    pub is_active: Option<bool>,
}

impl UpdateResourceRequest {
    pub fn validate(self, decimals: u32) -> Result<ResourcePatch, ServerError> {
        Ok(ResourcePatch {
            title: self.title.map(title).transpose()?,
            description: self
                .description
                .map(|d| optional_text(d, "Description"))
                .transpose()?,
            price: self.price.as_deref().map(|p| price(p, decimals)).transpose()?,
            preview_content: self
                .preview_content
                .map(|p| optional_text(p, "previewContent"))
                .transpose()?,
            expires_at: self.expires_at,
            max_downloads: self
                .max_downloads
                .map(|m| m.map(max_downloads).transpose())
                .transpose()?,
            active: self.is_active,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettlementQuery {
    pub payer: Option<String>,
    pub payee: Option<String>,
    pub account: Option<String>,
    pub resource: Option<String>,
    pub profile: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<u32>,
}
