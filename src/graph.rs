//! Meta Graph API client: the ads-platform side of the pipeline.
//!
//! [`GraphApiClient`] is an explicit client object: it owns the app
//! credentials and access token and is passed to every stage that needs it.
//! There is no process-wide SDK initialisation.
//!
//! Every request carries the access token and an `appsecret_proof`
//! (HMAC-SHA256 of the token keyed by the app secret). Graph error bodies are
//! surfaced verbatim as [`GraphApiError`].

use async_trait::async_trait;
use audience_sync_core::contract::{
    AdsPlatform, AudienceField, AudienceHandle, AudienceSummary, ClientError, NewCustomAudience,
    UploadResult, UserPayload,
};
use chrono::DateTime;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com";

const AUDIENCE_PAGE_SIZE: &str = "500";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct GraphApiClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    access_token: String,
    appsecret_proof: String,
}

/// Error object returned by the Graph API.
#[derive(Debug)]
pub struct GraphApiError {
    pub status: u16,
    pub code: Option<i64>,
    pub error_type: Option<String>,
    pub message: String,
    pub fbtrace_id: Option<String>,
}

impl fmt::Display for GraphApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Graph API returned {}", self.status)?;
        if let Some(code) = self.code {
            write!(f, " (code {}", code)?;
            if let Some(error_type) = &self.error_type {
                write!(f, ", {}", error_type)?;
            }
            write!(f, ")")?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(trace) = &self.fbtrace_id {
            write!(f, " [fbtrace_id {}]", trace)?;
        }
        Ok(())
    }
}

impl std::error::Error for GraphApiError {}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<i64>,
    fbtrace_id: Option<String>,
}

#[derive(Deserialize)]
struct AudiencePage {
    #[serde(default)]
    data: Vec<AudienceNode>,
    paging: Option<Paging>,
}

#[derive(Deserialize)]
struct Paging {
    cursors: Option<Cursors>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct Cursors {
    after: Option<String>,
}

#[derive(Deserialize)]
struct AudienceNode {
    id: String,
    name: Option<String>,
    time_created: Option<i64>,
}

#[derive(Deserialize)]
struct CreatedNode {
    id: String,
}

#[derive(Deserialize)]
struct UsersResponse {
    audience_id: Option<String>,
    #[serde(default)]
    num_received: u64,
    #[serde(default)]
    num_invalid_entries: u64,
}

/// Hex HMAC-SHA256 of the access token keyed by the app secret.
pub fn appsecret_proof(app_secret: &str, access_token: &str) -> Result<String, ClientError> {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .map_err(|e| format!("Invalid app secret: {e}"))?;
    mac.update(access_token.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn summary_from_node(node: AudienceNode) -> Result<AudienceSummary, ClientError> {
    let name = node
        .name
        .ok_or_else(|| format!("Custom audience {} listed without a name", node.id))?;
    let created = node
        .time_created
        .ok_or_else(|| format!("Custom audience {} listed without time_created", node.id))?;
    let time_created = DateTime::from_timestamp(created, 0)
        .ok_or_else(|| format!("Custom audience {} has invalid time_created {}", node.id, created))?;
    Ok(AudienceSummary {
        id: node.id,
        name,
        time_created,
    })
}

fn users_payload_json(payload: &UserPayload) -> String {
    let schema: Vec<&str> = payload.schema.iter().map(|field| field.key()).collect();
    let data: Vec<[Option<&str>; 4]> = payload.data.iter().map(|user| user.values()).collect();
    json!({ "schema": schema, "data": data }).to_string()
}

impl GraphApiClient {
    /// Creates a client bound to one app and access token.
    pub fn new(
        app_id: String,
        app_secret: &str,
        access_token: String,
        api_version: String,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        let appsecret_proof = appsecret_proof(app_secret, &access_token)?;
        tracing::info!(app_id = %app_id, api_version = %api_version, "Initialised Graph API client");
        Ok(Self {
            http,
            base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            api_version,
            access_token,
            appsecret_proof,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn node_url(&self, node: &str, edge: &str) -> String {
        format!("{}/{}/{}/{}", self.base_url, self.api_version, node, edge)
    }

    fn auth_params(&self) -> [(&'static str, &str); 2] {
        [
            ("access_token", self.access_token.as_str()),
            ("appsecret_proof", self.appsecret_proof.as_str()),
        ]
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let error = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => GraphApiError {
                    status,
                    code: envelope.error.code,
                    error_type: envelope.error.error_type,
                    message: envelope.error.message,
                    fbtrace_id: envelope.error.fbtrace_id,
                },
                Err(_) => GraphApiError {
                    status,
                    code: None,
                    error_type: None,
                    message: body,
                    fbtrace_id: None,
                },
            };
            tracing::error!(error = %error, "Graph API request failed");
            return Err(Box::new(error));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl AdsPlatform for GraphApiClient {
    async fn list_custom_audiences(
        &self,
        ad_account_id: &str,
        fields: &[AudienceField],
    ) -> Result<Vec<AudienceSummary>, ClientError> {
        let url = self.node_url(ad_account_id, "customaudiences");
        let fields = fields
            .iter()
            .map(AudienceField::as_str)
            .collect::<Vec<_>>()
            .join(",");
        tracing::info!(ad_account_id, fields = %fields, "Listing custom audiences");

        let mut audiences = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(&url)
                .query(&self.auth_params())
                .query(&[("fields", fields.as_str()), ("limit", AUDIENCE_PAGE_SIZE)]);
            if let Some(cursor) = &after {
                request = request.query(&[("after", cursor)]);
            }
            let page: AudiencePage = self.send(request).await?;
            for node in page.data {
                audiences.push(summary_from_node(node)?);
            }

            // `next` is only present while more pages remain.
            after = page
                .paging
                .filter(|paging| paging.next.is_some())
                .and_then(|paging| paging.cursors)
                .and_then(|cursors| cursors.after);
            if after.is_none() {
                break;
            }
        }

        tracing::info!(ad_account_id, count = audiences.len(), "Listed custom audiences");
        Ok(audiences)
    }

    async fn create_custom_audience(
        &self,
        ad_account_id: &str,
        audience: &NewCustomAudience,
    ) -> Result<AudienceHandle, ClientError> {
        let url = self.node_url(ad_account_id, "customaudiences");
        tracing::info!(ad_account_id, name = %audience.name, "Creating custom audience");

        let form = [
            ("name", audience.name.as_str()),
            ("description", audience.description.as_str()),
            ("subtype", audience.subtype.as_str()),
            ("customer_file_source", audience.customer_file_source.as_str()),
        ];
        let created: CreatedNode = self
            .send(self.http.post(&url).query(&self.auth_params()).form(&form))
            .await?;

        tracing::info!(audience_id = %created.id, "Created custom audience");
        Ok(AudienceHandle::new(created.id))
    }

    async fn upload_users(
        &self,
        audience: &AudienceHandle,
        payload: &UserPayload,
    ) -> Result<UploadResult, ClientError> {
        let url = self.node_url(&audience.id, "users");
        tracing::info!(
            audience_id = %audience.id,
            users = payload.data.len(),
            batch_seq = payload.session.map(|s| s.batch_seq),
            "Uploading users to custom audience"
        );

        let mut form = vec![("payload", users_payload_json(payload))];
        if let Some(session) = payload.session {
            form.push((
                "session",
                json!({
                    "session_id": session.session_id,
                    "batch_seq": session.batch_seq,
                    "last_batch_flag": session.last_batch_flag,
                    "estimated_num_total": session.estimated_num_total,
                })
                .to_string(),
            ));
        }
        let response: UsersResponse = self
            .send(self.http.post(&url).query(&self.auth_params()).form(&form))
            .await?;

        let result = UploadResult {
            audience_id: response.audience_id.unwrap_or_else(|| audience.id.clone()),
            num_received: response.num_received,
            num_invalid_entries: response.num_invalid_entries,
        };
        tracing::info!(
            audience_id = %result.audience_id,
            num_received = result.num_received,
            num_invalid_entries = result.num_invalid_entries,
            "Uploaded users to custom audience"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audience_sync_core::contract::{UserField, UserRecord};

    #[test]
    fn appsecret_proof_is_hex_hmac_sha256() {
        // RFC 4231 test case 2.
        let proof = appsecret_proof("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            proof,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn payload_keeps_schema_order_and_nulls() {
        let payload = UserPayload {
            schema: vec![
                UserField::FirstName,
                UserField::Email,
                UserField::LastName,
                UserField::Phone,
            ],
            data: vec![UserRecord {
                first_name: Some("Ana".into()),
                email: Some("ana@example.com".into()),
                last_name: None,
                phone: Some("+6281".into()),
            }],
            session: None,
        };

        let value: serde_json::Value = serde_json::from_str(&users_payload_json(&payload)).unwrap();

        assert_eq!(
            value,
            json!({
                "schema": ["FN", "EMAIL", "LN", "PHONE"],
                "data": [["Ana", "ana@example.com", null, "+6281"]]
            })
        );
    }

    #[test]
    fn audience_without_time_created_is_rejected() {
        let node = AudienceNode {
            id: "1".into(),
            name: Some("A O2O".into()),
            time_created: None,
        };
        assert!(summary_from_node(node).is_err());
    }
}
