//! HTTP wrappers around the chat backend.
//!
//! One [ApiClient] owns the `reqwest` client, the base URL, the local
//! [Identity] and the optional bearer token. Identity-scoped calls carry the
//! `X-User-ID` header; authenticated calls add `Authorization: Bearer`.

use std::sync::RwLock;

use reqwest::multipart;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use talka_core::Identity;
use talka_transport::IceCandidate;
use url::Url;

use crate::error::Error;
use crate::error::Result;

/// A chat room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// One member of a room, from the members endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMemberRecord {
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
}

/// A pending or live signaling session as the relay reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSession {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub target_user_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// An ICE candidate as carried by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidateRecord {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

impl From<IceCandidate> for IceCandidateRecord {
    fn from(c: IceCandidate) -> Self {
        Self {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_m_line_index: c.sdp_mline_index,
        }
    }
}

impl From<IceCandidateRecord> for IceCandidate {
    fn from(c: IceCandidateRecord) -> Self {
        Self {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_m_line_index,
        }
    }
}

/// Snapshot of one signaling session: the current state plus whatever SDP and
/// candidates the relay has accumulated. Delivery is at-least-once; the caller
/// dedups.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStatus {
    pub state: String,
    #[serde(default)]
    pub offer_sdp: Option<String>,
    #[serde(default)]
    pub answer_sdp: Option<String>,
    #[serde(default)]
    pub ice: Vec<IceCandidateRecord>,
}

/// Token bundle returned by login, signup and confirm.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// The authenticated account profile.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Response of a file upload.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Serialize)]
struct RequestSessionBody<'a> {
    target_user_id: &'a str,
    user_id: &'a str,
    user_name: Option<&'a str>,
}

#[derive(Serialize)]
struct AcceptSessionBody<'a> {
    session_id: &'a str,
    local_ip: Option<&'a str>,
    user_id: &'a str,
}

#[derive(Serialize)]
struct SdpBody<'a> {
    session_id: &'a str,
    sdp: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Serialize)]
struct IceBody<'a> {
    session_id: &'a str,
    candidate: &'a str,
    sdp_mid: Option<&'a str>,
    sdp_m_line_index: Option<u16>,
}

/// Map a non-success response status to the client error taxonomy.
fn status_error(status: StatusCode, detail: String) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(detail),
        StatusCode::CONFLICT => Error::Conflict(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Authentication(detail),
        s => Error::HttpStatus(s.as_u16(), detail),
    }
}

/// HTTP client for the chat backend.
pub struct ApiClient {
    base_url: Url,
    client: reqwest::Client,
    identity: Identity,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// Create a client against `endpoint_url` acting as `identity`.
    pub fn new(endpoint_url: &str, identity: Identity) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(endpoint_url)?,
            client: reqwest::Client::new(),
            identity,
            token: RwLock::new(None),
        })
    }

    /// The identity this client acts as.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Install a bearer token for subsequent authenticated calls.
    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    fn bearer(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Build the room channel URL: `/ws/general?room_id=&user_id=&name=`.
    pub fn ws_general_url(&self, room_id: &str) -> Result<Url> {
        let mut url = self.base_url.join("/ws/general")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::Validation("endpoint url has no usable scheme".to_string()))?;
        url.query_pairs_mut()
            .append_pair("room_id", room_id)
            .append_pair("user_id", &self.identity.user_id)
            .append_pair("name", &self.identity.display_name());
        Ok(url)
    }

    fn with_identity(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header("X-User-ID", &self.identity.user_id);
        match self.bearer() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn check(&self, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let detail = resp.text().await.unwrap_or_default();
        Err(status_error(status, detail))
    }

    // rooms

    /// `GET /api/v1/rooms`
    pub async fn list_rooms(&self) -> Result<Vec<Room>> {
        let resp = self.client.get(self.api_url("/api/v1/rooms")?).send().await?;
        Ok(self.check(resp).await?.json().await?)
    }

    /// `POST /api/v1/rooms`
    pub async fn create_room(&self, name: &str, code: &str) -> Result<Room> {
        if name.trim().is_empty() {
            return Err(Error::Validation("room name must not be empty".to_string()));
        }
        let resp = self
            .client
            .post(self.api_url("/api/v1/rooms")?)
            .json(&serde_json::json!({ "name": name, "code": code }))
            .send()
            .await?;
        Ok(self.check(resp).await?.json().await?)
    }

    /// `POST /api/v1/rooms/{id}/join`. Idempotent on the server side.
    pub async fn join_room(&self, room_id: &str) -> Result<()> {
        let resp = self
            .with_identity(
                self.client
                    .post(self.api_url(&format!("/api/v1/rooms/{room_id}/join"))?),
            )
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    /// `GET /api/v1/rooms/{id}/members`
    pub async fn room_members(&self, room_id: &str) -> Result<Vec<RoomMemberRecord>> {
        let resp = self
            .client
            .get(self.api_url(&format!("/api/v1/rooms/{room_id}/members"))?)
            .send()
            .await?;
        Ok(self.check(resp).await?.json().await?)
    }

    // p2p signaling

    /// `GET /api/v1/p2p/pending`
    pub async fn pending_sessions(&self) -> Result<Vec<PendingSession>> {
        let resp = self
            .with_identity(self.client.get(self.api_url("/api/v1/p2p/pending")?))
            .send()
            .await?;
        Ok(self.check(resp).await?.json().await?)
    }

    /// `POST /api/v1/p2p/request`. A second request between the same pair while
    /// one is pending surfaces [Error::Conflict].
    pub async fn request_session(&self, target_user_id: &str) -> Result<PendingSession> {
        let body = RequestSessionBody {
            target_user_id,
            user_id: &self.identity.user_id,
            user_name: self.identity.user_name.as_deref(),
        };
        let resp = self
            .with_identity(self.client.post(self.api_url("/api/v1/p2p/request")?))
            .json(&body)
            .send()
            .await?;
        Ok(self.check(resp).await?.json().await?)
    }

    /// `POST /api/v1/p2p/accept`
    pub async fn accept_session(&self, session_id: &str, local_ip: Option<&str>) -> Result<()> {
        let body = AcceptSessionBody {
            session_id,
            local_ip,
            user_id: &self.identity.user_id,
        };
        let resp = self
            .with_identity(self.client.post(self.api_url("/api/v1/p2p/accept")?))
            .json(&body)
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    /// `GET /api/v1/p2p/session/{id}`
    pub async fn session_status(&self, session_id: &str) -> Result<SessionStatus> {
        let resp = self
            .with_identity(
                self.client
                    .get(self.api_url(&format!("/api/v1/p2p/session/{session_id}"))?),
            )
            .send()
            .await?;
        Ok(self.check(resp).await?.json().await?)
    }

    /// `POST /api/v1/p2p/signal/offer`. Idempotent; the relay keeps the last one.
    pub async fn send_offer(&self, session_id: &str, sdp: &str) -> Result<()> {
        self.send_sdp("offer", session_id, sdp).await
    }

    /// `POST /api/v1/p2p/signal/answer`. Idempotent; the relay keeps the last one.
    pub async fn send_answer(&self, session_id: &str, sdp: &str) -> Result<()> {
        self.send_sdp("answer", session_id, sdp).await
    }

    async fn send_sdp(&self, kind: &str, session_id: &str, sdp: &str) -> Result<()> {
        let body = SdpBody {
            session_id,
            sdp,
            kind,
        };
        let resp = self
            .with_identity(
                self.client
                    .post(self.api_url(&format!("/api/v1/p2p/signal/{kind}"))?),
            )
            .json(&body)
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    /// `POST /api/v1/p2p/signal/ice`. Additive; candidates accumulate on the relay.
    pub async fn send_ice_candidate(&self, session_id: &str, candidate: &IceCandidate) -> Result<()> {
        let body = IceBody {
            session_id,
            candidate: &candidate.candidate,
            sdp_mid: candidate.sdp_mid.as_deref(),
            sdp_m_line_index: candidate.sdp_mline_index,
        };
        let resp = self
            .with_identity(self.client.post(self.api_url("/api/v1/p2p/signal/ice")?))
            .json(&body)
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    /// `POST /api/v1/p2p/close/{id}`
    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let resp = self
            .with_identity(
                self.client
                    .post(self.api_url(&format!("/api/v1/p2p/close/{session_id}"))?),
            )
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    // files, messages, reports

    /// `POST /api/v1/files` (multipart)
    pub async fn upload_file(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile> {
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(content_type)
            .map_err(|e| Error::Validation(format!("bad content type: {e}")))?;
        let form = multipart::Form::new().part("file", part);
        let resp = self
            .with_identity(self.client.post(self.api_url("/api/v1/files")?))
            .multipart(form)
            .send()
            .await?;
        Ok(self.check(resp).await?.json().await?)
    }

    /// `GET /api/v1/files/{id}`
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(self.api_url(&format!("/api/v1/files/{file_id}"))?)
            .send()
            .await?;
        Ok(self.check(resp).await?.bytes().await?.to_vec())
    }

    /// `DELETE /api/v1/files/{id}`
    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        let resp = self
            .with_identity(
                self.client
                    .delete(self.api_url(&format!("/api/v1/files/{file_id}"))?),
            )
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    /// `DELETE /api/v1/messages/{id}`
    pub async fn delete_message(&self, message_id: i64) -> Result<()> {
        let resp = self
            .with_identity(
                self.client
                    .delete(self.api_url(&format!("/api/v1/messages/{message_id}"))?),
            )
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    /// `POST /api/v1/reports`
    pub async fn report_message(&self, message_id: i64, reason: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.api_url("/api/v1/reports")?)
            .json(&serde_json::json!({ "message_id": message_id, "reason": reason }))
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    // auth

    /// `POST /api/v1/auth/signup`. Captures the returned token, if any.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<TokenResponse> {
        let resp = self
            .client
            .post(self.api_url("/api/v1/auth/signup")?)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "display_name": display_name,
            }))
            .send()
            .await?;
        let token: TokenResponse = self.check(resp).await?.json().await?;
        self.set_token(Some(token.access_token.clone()));
        Ok(token)
    }

    /// `POST /api/v1/auth/login`. Captures the returned token.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse> {
        let resp = self
            .client
            .post(self.api_url("/api/v1/auth/login")?)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        let token: TokenResponse = self.check(resp).await?.json().await?;
        self.set_token(Some(token.access_token.clone()));
        Ok(token)
    }

    /// `GET /api/v1/auth/me`
    pub async fn me(&self) -> Result<Profile> {
        let Some(token) = self.bearer() else {
            return Err(Error::Authentication("not logged in".to_string()));
        };
        let resp = self
            .client
            .get(self.api_url("/api/v1/auth/me")?)
            .bearer_auth(token)
            .send()
            .await?;
        Ok(self.check(resp).await?.json().await?)
    }

    /// `POST /api/v1/auth/forgot`
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.api_url("/api/v1/auth/forgot")?)
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    /// `POST /api/v1/auth/reset`
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.api_url("/api/v1/auth/reset")?)
            .json(&serde_json::json!({ "token": token, "new_password": new_password }))
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    /// `POST /api/v1/auth/confirm`. Captures the returned token, if any.
    pub async fn confirm_email(&self, token: &str) -> Result<TokenResponse> {
        let resp = self
            .client
            .post(self.api_url("/api/v1/auth/confirm")?)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await?;
        let token: TokenResponse = self.check(resp).await?.json().await?;
        self.set_token(Some(token.access_token.clone()));
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> ApiClient {
        let mut identity = Identity::from_user_id("user-1234");
        identity.set_user_name("ada");
        ApiClient::new("http://127.0.0.1:8000", identity).unwrap()
    }

    #[test]
    fn test_ws_general_url() {
        let client = test_client();
        let url = client.ws_general_url("room-1").unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/ws/general");
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(query.contains(&("room_id".to_string(), "room-1".to_string())));
        assert!(query.contains(&("user_id".to_string(), "user-1234".to_string())));
        assert!(query.contains(&("name".to_string(), "ada".to_string())));
    }

    #[test]
    fn test_ws_url_upgrades_https() {
        let identity = Identity::from_user_id("u");
        let client = ApiClient::new("https://chat.example.org", identity).unwrap();
        let url = client.ws_general_url("r").unwrap();
        assert_eq!(url.scheme(), "wss");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, String::new()),
            Error::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::CONFLICT, String::new()),
            Error::Conflict(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new()),
            Error::Authentication(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, String::new()),
            Error::Authentication(_)
        ));
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            Error::HttpStatus(500, _)
        ));
    }

    #[test]
    fn test_empty_room_name_rejected() {
        let client = test_client();
        let err = futures::executor::block_on(client.create_room("  ", "")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_ice_record_field_names() {
        let record: IceCandidateRecord = serde_json::from_str(
            r#"{"candidate":"candidate:1","sdp_mid":"0","sdp_m_line_index":0}"#,
        )
        .unwrap();
        let candidate: IceCandidate = record.into();
        assert_eq!(candidate.sdp_mline_index, Some(0));
    }
}
