//! Guild API client: guild and role lookups, member search and role writes.

use async_trait::async_trait;
use log::{debug, warn};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tokio::time::sleep;

use rolesync_core::errors::DirectoryError;
use rolesync_core::sync::{Guild, GuildRole, Member, MemberDirectory};

use crate::error::{GuildClientError, Result};
use crate::types::*;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;
/// Largest `limit` the member list and search endpoints accept.
pub const MAX_MEMBER_PAGE: u32 = 1000;
const RATE_LIMIT_MAX_ATTEMPTS: usize = 3;
const RATE_LIMIT_BASE_BACKOFF_MS: u64 = 500;
const RATE_LIMIT_MAX_WAIT_MS: u64 = 10_000;
const AUDIT_LOG_REASON: &str = "Membership table sync";

/// How long to wait before retrying a rate-limited request.
fn rate_limit_delay(body: &str, attempt: usize) -> Duration {
    let exp = (attempt.saturating_sub(1) as u32).min(8);
    let backoff = RATE_LIMIT_BASE_BACKOFF_MS.saturating_mul(1_u64 << exp);
    let requested = serde_json::from_str::<RateLimitResponse>(body)
        .ok()
        .map(|limit| (limit.retry_after.max(0.0) * 1000.0) as u64)
        .unwrap_or(backoff);
    let jitter = rand::thread_rng().gen_range(0..=(requested / 5).max(1));
    Duration::from_millis(requested.saturating_add(jitter).min(RATE_LIMIT_MAX_WAIT_MS))
}

/// Connection settings for [`GuildClient`].
#[derive(Debug, Clone)]
pub struct GuildClientConfig {
    /// e.g. "https://discord.com/api/v10"
    pub base_url: String,
    /// Sent as `Authorization: Bot <token>`.
    pub bot_token: String,
}

#[derive(Debug, Clone)]
pub struct GuildClient {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
    member_page_limit: u32,
}

impl GuildClient {
    fn log_response(status: StatusCode, body: &str) {
        if status.is_success() {
            debug!("[GuildClient] API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[GuildClient] API response error ({}): {}", status, preview);
    }

    pub fn new(config: GuildClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token,
            member_page_limit: MAX_MEMBER_PAGE,
        })
    }

    /// Overrides the page size used when listing and searching members.
    pub fn with_member_page_limit(mut self, limit: u32) -> Self {
        self.member_page_limit = limit.clamp(1, MAX_MEMBER_PAGE);
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bot {}", self.bot_token))
            .map_err(|_| GuildClientError::auth("Invalid bot token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    /// Sends a request, retrying a bounded number of times while rate limited.
    async fn send(&self, method: Method, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("[GuildClient] {} {} (attempt {})", method, url, attempt);

            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(self.headers()?);
            if method != Method::GET {
                request = request.header(
                    "x-audit-log-reason",
                    urlencoding::encode(AUDIT_LOG_REASON).into_owned(),
                );
            }
            let response = request.send().await?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS
                || attempt >= RATE_LIMIT_MAX_ATTEMPTS
            {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            let wait = rate_limit_delay(&body, attempt);
            warn!(
                "[GuildClient] Rate limited on {} {}; retrying in {}ms",
                method,
                path,
                wait.as_millis()
            );
            sleep(wait).await;
        }
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(Self::api_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!("[GuildClient] Failed to deserialize response: {}", e);
            GuildClientError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    async fn expect_success(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            Self::log_response(status, "");
            return Ok(());
        }
        let body = response.text().await?;
        Self::log_response(status, &body);
        Err(Self::api_error(status, &body))
    }

    fn api_error(status: StatusCode, body: &str) -> GuildClientError {
        match serde_json::from_str::<ApiErrorResponse>(body) {
            Ok(error) => GuildClientError::api(status.as_u16(), error.message),
            Err(_) => GuildClientError::api(status.as_u16(), format!("Request failed: {}", body)),
        }
    }

    /// GET that maps 404 to `None`.
    async fn get_optional<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = self.send(Method::GET, path).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse_response(response).await.map(Some)
    }

    pub async fn get_guild(&self, guild_id: &str) -> Result<Option<GuildResponse>> {
        self.get_optional(&format!("/guilds/{}", urlencoding::encode(guild_id)))
            .await
    }

    pub async fn get_roles(&self, guild_id: &str) -> Result<Vec<RoleResponse>> {
        Ok(self
            .get_optional(&format!("/guilds/{}/roles", urlencoding::encode(guild_id)))
            .await?
            .unwrap_or_default())
    }

    pub async fn search_guild_members(
        &self,
        guild_id: &str,
        query: &str,
    ) -> Result<Vec<MemberResponse>> {
        let path = format!(
            "/guilds/{}/members/search?query={}&limit={}",
            urlencoding::encode(guild_id),
            urlencoding::encode(query),
            self.member_page_limit
        );
        let response = self.send(Method::GET, &path).await?;
        Self::parse_response(response).await
    }

    /// Pages through the full member list using the `after` cursor.
    pub async fn list_guild_members(&self, guild_id: &str) -> Result<Vec<MemberResponse>> {
        let mut members: Vec<MemberResponse> = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut path = format!(
                "/guilds/{}/members?limit={}",
                urlencoding::encode(guild_id),
                self.member_page_limit
            );
            if let Some(cursor) = after.as_deref() {
                path.push_str(&format!("&after={}", urlencoding::encode(cursor)));
            }

            let response = self.send(Method::GET, &path).await?;
            let page: Vec<MemberResponse> = Self::parse_response(response).await?;
            let page_len = page.len();
            after = page.last().map(|member| member.user.id.clone());
            members.extend(page);

            if page_len < self.member_page_limit as usize || after.is_none() {
                break;
            }
        }

        debug!(
            "[GuildClient] Listed {} members of guild {}",
            members.len(),
            guild_id
        );
        Ok(members)
    }

    fn member_role_path(guild_id: &str, user_id: &str, role_id: &str) -> String {
        format!(
            "/guilds/{}/members/{}/roles/{}",
            urlencoding::encode(guild_id),
            urlencoding::encode(user_id),
            urlencoding::encode(role_id)
        )
    }

    pub async fn add_member_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<()> {
        let path = Self::member_role_path(guild_id, user_id, role_id);
        let response = self.send(Method::PUT, &path).await?;
        Self::expect_success(response).await
    }

    pub async fn remove_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<()> {
        let path = Self::member_role_path(guild_id, user_id, role_id);
        let response = self.send(Method::DELETE, &path).await?;
        Self::expect_success(response).await
    }
}

fn to_member(response: MemberResponse) -> Member {
    Member {
        identity: response.user.identity(),
        user_id: response.user.id,
        role_ids: response.roles,
    }
}

#[async_trait]
impl MemberDirectory for GuildClient {
    async fn fetch_guild(&self, guild_id: &str) -> std::result::Result<Option<Guild>, DirectoryError> {
        Ok(self.get_guild(guild_id).await?.map(|guild| Guild {
            id: guild.id,
            name: guild.name,
        }))
    }

    async fn fetch_role(
        &self,
        guild: &Guild,
        role_id: &str,
    ) -> std::result::Result<Option<GuildRole>, DirectoryError> {
        Ok(self
            .get_roles(&guild.id)
            .await?
            .into_iter()
            .find(|role| role.id == role_id)
            .map(|role| GuildRole {
                id: role.id,
                name: role.name,
            }))
    }

    async fn search_members(
        &self,
        guild: &Guild,
        query: &str,
    ) -> std::result::Result<Vec<Member>, DirectoryError> {
        Ok(self
            .search_guild_members(&guild.id, query)
            .await?
            .into_iter()
            .map(to_member)
            .collect())
    }

    async fn list_members(&self, guild: &Guild) -> std::result::Result<Vec<Member>, DirectoryError> {
        Ok(self
            .list_guild_members(&guild.id)
            .await?
            .into_iter()
            .map(to_member)
            .collect())
    }

    async fn add_role(
        &self,
        guild: &Guild,
        member: &Member,
        role: &GuildRole,
    ) -> std::result::Result<(), DirectoryError> {
        Ok(self
            .add_member_role(&guild.id, &member.user_id, &role.id)
            .await?)
    }

    async fn remove_role(
        &self,
        guild: &Guild,
        member: &Member,
        role: &GuildRole,
    ) -> std::result::Result<(), DirectoryError> {
        Ok(self
            .remove_member_role(&guild.id, &member.user_id, &role.id)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: String,
        target: String,
        authorization: Option<String>,
        audit_reason: Option<String>,
    }

    #[derive(Debug, Clone)]
    struct MockResponse {
        status: u16,
        body: String,
    }

    fn respond(status: u16, body: &str) -> MockResponse {
        MockResponse {
            status,
            body: body.to_string(),
        }
    }

    fn member_json(id: &str, username: &str, discriminator: &str, roles: &[&str]) -> String {
        let roles = roles
            .iter()
            .map(|role| format!("\"{}\"", role))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            r#"{{"user":{{"id":"{}","username":"{}","discriminator":"{}","global_name":null}},"roles":[{}],"nick":null}}"#,
            id, username, discriminator, roles
        )
    }

    fn header_end_offset(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    async fn read_http_request(
        stream: &mut tokio::net::TcpStream,
    ) -> Option<(String, String, HashMap<String, String>)> {
        let mut buffer = Vec::new();
        loop {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if header_end_offset(&buffer).is_some() {
                break;
            }
        }

        let header_end = header_end_offset(&buffer)?;
        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.lines();
        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let target = request_line.next()?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }
        Some((method, target, headers))
    }

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            204 => "No Content",
            403 => "Forbidden",
            404 => "Not Found",
            429 => "Too Many Requests",
            _ => "Error",
        }
    }

    async fn write_http_response(
        stream: &mut tokio::net::TcpStream,
        status: u16,
        body: &str,
    ) -> std::io::Result<()> {
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            status_text(status),
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await
    }

    async fn start_mock_server(
        script: Vec<MockResponse>,
    ) -> (GuildClient, Arc<TokioMutex<Vec<CapturedRequest>>>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(script)));
        let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let captured_clone = Arc::clone(&captured);

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let Some((method, target, headers)) = read_http_request(&mut stream).await else {
                    continue;
                };
                captured_clone.lock().await.push(CapturedRequest {
                    method,
                    target,
                    authorization: headers.get("authorization").cloned(),
                    audit_reason: headers.get("x-audit-log-reason").cloned(),
                });
                let response = scripted
                    .lock()
                    .await
                    .pop_front()
                    .unwrap_or_else(|| respond(500, r#"{"message":"unexpected request","code":0}"#));
                let _ = write_http_response(&mut stream, response.status, &response.body).await;
            }
        });

        let client = GuildClient::new(GuildClientConfig {
            base_url: format!("http://{}/api/v10/", addr),
            bot_token: "bot-token".to_string(),
        })
        .expect("build client");
        (client, captured)
    }

    fn guild() -> Guild {
        Guild {
            id: "100".to_string(),
            name: "Club".to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_guild_is_none() {
        let (client, captured) =
            start_mock_server(vec![respond(404, r#"{"message":"Unknown Guild","code":10004}"#)])
                .await;

        let guild = client.fetch_guild("100").await.expect("lookup");

        assert_eq!(guild, None);
        let requests = captured.lock().await;
        assert_eq!(requests[0].target, "/api/v10/guilds/100");
        assert_eq!(requests[0].authorization.as_deref(), Some("Bot bot-token"));
    }

    #[tokio::test]
    async fn fetch_role_picks_the_bound_role() {
        let (client, _captured) = start_mock_server(vec![
            respond(
                200,
                r#"[{"id":"1","name":"@everyone","position":0},{"id":"7","name":"Member","position":2}]"#,
            ),
            respond(200, r#"[{"id":"1","name":"@everyone","position":0}]"#),
        ])
        .await;

        let role = client.fetch_role(&guild(), "7").await.expect("lookup");
        let missing = client.fetch_role(&guild(), "7").await.expect("lookup");

        assert_eq!(
            role,
            Some(GuildRole {
                id: "7".to_string(),
                name: "Member".to_string()
            })
        );
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn search_maps_legacy_and_modern_identities() {
        let body = format!(
            "[{},{}]",
            member_json("1", "bob", "0", &["7"]),
            member_json("2", "Bobby", "0420", &[])
        );
        let (client, captured) = start_mock_server(vec![respond(200, &body)]).await;

        let members = client.search_members(&guild(), "bob").await.expect("search");

        assert_eq!(members.len(), 2);
        assert_eq!(members[0].identity, "bob");
        assert!(members[0].has_role("7"));
        assert_eq!(members[1].identity, "Bobby#0420");
        assert_eq!(
            captured.lock().await[0].target,
            "/api/v10/guilds/100/members/search?query=bob&limit=1000"
        );
    }

    #[tokio::test]
    async fn list_members_follows_after_cursor() {
        let (client, captured) = start_mock_server(vec![
            respond(
                200,
                &format!(
                    "[{},{}]",
                    member_json("11", "a", "0", &[]),
                    member_json("12", "b", "0", &[])
                ),
            ),
            respond(200, &format!("[{}]", member_json("13", "c", "0", &[]))),
        ])
        .await;
        let client = client.with_member_page_limit(2);

        let members = client.list_members(&guild()).await.expect("list");

        assert_eq!(
            members.iter().map(|m| m.identity.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        let requests = captured.lock().await;
        assert_eq!(requests[0].target, "/api/v10/guilds/100/members?limit=2");
        assert_eq!(
            requests[1].target,
            "/api/v10/guilds/100/members?limit=2&after=12"
        );
    }

    #[tokio::test]
    async fn role_writes_use_put_and_delete() {
        let (client, captured) =
            start_mock_server(vec![respond(204, ""), respond(204, "")]).await;
        let member = Member {
            user_id: "55".to_string(),
            identity: "bob".to_string(),
            role_ids: Vec::new(),
        };
        let role = GuildRole {
            id: "7".to_string(),
            name: "Member".to_string(),
        };

        client.add_role(&guild(), &member, &role).await.expect("add");
        client
            .remove_role(&guild(), &member, &role)
            .await
            .expect("remove");

        let requests = captured.lock().await;
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[1].method, "DELETE");
        assert!(requests
            .iter()
            .all(|r| r.target == "/api/v10/guilds/100/members/55/roles/7"));
        assert_eq!(
            requests[0].audit_reason.as_deref(),
            Some("Membership%20table%20sync")
        );
    }

    #[tokio::test]
    async fn rate_limited_request_is_retried() {
        let (client, captured) = start_mock_server(vec![
            respond(
                429,
                r#"{"message":"You are being rate limited.","retry_after":0.01,"global":false}"#,
            ),
            respond(204, ""),
        ])
        .await;

        client
            .add_member_role("100", "55", "7")
            .await
            .expect("retried add");

        assert_eq!(captured.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn forbidden_write_surfaces_status() {
        let (client, _captured) = start_mock_server(vec![respond(
            403,
            r#"{"message":"Missing Permissions","code":50013}"#,
        )])
        .await;
        let member = Member {
            user_id: "55".to_string(),
            identity: "bob".to_string(),
            role_ids: vec!["7".to_string()],
        };
        let role = GuildRole {
            id: "7".to_string(),
            name: "Member".to_string(),
        };

        let err = client
            .remove_role(&guild(), &member, &role)
            .await
            .expect_err("forbidden");

        assert_eq!(err, DirectoryError::api(403, "Missing Permissions"));
    }

    #[test]
    fn rate_limit_delay_honours_retry_after_and_caps() {
        let short = rate_limit_delay(r#"{"retry_after":0.2,"global":false}"#, 1);
        assert!(short >= Duration::from_millis(200));
        assert!(short <= Duration::from_millis(240));

        let capped = rate_limit_delay(r#"{"retry_after":3600,"global":true}"#, 1);
        assert_eq!(capped, Duration::from_millis(RATE_LIMIT_MAX_WAIT_MS));
    }
}
