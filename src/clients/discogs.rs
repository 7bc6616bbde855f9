//! OAuth1 HMAC-SHA1 signed Discogs client (spec §4.4.1, §6).

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Client;
use serde::Deserialize;
use sha1::Sha1;

use crate::error::{AppError, Result};
use crate::rate_limit::RateLimiter;

use super::USER_AGENT;

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 unreserved set is letters/digits/`-_.~`; everything else,
/// including `!*'()`, must be percent-encoded for OAuth1 base-string building.
const OAUTH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'!')
    .add(b'"')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

pub fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, OAUTH_ENCODE_SET).to_string()
}

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: Option<String>,
    pub token_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct FoldersResponse {
    pub folders: Vec<Folder>,
}

#[derive(Debug, Deserialize)]
pub struct ReleasesPage {
    pub releases: Vec<FolderRelease>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub page: i32,
    pub pages: i32,
    pub per_page: i32,
    pub items: i32,
}

#[derive(Debug, Deserialize)]
pub struct FolderRelease {
    pub id: i64,
    pub instance_id: i64,
    pub folder_id: i64,
    pub basic_information: BasicInformation,
}

#[derive(Debug, Deserialize)]
pub struct BasicInformation {
    pub title: String,
    pub year: Option<i32>,
    pub artists: Vec<DiscogsArtist>,
    pub labels: Option<Vec<DiscogsLabel>>,
    pub genres: Option<Vec<String>>,
    pub master_id: Option<i64>,
    pub cover_image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DiscogsArtist {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct DiscogsLabel {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct Release {
    pub id: i64,
    pub title: String,
    pub year: Option<i32>,
    pub country: Option<String>,
    pub released: Option<String>,
    pub master_id: Option<i64>,
    pub artists: Vec<DiscogsArtist>,
    pub labels: Option<Vec<DiscogsLabel>>,
    pub genres: Option<Vec<String>>,
    pub tracklist: Vec<DiscogsTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscogsTrack {
    pub position: String,
    pub title: String,
    pub duration: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Master {
    pub id: i64,
    pub main_release: i64,
}

#[derive(Debug, Deserialize)]
pub struct MasterReleasesPage {
    pub versions: Vec<MasterVersion>,
}

#[derive(Debug, Deserialize)]
pub struct MasterVersion {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
pub struct SearchResult {
    pub id: i64,
    pub title: String,
}

const API_BASE: &str = "https://api.discogs.com";

pub struct DiscogsClient {
    http: Client,
    credentials: OAuthCredentials,
    auth_limiter: RateLimiter,
    anon_limiter: RateLimiter,
}

impl DiscogsClient {
    pub fn new(credentials: OAuthCredentials, auth_limiter: RateLimiter, anon_limiter: RateLimiter) -> Self {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .expect("failed to build discogs http client");
        Self {
            http,
            credentials,
            auth_limiter,
            anon_limiter,
        }
    }

    fn is_authenticated(&self) -> bool {
        self.credentials.token.is_some()
    }

    /// Build the `Authorization: OAuth ...` header for one request.
    fn sign(&self, method: &str, url: &str, extra_params: &[(&str, String)]) -> String {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();

        let mut params: BTreeMap<String, String> = BTreeMap::new();
        params.insert("oauth_consumer_key".into(), self.credentials.consumer_key.clone());
        params.insert("oauth_nonce".into(), nonce.clone());
        params.insert("oauth_signature_method".into(), "HMAC-SHA1".into());
        params.insert("oauth_timestamp".into(), timestamp.clone());
        params.insert("oauth_version".into(), "1.0".into());
        if let Some(token) = &self.credentials.token {
            params.insert("oauth_token".into(), token.clone());
        }
        for (k, v) in extra_params {
            params.insert((*k).to_string(), v.clone());
        }

        let param_string = params
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let base_string = format!(
            "{}&{}&{}",
            method.to_uppercase(),
            percent_encode(url),
            percent_encode(&param_string)
        );

        let signing_key = format!(
            "{}&{}",
            percent_encode(&self.credentials.consumer_secret),
            percent_encode(self.credentials.token_secret.as_deref().unwrap_or(""))
        );

        let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes()).expect("hmac accepts any key length");
        mac.update(base_string.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        let mut header_params = params.clone();
        header_params.insert("oauth_signature".into(), signature);

        let header_body = header_params
            .iter()
            .filter(|(k, _)| k.starts_with("oauth_"))
            .map(|(k, v)| format!("{}=\"{}\"", k, percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");

        format!("OAuth {header_body}")
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{API_BASE}{path}");
        let is_auth = self.is_authenticated();
        let limiter = if is_auth { &self.auth_limiter } else { &self.anon_limiter };

        limiter
            .check(is_auth)
            .await
            .map_err(|e| AppError::RateLimited { retry_after_s: e.retry_after_s })?;

        let auth_header = self.sign("GET", &url, query);

        let response = self
            .http
            .get(&url)
            .query(query)
            .header("Authorization", auth_header)
            .send()
            .await?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            let err = limiter.on_http_429(retry_after).await;
            return Err(AppError::RateLimited { retry_after_s: err.retry_after_s });
        }

        limiter.update_from_headers(response.headers(), "discogs").await;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderHttp { status, body });
        }

        limiter.decrement(is_auth).await;

        Ok(response.json::<T>().await?)
    }

    pub async fn folders(&self, username: &str) -> Result<Vec<Folder>> {
        let path = format!("/users/{username}/collection/folders");
        let resp: FoldersResponse = self.get(&path, &[]).await?;
        Ok(resp.folders)
    }

    pub async fn folder_releases(
        &self,
        username: &str,
        folder_id: i64,
        page: i32,
        per_page: i32,
    ) -> Result<ReleasesPage> {
        let path = format!("/users/{username}/collection/folders/{folder_id}/releases");
        self.get(
            &path,
            &[("page", page.to_string()), ("per_page", per_page.to_string())],
        )
        .await
    }

    pub async fn release(&self, release_id: i64) -> Result<Release> {
        let path = format!("/releases/{release_id}");
        self.get(&path, &[]).await
    }

    pub async fn master(&self, master_id: i64) -> Result<Master> {
        let path = format!("/masters/{master_id}");
        self.get(&path, &[]).await
    }

    pub async fn master_releases(&self, master_id: i64) -> Result<Vec<MasterVersion>> {
        let path = format!("/masters/{master_id}/releases");
        let resp: MasterReleasesPage = self.get(&path, &[]).await?;
        Ok(resp.versions)
    }

    pub async fn search_releases(&self, query: &str, page: i32) -> Result<SearchResponse> {
        self.get(
            "/database/search",
            &[
                ("q", query.to_string()),
                ("type", "release".to_string()),
                ("page", page.to_string()),
                ("per_page", "12".to_string()),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DiscogsClient {
        DiscogsClient::new(
            OAuthCredentials {
                consumer_key: "key".into(),
                consumer_secret: "secret".into(),
                token: None,
                token_secret: None,
            },
            RateLimiter::new(crate::rate_limit::RateLimiterConfig::default()),
            RateLimiter::new(crate::rate_limit::RateLimiterConfig::default()),
        )
    }

    #[test]
    fn test_percent_encode_reserved_chars() {
        // RFC 3986 reserved `!*'()` must be encoded, unlike the default URL
        // component encoder which leaves them alone.
        assert_eq!(percent_encode("!*'()"), "%21%2A%27%28%29");
    }

    #[test]
    fn test_percent_encode_unreserved_untouched() {
        assert_eq!(percent_encode("abc-._~123"), "abc-._~123");
    }

    #[test]
    fn test_sign_produces_oauth_header_with_signature() {
        let client = client();
        let header = client.sign("GET", "https://api.discogs.com/oauth/identity", &[]);
        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_signature="));
        assert!(header.contains("oauth_consumer_key=\"key\""));
    }

    #[test]
    fn test_sign_includes_extra_params_in_base_string_via_signature_change() {
        let client = client();
        let without = client.sign("GET", "https://api.discogs.com/database/search", &[]);
        let with = client.sign(
            "GET",
            "https://api.discogs.com/database/search",
            &[("q", "abbey road".to_string())],
        );
        assert_ne!(without, with);
    }
}
