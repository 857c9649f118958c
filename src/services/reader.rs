use std::sync::Arc;
use std::time::Duration;

use reqwest::header::USER_AGENT;
use reqwest::{Client, Response};
use serde::Deserialize;
use url::Url;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::feed::{short_id, Timestamp};
use crate::models::{Flag, ItemRef, SavedView};

use super::auth::{Auth, EditToken};

const USER_AGENT_STRING: &str = concat!("trifle/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct IdsResponse {
    #[serde(rename = "itemRefs", default)]
    item_refs: Vec<RawItemRef>,
}

#[derive(Debug, Deserialize)]
struct RawItemRef {
    id: serde_json::Value,
    #[serde(rename = "timestampUsec")]
    timestamp_usec: Timestamp,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

/// Client for the Google Reader style API.
#[derive(Clone)]
pub struct ReaderClient {
    client: Client,
    base_url: Url,
    auth: Arc<Auth>,
}

impl ReaderClient {
    pub fn new(config: &Config, auth: Auth) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let mut api_url = config.api_url.clone();
        if !api_url.ends_with('/') {
            api_url.push('/');
        }

        Ok(Self {
            client,
            base_url: Url::parse(&api_url)?,
            auth: Arc::new(auth),
        })
    }

    /// Builds an endpoint URL; `output=json` is always appended.
    pub fn api_method(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base_url.join(path)?;
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair("output", "json");
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.auth
            .authorize(self.client.get(url))
            .header(USER_AGENT, USER_AGENT_STRING)
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        self.auth
            .authorize(self.client.post(url))
            .header(USER_AGENT, USER_AGENT_STRING)
    }

    /// Lists up to `limit` item ids of a saved view.
    pub async fn item_ids(&self, view: SavedView, limit: u32) -> Result<Vec<ItemRef>> {
        let limit = limit.to_string();
        let mut params: Vec<(&str, &str)> = view.params().to_vec();
        params.push(("n", limit.as_str()));

        let response = self
            .get(self.api_method("stream/items/ids", &params)?)
            .send()
            .await?;
        let body: IdsResponse = check_status(response)?.json().await?;

        body.item_refs
            .into_iter()
            .map(|raw| {
                let id = ref_id(&raw.id);
                let timestamp_usec = raw.timestamp_usec.as_i64();
                match (id, timestamp_usec) {
                    (Some(id), Some(timestamp_usec)) => Ok(ItemRef { id, timestamp_usec }),
                    _ => Err(anyhow::anyhow!("Unparsable item ref {:?}", raw).into()),
                }
            })
            .collect()
    }

    /// Adds (`remove == false`) or removes `flag` on every item in one request.
    pub async fn edit_tag(&self, item_ids: &[i64], flag: Flag, remove: bool, edit_token: &str) -> Result<()> {
        let mut form: Vec<(&str, String)> = item_ids.iter().map(|id| ("i", id.to_string())).collect();
        form.push((if remove { "r" } else { "a" }, flag.uri().to_string()));
        form.push(("T", edit_token.to_string()));

        let response = self
            .post(self.api_method("edit-tag", &[])?)
            .form(&form)
            .send()
            .await?;
        check_status(response)?;
        Ok(())
    }

    /// Fetches full item records; `form` holds the `("i", id)` pairs.
    pub async fn item_contents(&self, form: &[(String, String)]) -> Result<Vec<serde_json::Value>> {
        let response = self
            .post(self.api_method("stream/items/contents", &[])?)
            .form(form)
            .send()
            .await?;
        let body: ContentsResponse = check_status(response)?.json().await?;
        Ok(body.items)
    }

    /// Returns the cached edit token, fetching a new one when it expired.
    pub async fn edit_token(&self) -> Result<String> {
        let mut cached = self.auth.edit_token.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_valid()) {
            return Ok(token.value.clone());
        }

        let response = self.get(self.api_method("token", &[])?).send().await?;
        let value = check_status(response)?.text().await?.trim().to_string();
        if value.is_empty() {
            return Err(AppError::Auth("empty edit token".to_string()));
        }

        *cached = Some(EditToken::new(value.clone()));
        Ok(value)
    }

    pub async fn invalidate_edit_token(&self) {
        self.auth.invalidate_edit_token().await;
    }
}

/// Ids must fit an `i64` exactly; fractional or out-of-range ids are rejected.
fn ref_id(id: &serde_json::Value) -> Option<i64> {
    match id {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => short_id(s).ok(),
        _ => None,
    }
}

/// Anything in 200..400 counts as success.
fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() || status.is_redirection() {
        Ok(response)
    } else {
        Err(AppError::Api { status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server, auth: Auth) -> ReaderClient {
        let config = Config {
            api_url: format!("{}/reader/api/0", server.url()),
            ..Config::default()
        };
        ReaderClient::new(&config, auth).unwrap()
    }

    #[tokio::test]
    async fn api_method_appends_output_json() {
        let server = mockito::Server::new_async().await;
        let client = client_for(&server, Auth::new("key"));
        let url = client.api_method("stream/items/ids", &[("s", "a/b"), ("n", "5")]).unwrap();
        assert_eq!(url.path(), "/reader/api/0/stream/items/ids");
        assert_eq!(url.query(), Some("s=a%2Fb&n=5&output=json"));
    }

    #[tokio::test]
    async fn item_ids_sends_view_params_and_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/reader/api/0/stream/items/ids")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("s".into(), "user/-/state/com.google/reading-list".into()),
                Matcher::UrlEncoded("xt".into(), "user/-/state/com.google/read".into()),
                Matcher::UrlEncoded("n".into(), "20".into()),
                Matcher::UrlEncoded("output".into(), "json".into()),
            ]))
            .match_header("authorization", "GoogleLogin auth=key")
            .with_status(200)
            .with_body(r#"{"itemRefs":[{"id":"5","timestampUsec":"100"},{"id":"-7","timestampUsec":"200"}]}"#)
            .create_async()
            .await;

        let client = client_for(&server, Auth::new("key"));
        let refs = client.item_ids(SavedView::Unread, 20).await.unwrap();
        mock.assert_async().await;
        assert_eq!(
            refs,
            vec![
                ItemRef { id: 5, timestamp_usec: 100 },
                ItemRef { id: -7, timestamp_usec: 200 },
            ]
        );
    }

    #[test]
    fn ref_ids_are_parsed_strictly() {
        assert_eq!(ref_id(&serde_json::json!("42")), Some(42));
        assert_eq!(ref_id(&serde_json::json!(-7)), Some(-7));
        assert_eq!(ref_id(&serde_json::json!("18446744073709551615")), None);
        assert_eq!(ref_id(&serde_json::json!(18446744073709551615u64)), None);
        assert_eq!(ref_id(&serde_json::json!("4.5")), None);
        assert_eq!(ref_id(&serde_json::json!(4.5)), None);
    }

    #[tokio::test]
    async fn out_of_range_id_fails_the_listing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/reader/api/0/stream/items/ids")
            .match_query(Matcher::Any)
            .with_body(r#"{"itemRefs":[{"id":"18446744073709551615","timestampUsec":"100"}]}"#)
            .create_async()
            .await;

        let client = client_for(&server, Auth::new("key"));
        assert!(client.item_ids(SavedView::ReadingList, 5).await.is_err());
    }

    #[tokio::test]
    async fn http_errors_map_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let client = client_for(&server, Auth::new("key"));
        let err = client.item_ids(SavedView::Starred, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Api { status } if status.as_u16() == 500));
    }

    #[tokio::test]
    async fn edit_token_is_fetched_once_and_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/reader/api/0/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("fresh-token\n")
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server, Auth::new("key"));
        assert_eq!(client.edit_token().await.unwrap(), "fresh-token");
        assert_eq!(client.edit_token().await.unwrap(), "fresh-token");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn edit_tag_posts_ids_flag_and_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/reader/api/0/edit-tag")
            .match_query(Matcher::Any)
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("i=1&i=2".into()),
                Matcher::UrlEncoded("r".into(), "user/-/state/com.google/starred".into()),
                Matcher::UrlEncoded("T".into(), "tok".into()),
            ]))
            .with_status(200)
            .with_body("OK")
            .create_async()
            .await;

        let client = client_for(&server, Auth::new("key"));
        client.edit_tag(&[1, 2], Flag::Starred, true, "tok").await.unwrap();
        mock.assert_async().await;
    }
}
