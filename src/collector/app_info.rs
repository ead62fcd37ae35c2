use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::auth::Authenticator;

/// Fixed page sizes for the directory endpoints. Lookups are single-shot:
/// a GUID batch larger than one page is silently truncated by the directory,
/// and no further pages are requested. Carried forward from the legacy
/// client; report limits keep batches far below these caps in practice.
const V3_PER_PAGE: &str = "5000";
const V2_PER_PAGE: &str = "100";

/// Resolved human-readable names for an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
    pub space: String,
    pub org: String,
}

impl std::fmt::Display for AppInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.org, self.space, self.name)
    }
}

/// Resolves application GUIDs to org/space/app names.
#[async_trait]
pub trait AppInfoStore: Send + Sync {
    async fn lookup(&self, guids: &[String]) -> Result<HashMap<String, AppInfo>>;
}

/// Directory client.
///
/// Resolution takes three calls: apps (with their space GUIDs), then
/// organizations queried by space GUID, then spaces queried by organization
/// GUID. The organizations-by-space step is a legacy idiom of the directory;
/// the join below tolerates the redundant indirection.
pub struct HttpAppInfoStore {
    api_addr: String,
    auth: Arc<Authenticator>,
    client: reqwest::Client,
}

struct App {
    name: String,
    space_guid: String,
}

struct Space {
    name: String,
    org_guid: String,
}

impl HttpAppInfoStore {
    pub fn new(api_addr: &str, auth: Arc<Authenticator>, skip_cert_verify: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .danger_accept_invalid_certs(skip_cert_verify)
            .build()
            .context("failed to build directory client")?;

        Ok(Self {
            api_addr: api_addr.trim_end_matches('/').to_string(),
            auth,
            client,
        })
    }

    async fn lookup_apps(&self, guids: &[String], token: &str) -> Result<HashMap<String, App>> {
        let response = self
            .client
            .get(format!("{}/v3/apps", self.api_addr))
            .query(&[
                ("guids", guids.join(",").as_str()),
                ("per_page", V3_PER_PAGE),
            ])
            .bearer_auth(token)
            .send()
            .await
            .context("apps request failed")?;
        let response = require_ok(response, "apps").await?;

        let body: V3Response = response.json().await.context("invalid apps response")?;

        Ok(body
            .resources
            .into_iter()
            .map(|r| {
                let space_guid = r.relationship_guid("space");
                (r.guid, App { name: r.name, space_guid })
            })
            .collect())
    }

    /// Organization names keyed by organization GUID.
    async fn lookup_orgs(
        &self,
        space_guids: &[String],
        token: &str,
    ) -> Result<HashMap<String, String>> {
        let response = self
            .client
            .get(format!("{}/v2/organizations", self.api_addr))
            .query(&[
                ("q", format!("space_guid IN {}", space_guids.join(",")).as_str()),
                ("results-per-page", V2_PER_PAGE),
            ])
            .bearer_auth(token)
            .send()
            .await
            .context("organizations request failed")?;
        let response = require_ok(response, "organizations").await?;

        let body: V2Response = response
            .json()
            .await
            .context("invalid organizations response")?;

        Ok(body
            .resources
            .into_iter()
            .map(|r| (r.metadata.guid, r.entity.name))
            .collect())
    }

    async fn lookup_spaces(
        &self,
        org_guids: &[String],
        token: &str,
    ) -> Result<HashMap<String, Space>> {
        let response = self
            .client
            .get(format!("{}/v3/spaces", self.api_addr))
            .query(&[
                ("organization_guids", org_guids.join(",").as_str()),
                ("per_page", V3_PER_PAGE),
            ])
            .bearer_auth(token)
            .send()
            .await
            .context("spaces request failed")?;
        let response = require_ok(response, "spaces").await?;

        let body: V3Response = response.json().await.context("invalid spaces response")?;

        Ok(body
            .resources
            .into_iter()
            .map(|r| {
                let org_guid = r.relationship_guid("organization");
                (r.guid, Space { name: r.name, org_guid })
            })
            .collect())
    }
}

#[async_trait]
impl AppInfoStore for HttpAppInfoStore {
    /// All-or-nothing: if any step fails the whole lookup fails, and the
    /// cache layer in front serves what it already has.
    async fn lookup(&self, guids: &[String]) -> Result<HashMap<String, AppInfo>> {
        if guids.is_empty() {
            return Ok(HashMap::new());
        }

        let token = self.auth.refresh_token().await?;

        let apps = self.lookup_apps(guids, &token).await?;
        let space_guids: Vec<String> = apps.values().map(|a| a.space_guid.clone()).collect();

        let orgs = self.lookup_orgs(&space_guids, &token).await?;
        let org_guids: Vec<String> = orgs.keys().cloned().collect();

        let spaces = self.lookup_spaces(&org_guids, &token).await?;

        Ok(apps
            .into_iter()
            .map(|(guid, app)| {
                let space = spaces.get(&app.space_guid);
                let org = space.and_then(|s| orgs.get(&s.org_guid));
                let info = AppInfo {
                    name: app.name,
                    space: space.map(|s| s.name.clone()).unwrap_or_default(),
                    org: org.cloned().unwrap_or_default(),
                };
                (guid, info)
            })
            .collect())
    }
}

async fn require_ok(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        bail!("failed to get {what}, expected 200, got {status}: {body}");
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct V3Response {
    #[serde(default)]
    resources: Vec<V3Resource>,
}

#[derive(Debug, Deserialize)]
struct V3Resource {
    guid: String,
    name: String,
    #[serde(default)]
    relationships: HashMap<String, V3Relationship>,
}

impl V3Resource {
    fn relationship_guid(&self, key: &str) -> String {
        self.relationships
            .get(key)
            .map(|r| r.data.guid.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct V3Relationship {
    data: V3RelationshipData,
}

#[derive(Debug, Default, Deserialize)]
struct V3RelationshipData {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct V2Response {
    #[serde(default)]
    resources: Vec<V2Resource>,
}

#[derive(Debug, Deserialize)]
struct V2Resource {
    metadata: V2Metadata,
    entity: V2Entity,
}

#[derive(Debug, Deserialize)]
struct V2Metadata {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct V2Entity {
    name: String,
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn mount_uaa(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "token-1" })),
            )
            .mount(server)
            .await;
    }

    fn store(server: &MockServer) -> HttpAppInfoStore {
        let auth = Arc::new(Authenticator::new("id", "secret", &server.uri(), false).unwrap());
        HttpAppInfoStore::new(&server.uri(), auth, false).unwrap()
    }

    fn guids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn joins_apps_spaces_and_orgs() {
        let server = MockServer::start().await;
        mount_uaa(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/apps"))
            .and(query_param("guids", "app-1"))
            .and(query_param("per_page", "5000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resources": [{
                    "guid": "app-1",
                    "name": "my-app",
                    "relationships": { "space": { "data": { "guid": "space-1" } } }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/organizations"))
            .and(query_param("q", "space_guid IN space-1"))
            .and(query_param("results-per-page", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resources": [{
                    "metadata": { "guid": "org-1" },
                    "entity": { "name": "my-org" }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v3/spaces"))
            .and(query_param("organization_guids", "org-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resources": [{
                    "guid": "space-1",
                    "name": "my-space",
                    "relationships": { "organization": { "data": { "guid": "org-1" } } }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = store(&server).lookup(&guids(&["app-1"])).await.unwrap();

        assert_eq!(
            result.get("app-1"),
            Some(&AppInfo {
                name: "my-app".to_string(),
                space: "my-space".to_string(),
                org: "my-org".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn any_failed_step_fails_the_lookup() {
        let server = MockServer::start().await;
        mount_uaa(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/apps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resources": [{
                    "guid": "app-1",
                    "name": "my-app",
                    "relationships": { "space": { "data": { "guid": "space-1" } } }
                }]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/organizations"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = store(&server).lookup(&guids(&["app-1"])).await.unwrap_err();
        assert!(err.to_string().contains("organizations"));
    }

    #[tokio::test]
    async fn empty_input_issues_no_requests() {
        let server = MockServer::start().await;

        let result = store(&server).lookup(&[]).await.unwrap();
        assert!(result.is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
