// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

//! Blocking REST binding of the table's data and grouping services.

use anyhow::{Context, Result, anyhow, bail};
use mesa_app::{
    DataPage, DataQuery, DataService, GroupOption, GroupService, GroupValue, SubGroupLookup,
};
use reqwest::StatusCode;
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    entity: String,
    token: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupRequest<'a> {
    filters: &'a BTreeMap<String, Value>,
    search_term: &'a str,
}

impl Client {
    pub fn new(base_url: &str, entity: &str, timeout: Duration) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            bail!("server.base_url must not be empty");
        }
        if entity.trim().is_empty() {
            bail!("server.entity must not be empty -- set it to the API resource name, e.g. \"rechazos\"");
        }
        let base_url = Url::parse(trimmed)
            .with_context(|| format!("server.base_url {trimmed:?} is not a valid URL"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            bail!(
                "server.base_url must use http or https, got {:?}",
                base_url.scheme()
            );
        }
        if base_url.cannot_be_a_base() {
            bail!("server.base_url {trimmed:?} cannot be used as a base URL");
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url,
            entity: entity.trim().to_owned(),
            token: None,
            timeout,
            http,
        })
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|token| !token.trim().is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| anyhow!("server.base_url cannot carry a path"))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = self
            .authorized(request)
            .send()
            .map_err(|error| connection_error(self.base_url(), error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(status, &body)).context(what.to_owned());
        }
        response.json().with_context(|| format!("decode {what}"))
    }

    /// Checks that the server answers for the configured entity.
    pub fn ping(&self) -> Result<()> {
        let query = DataQuery {
            filters: BTreeMap::new(),
            search_term: String::new(),
            page: 1,
            page_size: 1,
            sort_column: None,
            sort_direction: None,
            group_by: None,
        };
        self.get_data(&query).map(|_| ())
    }
}

impl DataService for Client {
    fn get_data(&self, query: &DataQuery) -> Result<DataPage> {
        let url = self.endpoint(&[self.entity.as_str(), "query"])?;
        log::debug!(
            "POST {url} page={} size={} group_by={:?}",
            query.page,
            query.page_size,
            query.group_by
        );
        self.send(
            self.http.post(url).json(query),
            &format!("{} page {}", self.entity, query.page),
        )
    }
}

impl GroupService for Client {
    fn group_options(&self, component_id: &str) -> Result<Vec<GroupOption>> {
        let url = self.endpoint(&["group-by", "options", component_id])?;
        log::debug!("GET {url}");
        self.send(
            self.http.get(url),
            &format!("grouping options for {component_id}"),
        )
    }

    fn group_values(
        &self,
        endpoint: &str,
        filters: &BTreeMap<String, Value>,
        search_term: &str,
    ) -> Result<Vec<GroupValue>> {
        if endpoint.trim().is_empty() {
            bail!("grouping option has no endpoint -- add one to the option definition");
        }
        let url = self.endpoint(&["group-by", endpoint, "values"])?;
        log::debug!("POST {url}");
        let body = GroupRequest {
            filters,
            search_term,
        };
        self.send(
            self.http.post(url).json(&body),
            &format!("group values from {endpoint}"),
        )
    }

    fn sub_groups(
        &self,
        lookup: SubGroupLookup,
        parent_id: &str,
        filters: &BTreeMap<String, Value>,
        search_term: &str,
    ) -> Result<Vec<GroupValue>> {
        let url = self.endpoint(&["group-by", lookup.path(), parent_id])?;
        log::debug!("POST {url}");
        let body = GroupRequest {
            filters,
            search_term,
        };
        self.send(
            self.http.post(url).json(&body),
            &format!("{} for {parent_id}", lookup.path()),
        )
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

fn connection_error(base_url: &str, error: reqwest::Error) -> anyhow::Error {
    anyhow!(
        "cannot reach {} -- check server.base_url in the config and that the API is running ({})",
        base_url,
        error
    )
}

fn clean_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(body)
        && let Some(message) = parsed
            .message
            .as_ref()
            .and_then(message_text)
            .or_else(|| parsed.error.as_ref().and_then(message_text))
    {
        return anyhow!("server error ({}): {}", status.as_u16(), message);
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return anyhow!(
            "server rejected the request ({}) -- check server.token in the config",
            status.as_u16()
        );
    }

    let body = body.trim();
    if !body.is_empty() && body.len() < 100 && !body.contains('{') {
        return anyhow!("server error ({}): {}", status.as_u16(), body);
    }

    anyhow!("server returned {}", status.as_u16())
}

/// Error bodies carry either a string or a list of strings (validation
/// errors) under `message`, or an object with its own `message` under
/// `error`.
fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        Value::Array(items) => {
            let parts: Vec<_> = items.iter().filter_map(message_text).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        Value::Object(map) => map.get("message").and_then(message_text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Client, clean_error_response};
    use reqwest::StatusCode;
    use std::time::Duration;

    #[test]
    fn rejects_empty_and_non_http_base_urls() {
        let error = Client::new("  ", "rechazos", Duration::from_secs(1))
            .expect_err("empty base url should fail");
        assert!(error.to_string().contains("server.base_url"));

        let error = Client::new("ftp://example.com", "rechazos", Duration::from_secs(1))
            .expect_err("ftp should fail");
        assert!(error.to_string().contains("http or https"));

        let error = Client::new("http://localhost:3000", "", Duration::from_secs(1))
            .expect_err("empty entity should fail");
        assert!(error.to_string().contains("server.entity"));
    }

    #[test]
    fn endpoint_encodes_segments_and_keeps_base_path() {
        let client = Client::new("http://localhost:3000/api/", "rechazos", Duration::from_secs(1))
            .expect("client should initialize");
        assert_eq!(client.base_url(), "http://localhost:3000/api");

        let url = client
            .endpoint(&["group-by", "team-agents", "7 8"])
            .expect("endpoint");
        assert_eq!(
            url.as_str(),
            "http://localhost:3000/api/group-by/team-agents/7%208"
        );
    }

    #[test]
    fn error_bodies_are_condensed() {
        let nest = clean_error_response(
            StatusCode::BAD_REQUEST,
            r#"{"statusCode":400,"message":["page must be positive","pageSize too large"]}"#,
        );
        assert_eq!(
            nest.to_string(),
            "server error (400): page must be positive; pageSize too large"
        );

        let wrapped = clean_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":{"message":"database offline"}}"#,
        );
        assert_eq!(wrapped.to_string(), "server error (500): database offline");

        let plain = clean_error_response(StatusCode::BAD_GATEWAY, "upstream timeout");
        assert_eq!(plain.to_string(), "server error (502): upstream timeout");

        let auth = clean_error_response(StatusCode::UNAUTHORIZED, "");
        assert!(auth.to_string().contains("server.token"));

        let opaque = clean_error_response(StatusCode::SERVICE_UNAVAILABLE, "<html>{}</html>");
        assert_eq!(opaque.to_string(), "server returned 503");
    }
}
