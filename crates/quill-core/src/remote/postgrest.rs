//! PostgREST-backed implementation of [`RemoteService`].
//!
//! Targets a Supabase-style REST endpoint: row filters are query parameters
//! (`updated_at=gt.<ts>`, `order=updated_at.asc`), the conditional note
//! update is a `PATCH` filtered on `id` and `version`, and upserts are
//! `POST` with `resolution=merge-duplicates`. `version` and `updated_at`
//! are server-assigned; writes request `return=representation` and adopt
//! what comes back.

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::models::OwnerId;
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::{AttachmentRow, NotebookRow, NoteRow, RemoteService};

const TABLE_NOTEBOOKS: &str = "notebooks";
const TABLE_NOTES: &str = "notes";
const TABLE_ATTACHMENTS: &str = "attachments";

/// HTTP client for the three remote row collections.
pub struct PostgrestRemote {
    base_url: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
    client: reqwest::Client,
}

impl PostgrestRemote {
    /// Build a client for an explicit project base URL and public API key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(Error::InvalidInput(
                "Remote API key must not be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::Transport(format!("Failed to build HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            api_key,
            access_token: RwLock::new(None),
            client,
        })
    }

    /// Install the current access token; subsequent requests use it.
    pub fn set_access_token(&self, token: impl Into<String>) {
        let token = token.into();
        if let Ok(mut slot) = self.access_token.write() {
            *slot = normalize_text_option(Some(token));
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("apikey", &self.api_key);
        let token = self
            .access_token
            .read()
            .ok()
            .and_then(|slot| slot.clone());
        match token {
            Some(token) => request.bearer_auth(token),
            None => request.bearer_auth(&self.api_key),
        }
    }

    async fn select_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        owner: &OwnerId,
        since: Option<i64>,
    ) -> Result<Vec<T>> {
        let mut query: Vec<(String, String)> = vec![
            ("owner_id".to_string(), format!("eq.{}", owner.as_str())),
            ("order".to_string(), "updated_at.asc".to_string()),
        ];
        if let Some(since) = since {
            query.push(("updated_at".to_string(), format!("gt.{since}")));
        }

        let request = self
            .authed(self.client.get(self.table_url(table)))
            .query(&query)
            .header("Accept", "application/json");
        let response = request
            .send()
            .await
            .map_err(|error| Error::Transport(format!("{table} select failed: {error}")))?;
        read_rows(table, response).await
    }

    async fn upsert_row<T: DeserializeOwned>(
        &self,
        table: &str,
        payload: &serde_json::Value,
    ) -> Result<T> {
        let request = self
            .authed(self.client.post(self.table_url(table)))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(payload);
        let response = request
            .send()
            .await
            .map_err(|error| Error::Transport(format!("{table} upsert failed: {error}")))?;
        let mut rows: Vec<T> = read_rows(table, response).await?;
        rows.pop().ok_or_else(|| {
            Error::Transport(format!("{table} upsert returned no representation"))
        })
    }
}

impl RemoteService for PostgrestRemote {
    async fn select_notebooks(
        &self,
        owner: &OwnerId,
        since: Option<i64>,
    ) -> Result<Vec<NotebookRow>> {
        self.select_rows(TABLE_NOTEBOOKS, owner, since).await
    }

    async fn select_notes(&self, owner: &OwnerId, since: Option<i64>) -> Result<Vec<NoteRow>> {
        self.select_rows(TABLE_NOTES, owner, since).await
    }

    async fn select_attachments(
        &self,
        owner: &OwnerId,
        since: Option<i64>,
    ) -> Result<Vec<AttachmentRow>> {
        self.select_rows(TABLE_ATTACHMENTS, owner, since).await
    }

    async fn upsert_notebook(&self, row: &NotebookRow) -> Result<NotebookRow> {
        self.upsert_row(TABLE_NOTEBOOKS, &notebook_payload(row)).await
    }

    async fn update_note_where_version(
        &self,
        row: &NoteRow,
        expected_version: i64,
    ) -> Result<Option<NoteRow>> {
        let id = row
            .id
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("note row is missing an id".to_string()))?;

        let request = self
            .authed(self.client.patch(self.table_url(TABLE_NOTES)))
            .query(&[
                ("id", format!("eq.{id}")),
                ("version", format!("eq.{expected_version}")),
            ])
            .header("Prefer", "return=representation")
            .json(&note_payload(row));
        let response = request
            .send()
            .await
            .map_err(|error| Error::Transport(format!("note conditional update failed: {error}")))?;
        let mut rows: Vec<NoteRow> = read_rows(TABLE_NOTES, response).await?;
        Ok(rows.pop())
    }

    async fn fetch_note(&self, owner: &OwnerId, id: &str) -> Result<Option<NoteRow>> {
        let url = format!(
            "{}?owner_id=eq.{}&id=eq.{}",
            self.table_url(TABLE_NOTES),
            urlencoding::encode(owner.as_str()),
            urlencoding::encode(id)
        );
        let request = self
            .authed(self.client.get(url))
            .header("Accept", "application/json");
        let response = request
            .send()
            .await
            .map_err(|error| Error::Transport(format!("note fetch failed: {error}")))?;
        let mut rows: Vec<NoteRow> = read_rows(TABLE_NOTES, response).await?;
        Ok(rows.pop())
    }

    async fn upsert_note(&self, row: &NoteRow) -> Result<NoteRow> {
        self.upsert_row(TABLE_NOTES, &note_payload(row)).await
    }

    async fn upsert_attachment(&self, row: &AttachmentRow) -> Result<AttachmentRow> {
        self.upsert_row(TABLE_ATTACHMENTS, &attachment_payload(row)).await
    }
}

/// Push payload for a notebook; `updated_at` stays server-assigned.
fn notebook_payload(row: &NotebookRow) -> serde_json::Value {
    serde_json::json!({
        "id": row.id,
        "owner_id": row.owner_id,
        "title": row.title,
        "color": row.color,
        "icon": row.icon,
        "deleted_at": row.deleted_at,
    })
}

/// Push payload for a note; `version` and `updated_at` stay server-assigned.
fn note_payload(row: &NoteRow) -> serde_json::Value {
    serde_json::json!({
        "id": row.id,
        "owner_id": row.owner_id,
        "notebook_id": row.notebook_id,
        "title": row.title,
        "summary": row.summary,
        "content": row.content,
        "word_count": row.word_count,
        "char_count": row.char_count,
        "conflict_parent_id": row.conflict_parent_id,
        "deleted_at": row.deleted_at,
    })
}

/// Push payload for attachment metadata; `updated_at` stays server-assigned.
fn attachment_payload(row: &AttachmentRow) -> serde_json::Value {
    serde_json::json!({
        "id": row.id,
        "owner_id": row.owner_id,
        "note_id": row.note_id,
        "storage_path": row.storage_path,
        "file_name": row.file_name,
        "mime_type": row.mime_type,
        "file_size": row.file_size,
        "deleted_at": row.deleted_at,
    })
}

async fn read_rows<T: DeserializeOwned>(table: &str, response: reqwest::Response) -> Result<Vec<T>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_api_error(table, status, &body));
    }
    response
        .json::<Vec<T>>()
        .await
        .map_err(|error| Error::Transport(format!("{table} response parse failed: {error}")))
}

fn map_api_error(table: &str, status: StatusCode, body: &str) -> Error {
    let message = format!("{table}: {}", parse_api_error(status, body));
    match status {
        StatusCode::UNAUTHORIZED => Error::Auth(message),
        StatusCode::FORBIDDEN => Error::Permission(message),
        _ => Error::Transport(message),
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
    details: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.details) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base = raw.trim().trim_end_matches('/').to_string();
    if base.is_empty() {
        return Err(Error::InvalidInput(
            "Remote base URL must not be empty".to_string(),
        ));
    }
    if !is_http_url(&base) {
        return Err(Error::InvalidInput(
            "Remote base URL must include http:// or https://".to_string(),
        ));
    }
    Ok(base)
}
