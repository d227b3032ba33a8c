use crate::constants::MAX_DATAGRAM_SIZE;
use crate::core::hash::ContentHash;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// Correlates a response with the query call that asked for it.
pub type QueryId = Uuid;

///
/// Asks a peer whether it stores the content with the given hash.
///
/// `queryId` is optional on the wire, peers that omit it are still understood.
///
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub file_hash: ContentHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<QueryId>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileQueryResponse {
    pub file_hash: ContentHash,
    pub exists: bool,
    /// Echo of the query's id, if it carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<QueryId>,
}

///
/// Any datagram of the existence protocol.
///
/// Untagged, the shape decides the kind. `Response` is listed first because a response is a
/// query plus the `exists` field.
///
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(untagged)]
pub enum ExistenceMessage {
    Response(FileQueryResponse),
    Query(FileQuery),
}

impl FileQuery {
    pub fn new(file_hash: ContentHash) -> Self {
        FileQuery {
            file_hash,
            query_id: Some(Uuid::new_v4()),
        }
    }

    pub fn answer(&self, exists: bool) -> FileQueryResponse {
        FileQueryResponse {
            file_hash: self.file_hash,
            exists,
            query_id: self.query_id,
        }
    }
}

impl ExistenceMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            bail!("Message of {} bytes does not fit a datagram", bytes.len());
        }
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<FileQuery> for ExistenceMessage {
    fn from(query: FileQuery) -> Self {
        ExistenceMessage::Query(query)
    }
}

impl From<FileQueryResponse> for ExistenceMessage {
    fn from(response: FileQueryResponse) -> Self {
        ExistenceMessage::Response(response)
    }
}

fn fmt_query_id(query_id: &Option<QueryId>) -> String {
    query_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string())
}

impl Display for ExistenceMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExistenceMessage::Query(query) => write!(
                f,
                "FileQuery({}) [{}]",
                query.file_hash,
                fmt_query_id(&query.query_id)
            ),
            ExistenceMessage::Response(response) => write!(
                f,
                "FileQueryResponse({}, exists={}) [{}]",
                response.file_hash,
                response.exists,
                fmt_query_id(&response.query_id)
            ),
        }
    }
}
