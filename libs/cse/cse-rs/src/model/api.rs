use std::collections::BTreeMap;
use std::fmt::Debug;

use http::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const E2EE_BASE: &str = "/ocs/v2.php/apps/end_to_end_encryption/api/v1";

/// Opaque server-issued lock handle. Holding one means holding the folder's
/// exclusive metadata lock.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderToken(pub String);

pub trait Request: Serialize + 'static {
    type Response: Debug + DeserializeOwned + Clone;
    type Error: Debug + DeserializeOwned + Clone;
    const METHOD: Method;
    fn route(&self) -> String;

    /// Endpoint-specific meaning of a status code, if any. Everything else
    /// is passed through verbatim as a generic network error.
    fn error_from_status(_status: u16) -> Option<Self::Error> {
        None
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OcsDocument<T> {
    pub ocs: OcsData<T>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OcsData<T> {
    pub data: T,
}

/// Directory listing on a folder path requesting the `fileid` property.
/// Metadata endpoints key by numeric folder id, so paths have to be
/// resolved first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ListFolderRequest {
    pub path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ListFolderResponse {
    #[serde(rename = "fileid")]
    pub file_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ListFolderError {
    FolderNotFound,
}

impl Request for ListFolderRequest {
    type Response = OcsDocument<ListFolderResponse>;
    type Error = ListFolderError;
    const METHOD: Method = Method::GET;

    fn route(&self) -> String {
        format!("{E2EE_BASE}/folder-id?path={}", self.path)
    }

    fn error_from_status(status: u16) -> Option<Self::Error> {
        (status == 404).then_some(ListFolderError::FolderNotFound)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GetMetadataRequest {
    pub folder_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MetadataEnvelope {
    #[serde(rename = "meta-data")]
    pub meta_data: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum GetMetadataError {
    /// A folder that was never encrypted before has no metadata; callers
    /// may treat this as a valid empty folder.
    NotFound,
}

impl Request for GetMetadataRequest {
    type Response = OcsDocument<MetadataEnvelope>;
    type Error = GetMetadataError;
    const METHOD: Method = Method::GET;

    fn route(&self) -> String {
        format!("{E2EE_BASE}/meta-data/{}", self.folder_id)
    }

    fn error_from_status(status: u16) -> Option<Self::Error> {
        (status == 404).then_some(GetMetadataError::NotFound)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LockFolderRequest {
    pub folder_id: String,
    /// V2.0 optimistic concurrency: the counter the next upload will carry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LockFolderResponse {
    #[serde(rename = "e2e-token")]
    pub e2e_token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum LockFolderError {
    /// Another client holds the folder; wait out the server lock timeout.
    FolderLocked,
}

impl Request for LockFolderRequest {
    type Response = OcsDocument<LockFolderResponse>;
    type Error = LockFolderError;
    const METHOD: Method = Method::POST;

    fn route(&self) -> String {
        format!("{E2EE_BASE}/lock/{}", self.folder_id)
    }

    fn error_from_status(status: u16) -> Option<Self::Error> {
        (status == 423 || status == 409).then_some(LockFolderError::FolderLocked)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UnlockFolderRequest {
    pub folder_id: String,
    #[serde(rename = "token")]
    pub token: FolderToken,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum UnlockFolderError {
    WrongToken,
}

impl Request for UnlockFolderRequest {
    type Response = OcsDocument<serde_json::Value>;
    type Error = UnlockFolderError;
    const METHOD: Method = Method::POST;

    fn route(&self) -> String {
        format!("{E2EE_BASE}/unlock/{}", self.folder_id)
    }

    fn error_from_status(status: u16) -> Option<Self::Error> {
        (status == 403).then_some(UnlockFolderError::WrongToken)
    }
}

/// First write of a folder's metadata (the original fetch 404'd).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoreMetadataRequest {
    pub folder_id: String,
    #[serde(rename = "token")]
    pub token: FolderToken,
    #[serde(rename = "metaData")]
    pub meta_data: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum StoreMetadataError {
    MetadataExists,
}

impl Request for StoreMetadataRequest {
    type Response = OcsDocument<serde_json::Value>;
    type Error = StoreMetadataError;
    const METHOD: Method = Method::POST;

    fn route(&self) -> String {
        format!("{E2EE_BASE}/meta-data/{}", self.folder_id)
    }

    fn error_from_status(status: u16) -> Option<Self::Error> {
        (status == 409).then_some(StoreMetadataError::MetadataExists)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UpdateMetadataRequest {
    pub folder_id: String,
    #[serde(rename = "token")]
    pub token: FolderToken,
    #[serde(rename = "metaData")]
    pub meta_data: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum UpdateMetadataError {
    TokenMismatch,
}

impl Request for UpdateMetadataRequest {
    type Response = OcsDocument<serde_json::Value>;
    type Error = UpdateMetadataError;
    const METHOD: Method = Method::PUT;

    fn route(&self) -> String {
        format!("{E2EE_BASE}/meta-data/{}", self.folder_id)
    }

    fn error_from_status(status: u16) -> Option<Self::Error> {
        (status == 403).then_some(UpdateMetadataError::TokenMismatch)
    }
}

/// Certificate lookup for prospective folder users, keyed by user id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GetCertificatesRequest {
    pub users: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GetCertificatesResponse {
    #[serde(rename = "public-keys")]
    pub certificates: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum GetCertificatesError {
    UserNotFound(String),
}

impl Request for GetCertificatesRequest {
    type Response = OcsDocument<GetCertificatesResponse>;
    type Error = GetCertificatesError;
    const METHOD: Method = Method::POST;

    fn route(&self) -> String {
        format!("{E2EE_BASE}/public-keys")
    }
}

/// Marks a plain folder as encrypted server-side, the first step of
/// encrypting an existing folder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SetEncryptionFlagRequest {
    pub folder_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum SetEncryptionFlagError {
    NotPermitted,
}

impl Request for SetEncryptionFlagRequest {
    type Response = OcsDocument<serde_json::Value>;
    type Error = SetEncryptionFlagError;
    const METHOD: Method = Method::PUT;

    fn route(&self) -> String {
        format!("{E2EE_BASE}/encrypted/{}", self.folder_id)
    }

    fn error_from_status(status: u16) -> Option<Self::Error> {
        (status == 403).then_some(SetEncryptionFlagError::NotPermitted)
    }
}
