use std::collections::BTreeMap;

use async_trait::async_trait;
use http::Method;
use reqwest::Client;

use crate::get_code_version;
use crate::model::account::Account;
use crate::model::api::*;
use crate::model::errors::{CseResult, Unexpected};

#[derive(Debug)]
pub enum ApiError<E> {
    Endpoint(E),
    /// Verbatim status + body of a non-2xx the endpoint gave no meaning to.
    Status { status: u16, message: String },
    Serialize(String),
    SendFailed(String),
    ReceiveFailed(String),
    Deserialize(String),
}

#[derive(Debug, Clone)]
pub struct Network {
    pub client: Client,
    pub get_code_version: fn() -> &'static str,
}

impl Default for Network {
    fn default() -> Self {
        Self { client: Default::default(), get_code_version }
    }
}

impl Network {
    pub(crate) async fn request<T: Request>(
        &self, account: &Account, request: T,
    ) -> Result<T::Response, ApiError<T::Error>> {
        let client_version = String::from((self.get_code_version)());

        let mut builder = self
            .client
            .request(T::METHOD, format!("{}{}", account.api_url, request.route()).as_str())
            .header("Accept-Version", client_version)
            .header("OCS-APIREQUEST", "true");
        if T::METHOD != Method::GET {
            let serialized_request = serde_json::to_vec(&request)
                .map_err(|err| ApiError::Serialize(err.to_string()))?;
            builder = builder
                .header("Content-Type", "application/json")
                .body(serialized_request);
        }

        let response = builder.send().await.map_err(|err| {
            warn!("Send failed: {:#?}", err);
            ApiError::SendFailed(err.to_string())
        })?;
        let status = response.status().as_u16();
        let serialized_response = response
            .bytes()
            .await
            .map_err(|err| ApiError::ReceiveFailed(err.to_string()))?;

        if !(200..300).contains(&status) {
            if let Some(endpoint_error) = T::error_from_status(status) {
                return Err(ApiError::Endpoint(endpoint_error));
            }
            return Err(ApiError::Status {
                status,
                message: String::from_utf8_lossy(&serialized_response).into_owned(),
            });
        }

        serde_json::from_slice(&serialized_response)
            .map_err(|err| ApiError::Deserialize(err.to_string()))
    }
}

/// The server surface the jobs run against. [`Network`] is the production
/// implementation; tests drive the jobs with an in-process fake.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Directory listing by path, yielding the numeric folder id that the
    /// metadata endpoints key by.
    async fn folder_id(&self, account: &Account, path: &str) -> CseResult<String>;

    /// `Ok(None)` means the folder has no metadata yet (HTTP 404).
    async fn metadata(&self, account: &Account, folder_id: &str) -> CseResult<Option<String>>;

    async fn lock_folder(
        &self, account: &Account, folder_id: &str, counter: Option<u64>,
    ) -> CseResult<FolderToken>;

    async fn unlock_folder(
        &self, account: &Account, folder_id: &str, token: &FolderToken,
    ) -> CseResult<()>;

    async fn store_metadata(
        &self, account: &Account, folder_id: &str, token: &FolderToken, metadata: &[u8],
    ) -> CseResult<()>;

    async fn update_metadata(
        &self, account: &Account, folder_id: &str, token: &FolderToken, metadata: &[u8],
    ) -> CseResult<()>;

    async fn set_encryption_flag(&self, account: &Account, folder_id: &str) -> CseResult<()>;

    async fn certificates(
        &self, account: &Account, users: &[String],
    ) -> CseResult<BTreeMap<String, String>>;
}

#[async_trait]
impl ServerApi for Network {
    async fn folder_id(&self, account: &Account, path: &str) -> CseResult<String> {
        let response = self
            .request(account, ListFolderRequest { path: path.to_string() })
            .await?;
        Ok(response.ocs.data.file_id)
    }

    async fn metadata(&self, account: &Account, folder_id: &str) -> CseResult<Option<String>> {
        match self
            .request(account, GetMetadataRequest { folder_id: folder_id.to_string() })
            .await
        {
            Ok(response) => Ok(Some(response.ocs.data.meta_data)),
            Err(ApiError::Endpoint(GetMetadataError::NotFound)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn lock_folder(
        &self, account: &Account, folder_id: &str, counter: Option<u64>,
    ) -> CseResult<FolderToken> {
        let response = self
            .request(account, LockFolderRequest { folder_id: folder_id.to_string(), counter })
            .await?;
        Ok(FolderToken(response.ocs.data.e2e_token))
    }

    async fn unlock_folder(
        &self, account: &Account, folder_id: &str, token: &FolderToken,
    ) -> CseResult<()> {
        self.request(
            account,
            UnlockFolderRequest { folder_id: folder_id.to_string(), token: token.clone() },
        )
        .await?;
        Ok(())
    }

    async fn store_metadata(
        &self, account: &Account, folder_id: &str, token: &FolderToken, metadata: &[u8],
    ) -> CseResult<()> {
        self.request(
            account,
            StoreMetadataRequest {
                folder_id: folder_id.to_string(),
                token: token.clone(),
                meta_data: String::from_utf8(metadata.to_vec()).map_unexpected()?,
            },
        )
        .await?;
        Ok(())
    }

    async fn update_metadata(
        &self, account: &Account, folder_id: &str, token: &FolderToken, metadata: &[u8],
    ) -> CseResult<()> {
        self.request(
            account,
            UpdateMetadataRequest {
                folder_id: folder_id.to_string(),
                token: token.clone(),
                meta_data: String::from_utf8(metadata.to_vec()).map_unexpected()?,
            },
        )
        .await?;
        Ok(())
    }

    async fn set_encryption_flag(&self, account: &Account, folder_id: &str) -> CseResult<()> {
        self.request(account, SetEncryptionFlagRequest { folder_id: folder_id.to_string() })
            .await?;
        Ok(())
    }

    async fn certificates(
        &self, account: &Account, users: &[String],
    ) -> CseResult<BTreeMap<String, String>> {
        let response = self
            .request(account, GetCertificatesRequest { users: users.to_vec() })
            .await?;
        Ok(response.ocs.data.certificates)
    }
}
