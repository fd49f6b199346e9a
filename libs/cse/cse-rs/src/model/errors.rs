use std::backtrace::Backtrace;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::panic::Location;
use std::sync::PoisonError;

use serde::{Serialize, Serializer};
use tracing::error;

use crate::io::network::ApiError;

use super::api;

pub type CseResult<T> = Result<T, CseErr>;

#[derive(Debug)]
pub struct CseErr {
    pub kind: CseErrKind,
    pub backtrace: Option<Backtrace>,
}

impl Serialize for CseErr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = format!("{:?}", self);
        serializer.serialize_str(&s)
    }
}

impl Display for CseErr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// The description a customer may see. Anything not meant to escape this
/// crate keeps an uglier debug impl for details.
impl Display for CseErrKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CseErrKind::AccountNonexistent => write!(f, "You need an account to do that"),
            CseErrKind::AlreadyLocked => {
                write!(f, "This folder is already locked by the running operation")
            }
            CseErrKind::Cancelled => write!(f, "The operation was cancelled"),
            CseErrKind::CertificateInvalid => write!(f, "That certificate is invalid"),
            CseErrKind::CertificateNonexistent(user) => {
                write!(f, "Could not find a certificate for {user}")
            }
            CseErrKind::FolderIdUnresolved => {
                write!(f, "Could not resolve the id of the encrypted folder")
            }
            CseErrKind::LockFailed(status) => {
                write!(f, "Could not lock the folder (HTTP {status})")
            }
            CseErrKind::MetadataInvalid => {
                write!(f, "The folder metadata was not set up, cannot use it")
            }
            CseErrKind::MetadataKeyMissing => {
                write!(f, "No metadata key is available for this folder")
            }
            CseErrKind::MigrationChecksumMismatch => {
                write!(f, "The legacy metadata checksum did not match")
            }
            CseErrKind::Network { status, message } => {
                write!(f, "Server error (HTTP {status}): {message}")
            }
            CseErrKind::ServerUnreachable => write!(f, "Could not reach server"),
            CseErrKind::UnlockFailed(status) => {
                write!(f, "Could not unlock the folder (HTTP {status})")
            }
            CseErrKind::UserMutationOnNonRoot => {
                write!(f, "Folder users can only be changed on a top level encrypted folder")
            }
            CseErrKind::UsersArrayInvalid => {
                write!(f, "The folder user list does not match this folder's position")
            }
            CseErrKind::Parse(parse_error) => match parse_error {
                ParseError::Malformed(details) => {
                    write!(f, "Could not parse folder metadata: {details}")
                }
                ParseError::UnsupportedVersion => {
                    write!(f, "This folder metadata version is not supported")
                }
            },
            CseErrKind::Crypto(crypto_error) => {
                write!(f, "unexpected crypto error: {crypto_error:?}")
            }
            CseErrKind::Unexpected(msg) => write!(f, "Unexpected error: {msg}"),
        }
    }
}

impl From<CseErrKind> for CseErr {
    fn from(kind: CseErrKind) -> Self {
        Self { kind, backtrace: Some(Backtrace::force_capture()) }
    }
}

pub trait Unexpected<T> {
    fn log_and_ignore(self) -> Option<T>;
    fn map_unexpected(self) -> CseResult<T>;
}

impl<T, E: std::fmt::Debug> Unexpected<T> for Result<T, E> {
    #[track_caller]
    fn map_unexpected(self) -> CseResult<T> {
        let location = Location::caller();
        self.map_err(|err| {
            CseErrKind::Unexpected(format!(
                "unexpected error at {}:{} {err:?}",
                location.file(),
                location.line(),
            ))
            .into()
        })
    }

    #[track_caller]
    fn log_and_ignore(self) -> Option<T> {
        let location = Location::caller();
        if let Err(e) = &self {
            error!("error ignored at {}:{} {e:?}", location.file(), location.line());
        }

        self.ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CseErrKind {
    AccountNonexistent,
    /// A second lock attempt within one job instance. The server guarantees
    /// a single outstanding lock per folder; this is the local defense.
    AlreadyLocked,
    Cancelled,
    CertificateInvalid,
    CertificateNonexistent(String),
    FolderIdUnresolved,
    LockFailed(u16),
    MetadataInvalid,
    MetadataKeyMissing,
    /// Legacy (V1.2) metadata key checksum mismatch. Soft-skippable via
    /// [`Account::skip_metadata_checksum_validation`](crate::model::account::Account).
    MigrationChecksumMismatch,
    Network { status: u16, message: String },
    ServerUnreachable,
    UnlockFailed(u16),
    /// Folder user mutation attempted on a nested (non top level) folder.
    UserMutationOnNonRoot,
    /// Root folders must carry folder users, nested folders must not.
    UsersArrayInvalid,
    Parse(ParseError),
    Crypto(CryptoError),

    /// If no programmer in any part of the stack (including tests) expects
    /// to see a particular error, we debug format the underlying error to
    /// keep the number of error types in check. Commonly used for errors
    /// originating in other crates.
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Malformed(String),
    UnsupportedVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    Decryption(aead::Error),
    Asymmetric(String),
    InvalidKey,
    /// Hardware token refused the operation (bad PIN, missing key handle).
    Token(String),
}

pub fn core_err_unexpected<T: fmt::Debug>(err: T) -> CseErrKind {
    CseErrKind::Unexpected(format!("{:?}", err))
}

impl<G> From<PoisonError<G>> for CseErr {
    fn from(err: PoisonError<G>) -> Self {
        core_err_unexpected(err).into()
    }
}

impl From<io::Error> for CseErr {
    fn from(e: io::Error) -> Self {
        core_err_unexpected(e).into()
    }
}

impl From<serde_json::Error> for CseErr {
    fn from(err: serde_json::Error) -> Self {
        CseErrKind::Parse(ParseError::Malformed(format!("{err}"))).into()
    }
}

impl From<ApiError<api::ListFolderError>> for CseErr {
    fn from(err: ApiError<api::ListFolderError>) -> Self {
        match err {
            ApiError::SendFailed(_) | ApiError::ReceiveFailed(_) => CseErrKind::ServerUnreachable,
            ApiError::Endpoint(api::ListFolderError::FolderNotFound) => {
                CseErrKind::FolderIdUnresolved
            }
            ApiError::Status { status, message } => CseErrKind::Network { status, message },
            e => core_err_unexpected(e),
        }
        .into()
    }
}

impl From<ApiError<api::GetMetadataError>> for CseErr {
    fn from(err: ApiError<api::GetMetadataError>) -> Self {
        match err {
            ApiError::SendFailed(_) | ApiError::ReceiveFailed(_) => CseErrKind::ServerUnreachable,
            ApiError::Endpoint(api::GetMetadataError::NotFound) => {
                CseErrKind::Network { status: 404, message: "no metadata".to_string() }
            }
            ApiError::Status { status, message } => CseErrKind::Network { status, message },
            e => core_err_unexpected(e),
        }
        .into()
    }
}

impl From<ApiError<api::StoreMetadataError>> for CseErr {
    fn from(err: ApiError<api::StoreMetadataError>) -> Self {
        match err {
            ApiError::SendFailed(_) | ApiError::ReceiveFailed(_) => CseErrKind::ServerUnreachable,
            ApiError::Status { status, message } => CseErrKind::Network { status, message },
            e => core_err_unexpected(e),
        }
        .into()
    }
}

impl From<ApiError<api::UpdateMetadataError>> for CseErr {
    fn from(err: ApiError<api::UpdateMetadataError>) -> Self {
        match err {
            ApiError::SendFailed(_) | ApiError::ReceiveFailed(_) => CseErrKind::ServerUnreachable,
            ApiError::Status { status, message } => CseErrKind::Network { status, message },
            e => core_err_unexpected(e),
        }
        .into()
    }
}

impl From<ApiError<api::GetCertificatesError>> for CseErr {
    fn from(err: ApiError<api::GetCertificatesError>) -> Self {
        match err {
            ApiError::SendFailed(_) | ApiError::ReceiveFailed(_) => CseErrKind::ServerUnreachable,
            ApiError::Endpoint(api::GetCertificatesError::UserNotFound(user)) => {
                CseErrKind::CertificateNonexistent(user)
            }
            ApiError::Status { status, message } => CseErrKind::Network { status, message },
            e => core_err_unexpected(e),
        }
        .into()
    }
}

impl From<ApiError<api::SetEncryptionFlagError>> for CseErr {
    fn from(err: ApiError<api::SetEncryptionFlagError>) -> Self {
        match err {
            ApiError::SendFailed(_) | ApiError::ReceiveFailed(_) => CseErrKind::ServerUnreachable,
            ApiError::Status { status, message } => CseErrKind::Network { status, message },
            e => core_err_unexpected(e),
        }
        .into()
    }
}

impl From<ApiError<api::LockFolderError>> for CseErr {
    fn from(err: ApiError<api::LockFolderError>) -> Self {
        match err {
            ApiError::SendFailed(_) | ApiError::ReceiveFailed(_) => CseErrKind::ServerUnreachable,
            ApiError::Endpoint(api::LockFolderError::FolderLocked) => CseErrKind::LockFailed(423),
            ApiError::Status { status, .. } => CseErrKind::LockFailed(status),
            e => core_err_unexpected(e),
        }
        .into()
    }
}

impl From<ApiError<api::UnlockFolderError>> for CseErr {
    fn from(err: ApiError<api::UnlockFolderError>) -> Self {
        match err {
            ApiError::SendFailed(_) | ApiError::ReceiveFailed(_) => CseErrKind::ServerUnreachable,
            ApiError::Endpoint(api::UnlockFolderError::WrongToken) => CseErrKind::UnlockFailed(403),
            ApiError::Status { status, .. } => CseErrKind::UnlockFailed(status),
            e => core_err_unexpected(e),
        }
        .into()
    }
}
