//! Error types for `vss-core`.
//!
//! Each module has its own error enum. Every variant carries the identifiers
//! needed to diagnose the failure, and every enum maps onto the shared
//! [`ErrorKind`] taxonomy so callers (the CLI, a future API layer) can pick a
//! response without matching on every variant.

use vss_storage::StorageError;

use crate::catalog::PlanTier;
use crate::request::RequestStatus;
use crate::user::PlanStatus;

/// Coarse classification shared by all engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An unknown id was referenced.
    NotFound,
    /// Malformed input (domain string, month count, file size).
    InvalidInput,
    /// The operation collides with existing state (domain taken, pending request).
    Conflict,
    /// The target exists but is not in a state that allows the operation.
    PreconditionFailed,
    /// Storage or serialization failure.
    Internal,
}

/// Errors from the typed record tables.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying storage backend returned an error.
    #[error("store backend error: {0}")]
    Storage(#[from] StorageError),

    /// A record could not be encoded.
    #[error("failed to serialize record '{key}': {reason}")]
    Serialization { key: String, reason: String },

    /// A stored record could not be decoded.
    #[error("failed to deserialize record '{key}': {reason}")]
    Deserialization { key: String, reason: String },

    /// An insert targeted a key that already holds a record.
    #[error("record already exists: {key}")]
    Duplicate { key: String },
}

impl StoreError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Duplicate { .. } => ErrorKind::Conflict,
            Self::Storage(_) | Self::Serialization { .. } | Self::Deserialization { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

/// Errors from plan catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The tier name did not match any plan.
    #[error("unknown plan tier: {name}")]
    UnknownTier { name: String },

    /// The record store returned an error.
    #[error("catalog store error: {0}")]
    Store(#[from] StoreError),
}

impl CatalogError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTier { .. } => ErrorKind::InvalidInput,
            Self::Store(e) => e.kind(),
        }
    }
}

/// Errors from user directory and admin operations.
#[derive(Debug, thiserror::Error)]
pub enum UserError {
    /// No user with this id.
    #[error("user not found: {user_id}")]
    NotFound { user_id: String },

    /// Registration or profile input was rejected.
    #[error("invalid user input: {reason}")]
    InvalidInput { reason: String },

    /// Another account already uses this email address.
    #[error("email already registered: {email}")]
    EmailTaken { email: String },

    /// The plan catalog returned an error.
    #[error("user catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The record store returned an error.
    #[error("user store error: {0}")]
    Store(#[from] StoreError),
}

impl UserError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::EmailTaken { .. } => ErrorKind::Conflict,
            Self::Catalog(e) => e.kind(),
            Self::Store(e) => e.kind(),
        }
    }
}

/// Errors from the plan request workflow.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// No plan request with this id.
    #[error("plan request not found: {request_id}")]
    NotFound { request_id: String },

    /// The requesting user does not exist.
    #[error("user not found: {user_id}")]
    UserNotFound { user_id: String },

    /// Requests must cover at least one month.
    #[error("invalid month count {months}: must be at least 1")]
    InvalidMonths { months: u32 },

    /// The requested tier is disabled in the catalog.
    #[error("plan {tier} is not currently offered")]
    PlanDisabled { tier: PlanTier },

    /// The user already has a request waiting for review.
    #[error("user {user_id} already has pending request {request_id}")]
    PendingRequestExists { user_id: String, request_id: String },

    /// The request was already approved or rejected.
    #[error("plan request {request_id} is already {status}")]
    NotPending {
        request_id: String,
        status: RequestStatus,
    },

    /// The plan catalog returned an error.
    #[error("request catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Updating the requesting user failed.
    #[error("request user error: {0}")]
    User(#[from] UserError),

    /// The record store returned an error.
    #[error("request store error: {0}")]
    Store(#[from] StoreError),
}

impl RequestError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::UserNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidMonths { .. } => ErrorKind::InvalidInput,
            Self::PendingRequestExists { .. } => ErrorKind::Conflict,
            Self::PlanDisabled { .. } | Self::NotPending { .. } => ErrorKind::PreconditionFailed,
            Self::Catalog(e) => e.kind(),
            Self::User(e) => e.kind(),
            Self::Store(e) => e.kind(),
        }
    }
}

/// Errors from deployment mutations and domain requests.
#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    /// No deployment with this id.
    #[error("deployment not found: {deployment_id}")]
    NotFound { deployment_id: String },

    /// The owning user does not exist.
    #[error("user not found: {user_id}")]
    UserNotFound { user_id: String },

    /// No domain request with this id.
    #[error("domain request not found: {request_id}")]
    DomainRequestNotFound { request_id: String },

    /// The domain request was already approved or rejected.
    #[error("domain request {request_id} is no longer pending")]
    DomainRequestNotPending { request_id: String },

    /// The subdomain is empty after stripping disallowed characters.
    #[error("invalid domain '{input}': use lowercase letters, digits and '-'")]
    InvalidDomain { input: String },

    /// The requested domain equals the deployment's current one.
    #[error("{domain} is already the current domain")]
    SameAsCurrent { domain: String },

    /// Another deployment already serves this domain.
    #[error("domain already taken: {domain}")]
    DomainTaken { domain: String },

    /// Upload sizes must be finite and non-negative.
    #[error("invalid file size: {size_mb} MB")]
    InvalidFileSize { size_mb: f64 },

    /// The upload is larger than the owner's effective plan allows.
    #[error("upload of {size_mb} MB exceeds the {max_mb} MB limit of the {tier} plan")]
    UploadTooLarge {
        size_mb: f64,
        max_mb: u32,
        tier: PlanTier,
    },

    /// The owner's plan is expired or suspended.
    #[error("plan of user {user_id} is {status}; uploads are blocked")]
    PlanUnavailable { user_id: String, status: PlanStatus },

    /// The plan catalog returned an error.
    #[error("deployment catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Recomputing the owner's aggregates failed.
    #[error("deployment user error: {0}")]
    User(#[from] UserError),

    /// The record store returned an error.
    #[error("deployment store error: {0}")]
    Store(#[from] StoreError),
}

impl DeploymentError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. }
            | Self::UserNotFound { .. }
            | Self::DomainRequestNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidDomain { .. }
            | Self::InvalidFileSize { .. }
            | Self::UploadTooLarge { .. } => ErrorKind::InvalidInput,
            Self::SameAsCurrent { .. } | Self::DomainTaken { .. } => ErrorKind::Conflict,
            Self::DomainRequestNotPending { .. } | Self::PlanUnavailable { .. } => {
                ErrorKind::PreconditionFailed
            }
            Self::Catalog(e) => e.kind(),
            Self::User(e) => e.kind(),
            Self::Store(e) => e.kind(),
        }
    }
}

/// Errors from the site archive validator.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    /// The bytes are not a readable ZIP archive.
    #[error("unreadable archive: {reason}")]
    Archive { reason: String },

    /// The archive contains files with extensions that cannot be served.
    #[error("archive contains disallowed files: {preview}")]
    DisallowedFiles { files: Vec<String>, preview: String },

    /// The archive has no `index.html`.
    #[error("archive is missing index.html")]
    MissingIndex,

    /// A preview render asked for a page that is not in the archive.
    #[error("page not found in archive: {path}")]
    PageNotFound { path: String },

    /// The preview session was already released.
    #[error("preview session already released")]
    Released,
}

impl AssetError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PageNotFound { .. } => ErrorKind::NotFound,
            Self::Archive { .. } | Self::DisallowedFiles { .. } | Self::MissingIndex => {
                ErrorKind::InvalidInput
            }
            Self::Released => ErrorKind::PreconditionFailed,
        }
    }
}
