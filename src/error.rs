use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Namespace,
    Array,
    Attribute,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Namespace => write!(f, "namespace"),
            ResourceType::Array => write!(f, "array"),
            ResourceType::Attribute => write!(f, "attribute"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanErrorCode {
    Schema,
    AccessDenied,
    SyncFailure,
    NamespaceNotFound,
    ArrayNotFound,
    AttributeNotFound,
    IndexNotBuilt,
    Cancelled,
    Validation,
    InvalidConfig,
    Encode,
    Decode,
    Storage,
}

impl ScanErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanErrorCode::Schema => "schema_error",
            ScanErrorCode::AccessDenied => "access_denied",
            ScanErrorCode::SyncFailure => "sync_failure",
            ScanErrorCode::NamespaceNotFound => "namespace_not_found",
            ScanErrorCode::ArrayNotFound => "array_not_found",
            ScanErrorCode::AttributeNotFound => "attribute_not_found",
            ScanErrorCode::IndexNotBuilt => "index_not_built",
            ScanErrorCode::Cancelled => "cancelled",
            ScanErrorCode::Validation => "validation",
            ScanErrorCode::InvalidConfig => "invalid_config",
            ScanErrorCode::Encode => "encode",
            ScanErrorCode::Decode => "decode",
            ScanErrorCode::Storage => "storage",
        }
    }

    /// Authorization and query-definition failures are the caller's to fix;
    /// everything else is a system fault.
    pub fn is_user_facing(self) -> bool {
        matches!(
            self,
            ScanErrorCode::Schema
                | ScanErrorCode::AccessDenied
                | ScanErrorCode::NamespaceNotFound
                | ScanErrorCode::ArrayNotFound
                | ScanErrorCode::AttributeNotFound
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum ScanError {
    #[error("schema error on array '{array}': {reason}")]
    Schema { array: String, reason: String },
    #[error("access denied for '{caller}' on array '{array}': {reason}")]
    AccessDenied {
        caller: String,
        array: String,
        reason: String,
    },
    #[error("replication exchange failed: {message}")]
    SyncFailure { message: String },
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("spatial range set queried before build_index")]
    IndexNotBuilt,
    #[error("query cancelled")]
    Cancelled,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl ScanError {
    pub fn schema(array: impl Into<String>, reason: impl Into<String>) -> Self {
        ScanError::Schema {
            array: array.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        ScanError::NotFound {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    pub fn sync_failure(message: impl Into<String>) -> Self {
        ScanError::SyncFailure {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ScanErrorCode {
        match self {
            ScanError::Schema { .. } => ScanErrorCode::Schema,
            ScanError::AccessDenied { .. } => ScanErrorCode::AccessDenied,
            ScanError::SyncFailure { .. } => ScanErrorCode::SyncFailure,
            ScanError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Namespace => ScanErrorCode::NamespaceNotFound,
                ResourceType::Array => ScanErrorCode::ArrayNotFound,
                ResourceType::Attribute => ScanErrorCode::AttributeNotFound,
            },
            ScanError::IndexNotBuilt => ScanErrorCode::IndexNotBuilt,
            ScanError::Cancelled => ScanErrorCode::Cancelled,
            ScanError::Validation(_) => ScanErrorCode::Validation,
            ScanError::InvalidConfig { .. } => ScanErrorCode::InvalidConfig,
            ScanError::Encode(_) => ScanErrorCode::Encode,
            ScanError::Decode(_) => ScanErrorCode::Decode,
            ScanError::Storage { .. } => ScanErrorCode::Storage,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
