use crate::error::ScanError;

/// Which rights let a caller skip cell-level filtering entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ElevatedAccessPolicy {
    /// Only database administrators bypass the filter.
    AdminOnly,
    /// Administrators, and callers already holding read on the array's namespace.
    #[default]
    AdminOrNamespaceRead,
}

/// How the restricted view is built once permissions are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum FilterStrategy {
    /// Wrap the base array with the collapsed range set, keeping its schema.
    #[default]
    RangeRestriction,
    /// Positionally join the base array with the caller's permission slice.
    PermissionJoin,
}

/// Runtime configuration for a secure scan engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureScanConfig {
    /// Namespace holding one permission array per protected array, under the same name.
    pub permissions_namespace: String,
    /// Namespace used for unqualified array names.
    pub default_namespace: String,
    /// Fallback name of the user dimension when no dimension is tagged.
    pub user_dimension: String,
    /// Fallback name of the protected-key dimension when no dimension is tagged.
    pub key_dimension: String,
    /// Boolean attribute holding the grant bit; first boolean attribute when unset.
    pub grant_attribute: Option<String>,
    pub elevated_access: ElevatedAccessPolicy,
    pub filter_strategy: FilterStrategy,
    pub allow_transient_arrays: bool,
    pub exchange_timeout_ms: u64,
    pub max_authorized_keys: usize,
}

impl Default for SecureScanConfig {
    fn default() -> Self {
        Self {
            permissions_namespace: "permissions".into(),
            default_namespace: "public".into(),
            user_dimension: "user_id".into(),
            key_dimension: "dataset_id".into(),
            grant_attribute: None,
            elevated_access: ElevatedAccessPolicy::AdminOrNamespaceRead,
            filter_strategy: FilterStrategy::RangeRestriction,
            allow_transient_arrays: false,
            exchange_timeout_ms: 30_000,
            max_authorized_keys: 1_000_000,
        }
    }
}

impl SecureScanConfig {
    /// Only administrators bypass filtering and temporary arrays are refused.
    pub fn strict() -> Self {
        Self {
            elevated_access: ElevatedAccessPolicy::AdminOnly,
            allow_transient_arrays: false,
            ..Self::default()
        }
    }

    /// Single-node profile: temporary arrays allowed, short exchange timeout.
    pub fn development() -> Self {
        Self {
            allow_transient_arrays: true,
            exchange_timeout_ms: 2_000,
            ..Self::default()
        }
    }

    pub fn exchange_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.exchange_timeout_ms)
    }

    pub fn with_elevated_access(mut self, policy: ElevatedAccessPolicy) -> Self {
        self.elevated_access = policy;
        self
    }

    pub fn with_filter_strategy(mut self, strategy: FilterStrategy) -> Self {
        self.filter_strategy = strategy;
        self
    }

    pub fn with_grant_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.grant_attribute = Some(attribute.into());
        self
    }

    pub fn with_exchange_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.exchange_timeout_ms = timeout_ms;
        self
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        for (field, value) in [
            ("permissions_namespace", &self.permissions_namespace),
            ("default_namespace", &self.default_namespace),
            ("user_dimension", &self.user_dimension),
            ("key_dimension", &self.key_dimension),
        ] {
            if value.trim().is_empty() {
                return Err(ScanError::InvalidConfig {
                    message: format!("{field} must not be empty"),
                });
            }
        }
        if self.user_dimension == self.key_dimension {
            return Err(ScanError::InvalidConfig {
                message: "user_dimension and key_dimension must differ".into(),
            });
        }
        if self.permissions_namespace == self.default_namespace {
            return Err(ScanError::InvalidConfig {
                message: "permissions_namespace must differ from default_namespace".into(),
            });
        }
        if self.grant_attribute.as_deref().is_some_and(str::is_empty) {
            return Err(ScanError::InvalidConfig {
                message: "grant_attribute must not be empty when set".into(),
            });
        }
        if self.exchange_timeout_ms == 0 {
            return Err(ScanError::InvalidConfig {
                message: "exchange_timeout_ms must be > 0".into(),
            });
        }
        if self.max_authorized_keys == 0 {
            return Err(ScanError::InvalidConfig {
                message: "max_authorized_keys must be > 0".into(),
            });
        }
        Ok(())
    }
}
