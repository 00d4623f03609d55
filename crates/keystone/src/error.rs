//! Errors raised while assembling a [`Keystone`](crate::Keystone).

use keystone_authz::AuthzError;
use keystone_config::ConfigError;
use keystone_store::BackendError;
use thiserror::Error;

/// Why the composition root could not be built.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The initial policy load failed.
    #[error("failed to load policy rules: {0}")]
    Policy(#[from] AuthzError),

    /// The database backend could not be reached.
    #[error("failed to connect the datastore: {0}")]
    Datastore(#[from] BackendError),

    /// Token authentication is enabled but no principal lookup was given.
    #[error("token authentication requires a principal lookup")]
    MissingPrincipalLookup,
}
