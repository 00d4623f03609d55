//! The composition root.

use crate::error::BuildError;
use keystone_authz::{
    Authorizer, AuthorizerConfig, PolicyRule, RefreshHandle, RuleSource, StaticRuleSource,
};
use keystone_config::KeystoneConfig;
use keystone_middleware::stages::{
    AuthnMiddleware, AuthzMiddleware, BypassAuthnMiddleware, DefaultsMiddleware,
    PrincipalLookup, RequestIdMiddleware, ValidationMiddleware,
};
use keystone_middleware::{Chain, Gateway, HttpAdapter, MessageRegistry, RpcAdapter, Whitelist};
use keystone_store::{Datastore, TenantRegistry};
use keystone_telemetry::TelemetryResult;
use keystone_token::{TokenConfig, TokenService};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Every shared Keystone component, wired from one [`KeystoneConfig`].
///
/// Build one at startup with [`Keystone::builder`], then hand its chain to
/// as many transport adapters as the service exposes. All of them share
/// the same token service, authorizer, whitelist and message registry.
pub struct Keystone {
    config: KeystoneConfig,
    tokens: Arc<TokenService>,
    authorizer: Arc<Authorizer>,
    refresh: Option<RefreshHandle>,
    whitelist: Arc<Whitelist>,
    registry: Arc<MessageRegistry>,
    tenants: Arc<TenantRegistry>,
    datastore: Datastore,
    chain: Arc<Chain>,
}

impl Keystone {
    /// Starts a builder over `config`.
    pub fn builder(config: KeystoneConfig) -> KeystoneBuilder {
        KeystoneBuilder::new(config)
    }

    /// Installs the global log subscriber described by the `logging`
    /// section and registers metric descriptions.
    ///
    /// # Errors
    ///
    /// Fails if a subscriber is already installed or the level is invalid.
    pub fn install_telemetry(config: &KeystoneConfig) -> TelemetryResult<()> {
        keystone_telemetry::init_logging(&config.logging)?;
        keystone_telemetry::metrics::describe_metrics();
        Ok(())
    }

    /// The configuration this instance was built from.
    pub fn config(&self) -> &KeystoneConfig {
        &self.config
    }

    /// The identity token service.
    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// The policy authorizer.
    pub fn authorizer(&self) -> &Arc<Authorizer> {
        &self.authorizer
    }

    /// The operations that skip authentication and authorization.
    pub fn whitelist(&self) -> &Arc<Whitelist> {
        &self.whitelist
    }

    /// The registry behind the defaults and validation stages.
    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    /// The tenant scoping registry.
    pub fn tenants(&self) -> &Arc<TenantRegistry> {
        &self.tenants
    }

    /// The datastore handing out typed stores.
    pub fn datastore(&self) -> &Datastore {
        &self.datastore
    }

    /// The middleware chain.
    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    /// A new RPC adapter over the shared chain.
    pub fn rpc(&self) -> RpcAdapter {
        RpcAdapter::new(Arc::clone(&self.chain))
    }

    /// A new HTTP adapter over the shared chain.
    pub fn http(&self) -> HttpAdapter {
        HttpAdapter::new(Arc::clone(&self.chain))
    }

    /// A new gateway in front of `rpc`.
    pub fn gateway(&self, rpc: Arc<RpcAdapter>) -> Gateway {
        Gateway::new(rpc)
    }

    /// Stops background policy refresh.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.refresh.take() {
            handle.stop().await;
        }
        info!("keystone stopped");
    }
}

impl fmt::Debug for Keystone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keystone")
            .field("authorizer", &self.authorizer)
            .field("refreshing", &self.refresh.is_some())
            .field("whitelist", &self.whitelist)
            .field("datastore", &self.datastore)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Keystone`].
///
/// # Example
///
/// ```
/// use keystone::prelude::*;
/// use keystone::{Keystone, KeystoneConfig};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let mut config = KeystoneConfig::default();
/// config.token.signing_key = "Rtg8BPKNEf2mB4mg".to_string();
/// config.authz.refresh_interval_secs = 0;
///
/// let keystone = Keystone::builder(config)
///     .with_rules([PolicyRule::grant("user-1", "/v1.Keystone/ListPosts", "CALL")])
///     .with_principal_lookup(Arc::new(
///         StaticPrincipalLookup::new().with(Principal::new("user-1", "alice")),
///     ))
///     .build()
///     .await
///     .unwrap();
///
/// assert_eq!(keystone.chain().stage_count(), 5);
/// # });
/// ```
pub struct KeystoneBuilder {
    config: KeystoneConfig,
    rule_source: Option<Arc<dyn RuleSource>>,
    lookup: Option<Arc<dyn PrincipalLookup>>,
    registry: MessageRegistry,
    tenants: TenantRegistry,
    datastore: Option<Datastore>,
}

impl KeystoneBuilder {
    fn new(config: KeystoneConfig) -> Self {
        Self {
            config,
            rule_source: None,
            lookup: None,
            registry: MessageRegistry::new(),
            tenants: TenantRegistry::new(),
            datastore: None,
        }
    }

    /// Loads policy rules from `source`.
    #[must_use]
    pub fn with_rule_source(mut self, source: Arc<dyn RuleSource>) -> Self {
        self.rule_source = Some(source);
        self
    }

    /// Uses a fixed in-memory rule list.
    #[must_use]
    pub fn with_rules(self, rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        self.with_rule_source(Arc::new(StaticRuleSource::new(rules)))
    }

    /// Resolves token subjects to principals.
    #[must_use]
    pub fn with_principal_lookup(mut self, lookup: Arc<dyn PrincipalLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Uses `registry` for the defaults and validation stages.
    #[must_use]
    pub fn with_registry(mut self, registry: MessageRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Uses `tenants` for store scoping.
    #[must_use]
    pub fn with_tenants(mut self, tenants: TenantRegistry) -> Self {
        self.tenants = tenants;
        self
    }

    /// Uses `datastore` instead of one derived from the `database` section.
    #[must_use]
    pub fn with_datastore(mut self, datastore: Datastore) -> Self {
        self.datastore = Some(datastore);
        self
    }

    /// Validates the configuration, performs the initial policy load,
    /// connects the datastore and assembles the chain.
    ///
    /// Must run inside a Tokio runtime when policy refresh is enabled.
    pub async fn build(self) -> Result<Keystone, BuildError> {
        let Self {
            config,
            rule_source,
            lookup,
            registry,
            tenants,
            datastore,
        } = self;
        config.validate()?;

        let tokens = Arc::new(TokenService::new(
            TokenConfig::new(&config.token.signing_key)
                .with_identity_key(config.token.identity_key.clone())
                .with_expiration(config.token.expiration()),
        ));

        let (datastore, default_rules) = match datastore {
            Some(datastore) => (datastore, None),
            None => connect(&config).await?,
        };

        let source: Arc<dyn RuleSource> = match rule_source.or(default_rules) {
            Some(source) => source,
            None => {
                warn!("no policy rule source configured, every guarded call will be denied");
                Arc::new(StaticRuleSource::new(Vec::new()))
            }
        };
        let authz_config = match config.authz.refresh_interval() {
            Some(interval) => AuthorizerConfig::default().with_refresh_interval(interval),
            None => AuthorizerConfig::default().without_refresh(),
        };
        let authorizer = Arc::new(Authorizer::new(source, authz_config).await?);
        let refresh = authorizer.spawn_refresh();

        let whitelist = Arc::new(match &config.middleware.whitelist {
            Some(operations) => Whitelist::new(operations),
            None => Whitelist::default(),
        });
        let registry = Arc::new(registry);

        let request_id = RequestIdMiddleware::new()
            .with_trust_incoming(config.middleware.trust_incoming_request_id);
        let builder = Chain::builder().request_id(request_id);
        let builder = if config.middleware.bypass_authn {
            warn!("authentication bypass is enabled, do not use outside development");
            builder.authentication(BypassAuthnMiddleware::new())
        } else {
            let lookup = lookup.ok_or(BuildError::MissingPrincipalLookup)?;
            builder.authentication(AuthnMiddleware::new(
                Arc::clone(&tokens),
                lookup,
                Arc::clone(&whitelist),
            ))
        };
        let chain = builder
            .authorization(AuthzMiddleware::new(
                authorizer.clone(),
                Arc::clone(&whitelist),
            ))
            .defaults(DefaultsMiddleware::new(Arc::clone(&registry)))
            .validation(ValidationMiddleware::new(Arc::clone(&registry)))
            .build();

        info!(
            stages = ?chain.stage_names(),
            whitelisted = whitelist.len(),
            refreshing = refresh.is_some(),
            "keystone ready"
        );

        Ok(Keystone {
            config,
            tokens,
            authorizer,
            refresh,
            whitelist,
            registry,
            tenants: Arc::new(tenants),
            datastore,
            chain: Arc::new(chain),
        })
    }
}

impl fmt::Debug for KeystoneBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoneBuilder")
            .field("config", &self.config)
            .field("has_rule_source", &self.rule_source.is_some())
            .field("has_principal_lookup", &self.lookup.is_some())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Picks the datastore from the `database` section. With a URL, the rules
/// are read from the same database.
#[cfg(feature = "postgres")]
async fn connect(
    config: &KeystoneConfig,
) -> Result<(Datastore, Option<Arc<dyn RuleSource>>), BuildError> {
    use keystone_authz::PgRuleSource;
    use keystone_store::{PgBackend, PgConfig};

    let Some(url) = config.database.url.as_deref() else {
        return Ok((Datastore::memory(), None));
    };
    let backend = PgBackend::connect(
        &PgConfig::new(url)
            .with_max_connections(config.database.max_connections)
            .with_acquire_timeout(config.database.acquire_timeout()),
    )
    .await?;
    let rules: Arc<dyn RuleSource> = Arc::new(PgRuleSource::new(backend.pool().clone()));
    Ok((Datastore::new(Arc::new(backend)), Some(rules)))
}

#[cfg(not(feature = "postgres"))]
async fn connect(
    config: &KeystoneConfig,
) -> Result<(Datastore, Option<Arc<dyn RuleSource>>), BuildError> {
    if config.database.url.is_some() {
        warn!("database.url is set but the postgres feature is disabled, using memory");
    }
    Ok((Datastore::memory(), None))
}
