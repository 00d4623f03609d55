//! The authorizer and its background refresh task.

use crate::config::AuthorizerConfig;
use crate::error::{AuthzError, AuthzResult};
use crate::policy::{Decision, RuleSet};
use crate::rule::PolicyRule;
use crate::source::{RuleSource, StaticRuleSource};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Answers whether a subject may perform an action on an object.
///
/// The authorization stage of the middleware chain depends on this trait
/// rather than on [`Authorizer`] so hosts can plug in another engine.
pub trait Enforcer: Send + Sync {
    /// Returns `Ok(true)` if the request is allowed.
    fn authorize(&self, subject: &str, object: &str, action: &str) -> AuthzResult<bool>;
}

/// Deny-override policy authorizer.
///
/// Holds the current [`RuleSet`] behind a lock that is only taken to clone
/// or replace an `Arc`, so evaluation never observes a half-loaded set.
pub struct Authorizer {
    rules: RwLock<Arc<RuleSet>>,
    source: Arc<dyn RuleSource>,
    config: AuthorizerConfig,
    generation: AtomicU64,
}

impl Authorizer {
    /// Creates an authorizer and performs the initial load.
    ///
    /// Unlike later reloads, a failed initial load is an error.
    pub async fn new(source: Arc<dyn RuleSource>, config: AuthorizerConfig) -> AuthzResult<Self> {
        let rules = source.load().await?;
        let authorizer = Self {
            rules: RwLock::new(Arc::new(RuleSet::with_max_role_depth(
                rules,
                config.max_role_depth,
            ))),
            source,
            config,
            generation: AtomicU64::new(1),
        };
        info!(
            source = authorizer.source.name(),
            permissions = authorizer.snapshot().permission_count(),
            assignments = authorizer.snapshot().assignment_count(),
            "policy rules loaded"
        );
        Ok(authorizer)
    }

    /// Creates an authorizer over a fixed rule list, without refresh.
    pub fn with_rules(rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        let rules: Vec<PolicyRule> = rules.into_iter().collect();
        let config = AuthorizerConfig::default().without_refresh();
        Self {
            rules: RwLock::new(Arc::new(RuleSet::new(rules.clone()))),
            source: Arc::new(StaticRuleSource::new(rules)),
            config,
            generation: AtomicU64::new(1),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AuthorizerConfig {
        &self.config
    }

    /// Returns the rule set currently in force.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.rules.read())
    }

    /// Number of successful loads so far, including the initial one.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Reloads rules from the source and swaps them in.
    ///
    /// On failure the previous rule set stays in force and the error is
    /// returned for the caller to log.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub async fn reload(&self) -> AuthzResult<usize> {
        let rules = match self.source.load().await {
            Ok(rules) => rules,
            Err(err) => {
                metrics::counter!("keystone_policy_reloads_total", "outcome" => "error")
                    .increment(1);
                return Err(err);
            }
        };

        let compiled = Arc::new(RuleSet::with_max_role_depth(
            rules,
            self.config.max_role_depth,
        ));
        let count = compiled.permission_count() + compiled.assignment_count();
        *self.rules.write() = compiled;
        self.generation.fetch_add(1, Ordering::AcqRel);

        metrics::counter!("keystone_policy_reloads_total", "outcome" => "ok").increment(1);
        debug!(rules = count, "policy rules reloaded");
        Ok(count)
    }

    /// Evaluates a request and returns the full decision.
    pub fn decide(&self, subject: &str, object: &str, action: &str) -> Decision {
        let decision = self.snapshot().evaluate(subject, object, action);
        metrics::counter!("keystone_authz_decisions_total", "decision" => decision.as_str())
            .increment(1);
        if self.config.log_decisions {
            debug!(subject, object, action, decision = ?decision, "authorization decision");
        }
        decision
    }

    /// Starts reloading on the configured interval.
    ///
    /// Returns `None` when refresh is disabled. The task holds only a weak
    /// reference and exits once the authorizer is dropped.
    pub fn spawn_refresh(self: &Arc<Self>) -> Option<RefreshHandle> {
        let interval = self.config.refresh_interval?;
        Some(RefreshHandle::spawn(Arc::downgrade(self), interval))
    }
}

impl Enforcer for Authorizer {
    fn authorize(&self, subject: &str, object: &str, action: &str) -> AuthzResult<bool> {
        if object.is_empty() {
            return Err(AuthzError::invalid_request("empty object"));
        }
        if action.is_empty() {
            return Err(AuthzError::invalid_request("empty action"));
        }
        Ok(self.decide(subject, object, action).is_allowed())
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("source", &self.source.name())
            .field("config", &self.config)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

/// Handle to the background refresh task.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct RefreshHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    fn spawn(authorizer: Weak<Authorizer>, interval: Duration) -> Self {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();

        let join_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = ticker.tick() => {
                        let Some(authorizer) = authorizer.upgrade() else { break };
                        if let Err(err) = authorizer.reload().await {
                            warn!(
                                error = %err,
                                retryable = err.is_retryable(),
                                "policy reload failed, keeping previous rules"
                            );
                        }
                    }
                }
            }
            debug!("policy refresh stopped");
        });

        Self {
            cancel_tx: Some(cancel_tx),
            join_handle: Some(join_handle),
        }
    }

    /// Stops the task and waits for it to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct FlakySource {
        inner: StaticRuleSource,
        failing: AtomicBool,
    }

    #[async_trait]
    impl RuleSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn load(&self) -> AuthzResult<Vec<PolicyRule>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AuthzError::source_load("flaky", "connection refused"));
            }
            self.inner.load().await
        }
    }

    fn initial_rules() -> Vec<PolicyRule> {
        vec![
            PolicyRule::grant("role:user", "/posts", "CALL"),
            PolicyRule::assign("user-1", "role:user"),
        ]
    }

    #[tokio::test]
    async fn test_authorize() {
        let authorizer = Authorizer::with_rules(initial_rules());
        assert!(authorizer.authorize("user-1", "/posts", "CALL").unwrap());
        assert!(!authorizer.authorize("user-2", "/posts", "CALL").unwrap());
        assert!(authorizer.authorize("user-1", "", "CALL").is_err());
        assert!(authorizer.authorize("user-1", "/posts", "").is_err());
    }

    #[tokio::test]
    async fn test_reload_swaps_rules() {
        let source = Arc::new(StaticRuleSource::new(initial_rules()));
        let authorizer = Authorizer::new(source.clone(), AuthorizerConfig::default())
            .await
            .unwrap();
        let before = authorizer.snapshot();

        source.replace(Vec::new());
        assert_eq!(authorizer.reload().await.unwrap(), 0);

        assert!(!authorizer.authorize("user-1", "/posts", "CALL").unwrap());
        assert_eq!(authorizer.generation(), 2);
        // Readers holding the old snapshot keep a consistent view.
        assert!(before.evaluate("user-1", "/posts", "CALL").is_allowed());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_rules() {
        let source = Arc::new(FlakySource {
            inner: StaticRuleSource::new(initial_rules()),
            failing: AtomicBool::new(false),
        });
        let authorizer = Authorizer::new(source.clone(), AuthorizerConfig::default())
            .await
            .unwrap();

        source.failing.store(true, Ordering::SeqCst);
        source.inner.replace(Vec::new());
        let err = authorizer.reload().await.unwrap_err();
        assert!(err.is_retryable());

        assert!(authorizer.authorize("user-1", "/posts", "CALL").unwrap());
        assert_eq!(authorizer.generation(), 1);
    }

    #[tokio::test]
    async fn test_failed_initial_load_is_an_error() {
        let source = Arc::new(FlakySource {
            inner: StaticRuleSource::default(),
            failing: AtomicBool::new(true),
        });
        assert!(Authorizer::new(source, AuthorizerConfig::default())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_picks_up_new_rules() {
        let source = Arc::new(StaticRuleSource::new(initial_rules()));
        let config = AuthorizerConfig::default().with_refresh_interval(Duration::from_secs(10));
        let authorizer = Arc::new(Authorizer::new(source.clone(), config).await.unwrap());
        let handle = authorizer.spawn_refresh().unwrap();

        source.push(PolicyRule::grant("role:user", "/posts/*", "DELETE"));
        assert!(!authorizer.authorize("user-1", "/posts/1", "DELETE").unwrap());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(authorizer.authorize("user-1", "/posts/1", "DELETE").unwrap());
        assert_eq!(authorizer.generation(), 2);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_survives_source_errors() {
        let source = Arc::new(FlakySource {
            inner: StaticRuleSource::new(initial_rules()),
            failing: AtomicBool::new(false),
        });
        let config = AuthorizerConfig::default().with_refresh_interval(Duration::from_secs(5));
        let authorizer = Arc::new(Authorizer::new(source.clone(), config).await.unwrap());
        source.failing.store(true, Ordering::SeqCst);
        let handle = authorizer.spawn_refresh().unwrap();

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(!handle.is_finished());
        assert!(authorizer.authorize("user-1", "/posts", "CALL").unwrap());

        source.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(authorizer.generation(), 2);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_refresh_disabled() {
        let authorizer = Arc::new(Authorizer::with_rules(initial_rules()));
        assert!(authorizer.spawn_refresh().is_none());
    }
}
