use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::core::config::data::ScenarioOverride;
use crate::core::environment::Environment;
use crate::core::scenario::{Endpoint, Resolver, ScenarioConfig};

/// Immutable view of the configuration for one environment.
#[derive(Debug, Clone)]
pub struct ActiveConfig {
    environment: Environment,
    resolver: Arc<Resolver>,
}

impl ActiveConfig {
    pub fn new(environment: Environment, resolver: Arc<Resolver>) -> Self {
        Self {
            environment,
            resolver,
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn endpoint(&self) -> Endpoint {
        self.resolver.endpoint(self.environment)
    }

    pub fn debug(&self) -> bool {
        self.resolver.debug(self.environment)
    }

    pub fn resolve(&self, scenario: &str) -> ScenarioConfig {
        self.resolver.resolve(self.environment, scenario)
    }

    pub fn resolve_with(&self, scenario: &str, runtime: &ScenarioOverride) -> ScenarioConfig {
        self.resolver
            .resolve_with(self.environment, scenario, runtime)
    }
}

/// Process-wide handle to the active configuration.
///
/// Readers take a snapshot `Arc` and keep using it for the whole call;
/// switching environments swaps the pointer and never edits a snapshot
/// someone else holds.
#[derive(Debug)]
pub struct ConfigHandle {
    current: RwLock<Arc<ActiveConfig>>,
}

impl ConfigHandle {
    pub fn new(environment: Environment, resolver: Resolver) -> Self {
        Self {
            current: RwLock::new(Arc::new(ActiveConfig::new(
                environment,
                Arc::new(resolver),
            ))),
        }
    }

    pub fn snapshot(&self) -> Arc<ActiveConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn environment(&self) -> Environment {
        self.snapshot().environment()
    }

    /// Activate another environment and return the new snapshot.
    pub fn switch_environment(&self, environment: Environment) -> Arc<ActiveConfig> {
        let resolver = Arc::clone(&self.snapshot().resolver);
        self.install(ActiveConfig::new(environment, resolver))
    }

    /// Replace the resolver (e.g. after re-reading config files), keeping the
    /// active environment.
    pub fn reload(&self, resolver: Resolver) -> Arc<ActiveConfig> {
        let environment = self.environment();
        self.install(ActiveConfig::new(environment, Arc::new(resolver)))
    }

    fn install(&self, config: ActiveConfig) -> Arc<ActiveConfig> {
        let next = Arc::new(config);
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        debug!(
            from = %guard.environment(),
            to = %next.environment(),
            "Swapping active configuration"
        );
        *guard = Arc::clone(&next);
        next
    }
}
