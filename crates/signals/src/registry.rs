//! Module registry: maps configured module names to constructors.
//!
//! The orchestrator only ever sees `Arc<dyn IndicatorModule>`; which concrete
//! variant backs a name is decided here.

use std::collections::HashMap;
use std::sync::Arc;

use orderflow_core::{ConfigError, IndicatorModule, ModuleKind};

use crate::collector::{BinanceDepthConnector, BinanceTradeConnector};
use crate::modules::{CvdModule, ModuleContext, OrderBookModule, PolledModule, PolledVariant};

/// Builds one module from the shared context.
pub type ModuleFactory = Box<dyn Fn(&ModuleContext) -> Arc<dyn IndicatorModule> + Send + Sync>;

/// Registry of module constructors keyed by kind.
pub struct ModuleRegistry {
    factories: HashMap<ModuleKind, ModuleFactory>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the Binance-backed implementation of every kind.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ModuleKind::Cvd, |ctx| {
            let connector = BinanceTradeConnector::new(ctx.config.feed.ws_url.clone());
            Arc::new(CvdModule::new(connector, ctx)) as Arc<dyn IndicatorModule>
        });
        registry.register(ModuleKind::OrderBook, |ctx| {
            let connector = BinanceDepthConnector::new(ctx.config.feed.ws_url.clone());
            Arc::new(OrderBookModule::new(connector, ctx)) as Arc<dyn IndicatorModule>
        });
        for variant in [
            PolledVariant::OpenInterest,
            PolledVariant::Funding,
            PolledVariant::Liquidations,
        ] {
            registry.register(variant.kind(), move |ctx| {
                Arc::new(PolledModule::new(variant, ctx)) as Arc<dyn IndicatorModule>
            });
        }
        registry
    }

    /// Registers a constructor, replacing any existing one for the kind.
    pub fn register<F>(&mut self, kind: ModuleKind, factory: F)
    where
        F: Fn(&ModuleContext) -> Arc<dyn IndicatorModule> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
    }

    #[must_use]
    pub fn contains(&self, kind: ModuleKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Registered kinds in declaration order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ModuleKind> {
        let mut kinds: Vec<ModuleKind> = self.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Builds the module for a kind.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownModule` if nothing is registered for it.
    pub fn build(
        &self,
        kind: ModuleKind,
        ctx: &ModuleContext,
    ) -> Result<Arc<dyn IndicatorModule>, ConfigError> {
        self.factories
            .get(&kind)
            .map(|factory| factory(ctx))
            .ok_or_else(|| ConfigError::UnknownModule(kind.as_str().to_string()))
    }

    /// Builds a module from its configured name.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownModule` for unrecognised names.
    pub fn build_named(
        &self,
        name: &str,
        ctx: &ModuleContext,
    ) -> Result<Arc<dyn IndicatorModule>, ConfigError> {
        let kind: ModuleKind = name.parse()?;
        self.build(kind, ctx)
    }

    /// Builds every module listed in the context's configuration, in order.
    ///
    /// # Errors
    /// Fails on the first unknown or unregistered module name.
    pub fn build_all(
        &self,
        ctx: &ModuleContext,
    ) -> Result<Vec<Arc<dyn IndicatorModule>>, ConfigError> {
        ctx.config
            .module_kinds()?
            .into_iter()
            .map(|kind| self.build(kind, ctx))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
