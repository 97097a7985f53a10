//! Startup orchestration.
//!
//! The [`Engine`] owns the settings, the stub registry and the RPC modules.
//! Binding a service runs, in order:
//!
//! 1. stub location ([`StubLocator::locate`]),
//! 2. RPC module lookup,
//! 3. declaration validation ([`validate`]),
//! 4. servicer construction ([`ServicerBuilder`](crate::servicer::ServicerBuilder)).
//!
//! Any failure aborts the bind; nothing partial is ever handed to the
//! transport.

use crate::{
    binding::{RpcBinding, RpcModules},
    error::{Error, Result},
    servicer::{DispatchConfig, ServiceContract, Servicer},
    settings::{ServiceDefinition, Settings},
    stub::{ResolvedStub, StubLocator, StubRegistry},
    validate::{ValidationReport, validate},
};
use parking_lot::Mutex;
use portable_atomic::{AtomicUsize, Ordering};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A service whose bindings passed validation.
#[derive(Debug, Clone)]
pub struct LoadedService {
    pub stub: Arc<ResolvedStub>,
    pub bindings: Arc<[RpcBinding]>,
    pub report: ValidationReport,
}

#[derive(Debug)]
pub struct Engine {
    settings: Settings,
    locator: StubLocator,
    modules: RpcModules,
    reports: Mutex<HashMap<String, ValidationReport>>,
    unbound_warnings: AtomicUsize,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(settings: Settings, registry: StubRegistry, modules: RpcModules) -> Self {
        Self {
            settings,
            locator: StubLocator::new(registry),
            modules,
            reports: Mutex::new(HashMap::new()),
            unbound_warnings: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolves and validates `service`.
    ///
    /// Declared methods without a binding are reported with a warning the
    /// first time the service loads; later loads return the same report
    /// silently.
    ///
    /// # Errors
    ///
    /// Stub resolution, RPC module lookup or validation failures.
    pub fn load(&self, service: &ServiceDefinition) -> Result<LoadedService> {
        let stub = self.locator.locate(&self.settings, service)?;
        let bindings = self
            .modules
            .get(&service.rpc_module)
            .ok_or_else(|| Error::RpcModuleNotFound {
                service: stub.service().to_string(),
                path: service.rpc_module.clone(),
            })?;
        let report = validate(&stub, &bindings)?;

        let first_load = self
            .reports
            .lock()
            .insert(report.service.clone(), report.clone())
            .is_none();
        if first_load && !report.is_complete() {
            self.unbound_warnings.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                service = %report.service,
                unbound = ?report.unbound,
                "Declared RPCs have no binding and will answer UNIMPLEMENTED"
            );
        }

        Ok(LoadedService {
            stub,
            bindings,
            report,
        })
    }

    /// Builds the servicer for contract `C`.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceNotConfigured`] when no configured service is named
    ///   `C::NAME`.
    /// - [`Error::ContractMismatch`] when the generated artifacts declare the
    ///   service under another package.
    /// - Any error of [`Engine::load`].
    pub fn bind<C: ServiceContract>(&self) -> Result<Servicer<C>> {
        let service =
            self.settings
                .find_service(C::NAME)
                .ok_or_else(|| Error::ServiceNotConfigured {
                    service: C::NAME.to_string(),
                })?;
        let stub = self.locator.locate(&self.settings, service)?;
        if stub.service() != C::NAME {
            return Err(Error::ContractMismatch {
                contract: C::NAME.to_string(),
                service: stub.service().to_string(),
            });
        }
        let loaded = self.load(service)?;

        let dispatch =
            DispatchConfig::from_settings(&self.settings).with_shutdown(self.shutdown.clone());
        let servicer = Servicer::<C>::builder()
            .dispatch(dispatch)
            .bind_all(loaded.bindings.iter())
            .build();

        tracing::info!(
            service = C::NAME,
            bound = ?loaded.report.bound,
            "Bound service"
        );
        Ok(servicer)
    }

    /// Loads every configured service without building servicers.
    ///
    /// # Errors
    ///
    /// The first service that fails to load.
    pub fn check(&self) -> Result<Vec<ValidationReport>> {
        self.settings
            .services()
            .iter()
            .map(|service| self.load(service).map(|loaded| loaded.report))
            .collect()
    }

    /// Report of the last successful load of `service` (qualified name).
    pub fn report(&self, service: &str) -> Option<ValidationReport> {
        self.reports.lock().get(service).cloned()
    }

    /// Number of unbound-method warnings emitted so far.
    pub fn unbound_warnings(&self) -> usize {
        self.unbound_warnings.load(Ordering::Relaxed)
    }

    /// Stops every servicer this engine built. Later calls answer
    /// `UNAVAILABLE`.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down servicers");
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
