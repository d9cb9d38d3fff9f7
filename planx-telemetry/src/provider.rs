//! Exactly-once initialization shared by the trace, metric and log providers.
//!
//! A [`ProviderCell`] moves from [`ProviderStatus::Uninitialized`] to either
//! [`ProviderStatus::Ready`] or [`ProviderStatus::Degraded`] exactly once.
//! The first initializer runs the setup; concurrent initializers block until
//! it finishes and then observe the same outcome. When setup fails the error
//! is stored next to a no-op handle, so the subsystem stays usable and every
//! later initializer receives the same error.
//!
//! The first initializer wins even when it is the lazy default triggered by
//! a `get()` call. An explicit `init` that arrives afterwards cannot change
//! the configuration; it returns the stored outcome and emits a
//! `Provider.ExplicitConfigIgnored` warning so the lost configuration is
//! visible. Call `init` early in `main` to avoid this.
use std::fmt;
use std::sync::OnceLock;

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;

use crate::config::validate_service_name;
use crate::error::InitError;
use crate::internal_logging::{planx_debug, planx_error, planx_warn};

/// Observable state of a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Nothing has initialized the provider yet.
    Uninitialized,
    /// Setup succeeded and the real exporters are in place.
    Ready,
    /// Setup failed; a no-op handle is installed.
    Degraded,
}

/// How the winning initialization was triggered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitOrigin {
    /// An `init` or `install` call.
    Explicit,
    /// First use through `get()` with the provider's baseline configuration.
    Default,
}

struct Outcome<H> {
    handle: H,
    origin: InitOrigin,
    error: Option<InitError>,
}

/// Single-assignment holder for a subsystem handle.
pub struct ProviderCell<H> {
    subsystem: &'static str,
    state: OnceLock<Outcome<H>>,
}

impl<H> fmt::Debug for ProviderCell<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCell")
            .field("subsystem", &self.subsystem)
            .field("status", &self.status())
            .field("origin", &self.origin())
            .finish()
    }
}

impl<H> ProviderCell<H> {
    /// An uninitialized cell for the named subsystem.
    pub const fn new(subsystem: &'static str) -> Self {
        ProviderCell {
            subsystem,
            state: OnceLock::new(),
        }
    }

    /// Initialize the cell unless another caller already did.
    ///
    /// `setup` runs at most once across all callers. If it fails, `degraded`
    /// provides the handle installed in its place and the error is returned
    /// to this caller and every later one.
    pub fn init_with<S, D>(&self, origin: InitOrigin, setup: S, degraded: D) -> Result<(), InitError>
    where
        S: FnOnce() -> Result<H, InitError>,
        D: FnOnce() -> H,
    {
        let mut ran_setup = false;
        let outcome = self.state.get_or_init(|| {
            ran_setup = true;
            self.run_setup(origin, setup, degraded)
        });

        if !ran_setup && origin == InitOrigin::Explicit && outcome.origin == InitOrigin::Default {
            planx_warn!(
                name: "Provider.ExplicitConfigIgnored",
                subsystem = self.subsystem,
                message = "Provider was already initialized with its default configuration on first use. The explicit configuration is ignored."
            );
        }

        match &outcome.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// The handle, running the default setup first if the cell is still
    /// uninitialized.
    pub fn get_or_init_with<S, D>(&self, setup: S, degraded: D) -> &H
    where
        S: FnOnce() -> Result<H, InitError>,
        D: FnOnce() -> H,
    {
        &self
            .state
            .get_or_init(|| self.run_setup(InitOrigin::Default, setup, degraded))
            .handle
    }

    /// The handle if the cell has been initialized. Never triggers setup.
    pub fn get(&self) -> Option<&H> {
        self.state.get().map(|outcome| &outcome.handle)
    }

    /// Current state.
    pub fn status(&self) -> ProviderStatus {
        match self.state.get() {
            None => ProviderStatus::Uninitialized,
            Some(Outcome { error: None, .. }) => ProviderStatus::Ready,
            Some(Outcome { error: Some(_), .. }) => ProviderStatus::Degraded,
        }
    }

    /// Who won initialization, if anyone has.
    pub fn origin(&self) -> Option<InitOrigin> {
        self.state.get().map(|outcome| outcome.origin)
    }

    /// The stored setup error of a degraded cell.
    pub fn error(&self) -> Option<&InitError> {
        self.state.get().and_then(|outcome| outcome.error.as_ref())
    }

    fn run_setup<S, D>(&self, origin: InitOrigin, setup: S, degraded: D) -> Outcome<H>
    where
        S: FnOnce() -> Result<H, InitError>,
        D: FnOnce() -> H,
    {
        match setup() {
            Ok(handle) => {
                planx_debug!(
                    name: "Provider.Initialized",
                    subsystem = self.subsystem,
                    origin = format!("{origin:?}")
                );
                Outcome {
                    handle,
                    origin,
                    error: None,
                }
            }
            Err(err) => {
                planx_error!(
                    name: "Provider.InitFailed",
                    subsystem = self.subsystem,
                    error = err,
                    message = "Falling back to a no-op handle."
                );
                Outcome {
                    handle: degraded(),
                    origin,
                    error: Some(err),
                }
            }
        }
    }
}

/// Resource shared by every exporter: `service.name` and `service.version`.
pub(crate) fn build_resource(service_name: &str) -> Result<Resource, InitError> {
    validate_service_name(service_name)?;
    Ok(Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attribute(KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")))
        .build())
}
