//! Job registry: name -> factory + settings loader.
//!
//! The orchestrator never names concrete job types. A platform registers a
//! factory under its job name and is instantiated on demand.

use adsync_core::{ConfigError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::job::Job;

/// Everything a factory receives to build a job.
pub struct JobSpec<'a, D> {
    /// Job name
    pub name: &'a str,
    /// Dependencies shared by every job (credentials, sinks)
    pub shared: &'a D,
    /// Loaded settings merged with any override
    pub settings: Value,
    /// Static parameters given at registration
    pub extra_params: &'a Map<String, Value>,
}

/// Builds a job instance.
pub type JobFactory<D> = Arc<dyn Fn(JobSpec<'_, D>) -> anyhow::Result<Arc<dyn Job>> + Send + Sync>;

/// Produces job-specific settings for a job name.
pub type ConfigLoader = Arc<dyn Fn(&str) -> anyhow::Result<Value> + Send + Sync>;

struct Registration<D> {
    factory: JobFactory<D>,
    loader: ConfigLoader,
    extra_params: Map<String, Value>,
}

/// Registry of runnable jobs, generic over the shared dependencies `D`.
pub struct JobRegistry<D> {
    entries: HashMap<String, Registration<D>>,
    overrides: HashMap<String, Value>,
}

impl<D> JobRegistry<D> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            overrides: HashMap::new(),
        }
    }

    /// Register a job. A later registration under the same name replaces it.
    pub fn register<F, L>(
        &mut self,
        name: impl Into<String>,
        factory: F,
        loader: L,
        extra_params: Map<String, Value>,
    ) where
        F: Fn(JobSpec<'_, D>) -> anyhow::Result<Arc<dyn Job>> + Send + Sync + 'static,
        L: Fn(&str) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(job = %name, "Registering job factory");
        self.entries.insert(
            name,
            Registration {
                factory: Arc::new(factory),
                loader: Arc::new(loader),
                extra_params,
            },
        );
    }

    /// Register a job whose settings are a fixed value.
    pub fn register_with_settings<F>(&mut self, name: impl Into<String>, factory: F, settings: Value)
    where
        F: Fn(JobSpec<'_, D>) -> anyhow::Result<Arc<dyn Job>> + Send + Sync + 'static,
    {
        self.register(name, factory, move |_: &str| Ok(settings.clone()), Map::new());
    }

    /// Override settings for one job; merged over the loader output.
    pub fn set_override(&mut self, name: impl Into<String>, settings: Value) {
        self.overrides.insert(name.into(), settings);
    }

    /// Builder form of [`JobRegistry::set_override`].
    pub fn with_override(mut self, name: impl Into<String>, settings: Value) -> Self {
        self.set_override(name, settings);
        self
    }

    /// Remove a registration.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.overrides.remove(name);
        self.entries.remove(name).is_some()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fail on the first name without a registration.
    pub fn ensure_registered<'a, I>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        match names.into_iter().find(|name| !self.contains(name)) {
            Some(missing) => Err(ConfigError::UnregisteredJob(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Load settings and construct the job registered under `name`.
    pub fn get_job(&self, name: &str, shared: &D) -> Result<Arc<dyn Job>> {
        let registration = self
            .entries
            .get(name)
            .ok_or_else(|| ConfigError::UnregisteredJob(name.to_string()))?;

        let loaded = (registration.loader)(name).map_err(|e| setup_error(name, e))?;
        let settings = match self.overrides.get(name) {
            Some(overlay) => merge_settings(loaded, overlay),
            None => loaded,
        };

        let spec = JobSpec {
            name,
            shared,
            settings,
            extra_params: &registration.extra_params,
        };

        let job = (registration.factory)(spec).map_err(|e| setup_error(name, e))?;
        debug!(job = name, "Constructed job");
        Ok(job)
    }
}

impl<D> Default for JobRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

fn setup_error(name: &str, err: anyhow::Error) -> ConfigError {
    ConfigError::JobSetup {
        job: name.to_string(),
        source: err.into(),
    }
}

/// Shallow merge: object keys from `overlay` win; a non-object overlay replaces.
fn merge_settings(base: Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                base.insert(key.clone(), value.clone());
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay.clone(),
    }
}
