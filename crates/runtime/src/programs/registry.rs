//! Name → program lookup.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;
use world_core::Entity;

use super::EntityProgram;
use super::error::RegistryError;

type Factory = Arc<dyn Fn() -> Box<dyn EntityProgram> + Send + Sync>;

/// How a registered name produces the program it runs.
#[derive(Clone)]
pub(crate) enum ProgramSource {
    /// One shared instance; at most one run at a time.
    Single(Arc<dyn EntityProgram>),
    /// A fresh instance per run.
    Factory(Factory),
}

impl ProgramSource {
    pub(crate) fn instantiate(&self) -> Arc<dyn EntityProgram> {
        match self {
            ProgramSource::Single(program) => program.clone(),
            ProgramSource::Factory(factory) => Arc::from(factory()),
        }
    }

    pub(crate) fn is_factory(&self) -> bool {
        matches!(self, ProgramSource::Factory(_))
    }
}

/// Registered entity programs, keyed by unique name.
#[derive(Default)]
pub struct ProgramRegistry {
    programs: RwLock<BTreeMap<String, ProgramSource>>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single-instance program.
    pub fn register(
        &self,
        name: impl Into<String>,
        program: impl EntityProgram + 'static,
    ) -> Result<(), RegistryError> {
        self.insert(name.into(), ProgramSource::Single(Arc::new(program)))
    }

    /// Registers a program that is instantiated afresh for every run.
    pub fn register_factory<F, P>(
        &self,
        name: impl Into<String>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: EntityProgram + 'static,
    {
        let factory: Factory = Arc::new(move || Box::new(factory()) as Box<dyn EntityProgram>);
        self.insert(name.into(), ProgramSource::Factory(factory))
    }

    pub(crate) fn insert(&self, name: String, source: ProgramSource) -> Result<(), RegistryError> {
        let mut programs = self.programs.write().unwrap_or_else(PoisonError::into_inner);
        if programs.contains_key(&name) {
            return Err(RegistryError::NameInUse { name });
        }
        debug!(target: "runtime::programs", program = %name, factory = source.is_factory(), "program registered");
        programs.insert(name, source);
        Ok(())
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<ProgramSource> {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn is_factory(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(|source| source.is_factory())
    }

    /// Registered names in sorted order.
    pub fn program_names(&self) -> Vec<String> {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Names of the programs that accept `entity`.
    pub fn programs_for_entity(&self, entity: &Entity) -> Vec<String> {
        let sources: Vec<(String, ProgramSource)> = self
            .programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, source)| (name.clone(), source.clone()))
            .collect();

        sources
            .into_iter()
            .filter(|(_, source)| source.instantiate().can_run_on(entity))
            .map(|(name, _)| name)
            .collect()
    }
}

impl std::fmt::Debug for ProgramRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramRegistry")
            .field("programs", &self.program_names())
            .finish()
    }
}
