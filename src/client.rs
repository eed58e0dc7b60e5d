//! High-level session façade.
//!
//! A [`Session`] chains the whole pipeline — include resolution, catalog
//! resolution, validation, execution — behind a handful of calls, holding
//! the loader, registry, backend and scheduling policy. Lower layers stay
//! directly usable for callers that need finer control.

use std::collections::HashMap;
use std::path::Path;

use crate::ast::{DeviceDirective, Document};
use crate::device::{
    load_root_file, load_root_text, resolve, Catalog, FsLoader, ResolvedDevice, SourceLoader,
};
use crate::diag::{Collector, SourceMap};
use crate::error::NemError;
use crate::exec::{Backend, Engine, Execution, ReferenceBackend, SchedPolicy};
use crate::registry::Registry;
use crate::validate::validate;

/// One caller-facing toolkit instance. No global state: everything an
/// execution needs is owned here and passed down explicitly.
#[derive(Debug)]
pub struct Session<L = FsLoader, B = ReferenceBackend> {
    loader: L,
    backend: B,
    registry: Registry,
    policy: SchedPolicy,
    sources: SourceMap,
    /// Parsed catalog documents accumulated by `load_catalog*`.
    docs: Vec<Document>,
    inputs: HashMap<String, Vec<u8>>,
    collector: Collector,
}

impl Session {
    /// Session with the filesystem loader, the embedded registry and the
    /// reference backend.
    pub fn new() -> Result<Self, NemError> {
        Ok(Self {
            loader: FsLoader,
            backend: ReferenceBackend::new(),
            registry: Registry::load_default()?,
            policy: SchedPolicy::default(),
            sources: SourceMap::new(),
            docs: Vec::new(),
            inputs: HashMap::new(),
            collector: Collector::new(),
        })
    }
}

impl<L: SourceLoader, B: Backend> Session<L, B> {
    pub fn with_loader<L2: SourceLoader>(self, loader: L2) -> Session<L2, B> {
        Session {
            loader,
            backend: self.backend,
            registry: self.registry,
            policy: self.policy,
            sources: self.sources,
            docs: self.docs,
            inputs: self.inputs,
            collector: self.collector,
        }
    }

    pub fn with_backend<B2: Backend>(self, backend: B2) -> Session<L, B2> {
        Session {
            loader: self.loader,
            backend,
            registry: self.registry,
            policy: self.policy,
            sources: self.sources,
            docs: self.docs,
            inputs: self.inputs,
            collector: self.collector,
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Preload a buffer's bytes for the next run.
    pub fn with_input(mut self, buffer: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.inputs.insert(buffer.into(), bytes);
        self
    }

    /// Diagnostics of the most recent operation.
    pub fn diagnostics(&self) -> &Collector {
        &self.collector
    }

    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Load a catalog file (and everything it includes) into the
    /// session. Problems land in [`Session::diagnostics`].
    pub fn load_catalog_file(&mut self, path: impl AsRef<Path>) -> Result<(), NemError> {
        let docs = load_root_file(
            path.as_ref(),
            &self.loader,
            &mut self.sources,
            &mut self.collector,
        );
        self.docs.extend(docs);
        if self.collector.has_errors() {
            return Err(NemError::Validation {
                errors: self.collector.error_count(),
            });
        }
        Ok(())
    }

    /// Load catalog source text under a label.
    pub fn load_catalog_text(&mut self, label: &str, text: &str) -> Result<(), NemError> {
        let docs = load_root_text(
            label,
            text,
            &self.loader,
            &mut self.sources,
            &mut self.collector,
        );
        self.docs.extend(docs);
        if self.collector.has_errors() {
            return Err(NemError::Validation {
                errors: self.collector.error_count(),
            });
        }
        Ok(())
    }

    /// Resolve the catalogs loaded so far, without running anything.
    pub fn resolve_catalog(&mut self) -> Catalog {
        resolve(&self.docs, &mut self.collector)
    }

    /// Check the registry's family references against the loaded
    /// catalogs.
    pub fn verify_registry(&mut self) -> Result<(), NemError> {
        let catalog = self.resolve_catalog();
        self.registry.verify_against(&catalog)?;
        Ok(())
    }

    /// Parse, resolve, validate and execute a program file.
    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<Execution, NemError> {
        let text = self.loader.load(path.as_ref())?;
        let label = path.as_ref().display().to_string();
        self.run_source(&label, &text)
    }

    /// Parse, resolve, validate and execute program source text.
    pub fn run_source(&mut self, label: &str, text: &str) -> Result<Execution, NemError> {
        self.collector = Collector::new();

        let run_docs = load_root_text(
            label,
            text,
            &self.loader,
            &mut self.sources,
            &mut self.collector,
        );
        // The root document comes last in include order.
        let Some(program) = run_docs.last().and_then(Document::program) else {
            return Err(NemError::NotAProgram);
        };

        let mut all_docs: Vec<&Document> = self.docs.iter().collect();
        all_docs.extend(&run_docs);
        let owned: Vec<Document> = all_docs.into_iter().cloned().collect();
        let catalog = resolve(&owned, &mut self.collector);
        if self.collector.has_errors() {
            return Err(NemError::Validation {
                errors: self.collector.error_count(),
            });
        }

        let device = self.select_device(program, &catalog)?;
        let tables = validate(
            program,
            &catalog,
            device.as_ref(),
            &self.registry,
            &mut self.collector,
        );
        if self.collector.has_errors() {
            return Err(NemError::Validation {
                errors: self.collector.error_count(),
            });
        }
        let Some(device) = device else {
            return Err(NemError::NoDevice);
        };

        let mut engine = Engine::new(device, self.registry.clone(), &mut self.backend)
            .with_policy(self.policy);
        for (buffer, bytes) in &self.inputs {
            engine = engine.with_input(buffer.clone(), bytes.clone());
        }
        let execution = engine.run(program, &tables, &mut self.collector)?;
        Ok(execution)
    }

    fn select_device(
        &self,
        program: &crate::ast::Program,
        catalog: &Catalog,
    ) -> Result<Option<ResolvedDevice>, NemError> {
        let name = match &program.device {
            Some(DeviceDirective::Named(name)) => name.name.clone(),
            Some(DeviceDirective::Inline(decl)) => decl.name.name.clone(),
            None => return Ok(None),
        };
        match catalog.device(&name) {
            Some(device) => Ok(Some(device.clone())),
            None => Err(NemError::UnknownDevice { name }),
        }
    }
}
