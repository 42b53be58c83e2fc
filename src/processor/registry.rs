//! Processor Registry
//!
//! Holds processor descriptors registered at startup and resolves a change
//! event to at most one of them. Resolution runs four stages in fixed order,
//! and within a stage the earliest registered descriptor wins:
//!
//! 1. explicit `processor:<name>` directive, exact name match
//! 2. a descriptor's business hint appearing anywhere in the raw client state
//! 3. a descriptor's resource path pattern matching the notification resource
//! 4. item identity (the containing list's display name) or a custom predicate
//!
//! Finding nothing is a normal outcome, not an error.

use std::fmt;
use std::sync::Arc;

use log::debug;
use regex::Regex;
use serde::Serialize;

use crate::directives::{contains_token, Directives};
use crate::model::Item;
use super::error::{ProcessorError, ProcessorResult};
use super::traits::{Processor, ProcessorContext};

/// Builds a processor instance for one event
pub type ProcessorFactory = Arc<dyn Fn(ProcessorContext) -> Box<dyn Processor> + Send + Sync>;

/// Custom stage-4 predicate over `(client_state, resource_path, item)`
pub type ProcessorPredicate = Arc<dyn Fn(&str, &str, Option<&Item>) -> bool + Send + Sync>;

/// Stateless description of a registered processor
#[derive(Clone)]
pub struct ProcessorDescriptor {
    pub name: String,
    pub hint: Option<String>,
    pub path_pattern: Option<Regex>,
    pub identity: Option<String>,
    predicate: Option<ProcessorPredicate>,
    factory: ProcessorFactory,
}

impl ProcessorDescriptor {
    pub fn new<F>(name: &str, factory: F) -> Self
    where
        F: Fn(ProcessorContext) -> Box<dyn Processor> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            hint: None,
            path_pattern: None,
            identity: None,
            predicate: None,
            factory: Arc::new(factory),
        }
    }

    /// Business hint token matched against the raw client state
    pub fn with_hint(mut self, hint: &str) -> Self {
        self.hint = Some(hint.to_string());
        self
    }

    /// Regular expression matched against the resource path
    pub fn with_path_pattern(mut self, pattern: &str) -> ProcessorResult<Self> {
        self.path_pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// List display name this processor is bound to
    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = Some(identity.to_string());
        self
    }

    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&str, &str, Option<&Item>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Instantiate the processor for one event
    pub fn build(&self, context: ProcessorContext) -> Box<dyn Processor> {
        (self.factory)(context)
    }

    fn matches_hint(&self, client_state: &str) -> bool {
        self.hint
            .as_deref()
            .map(|hint| contains_token(client_state, hint))
            .unwrap_or(false)
    }

    fn matches_path(&self, resource_path: &str) -> bool {
        self.path_pattern
            .as_ref()
            .map(|pattern| pattern.is_match(resource_path))
            .unwrap_or(false)
    }

    fn matches_item(&self, client_state: &str, resource_path: &str, item: Option<&Item>) -> bool {
        let identity_match = match (&self.identity, item.and_then(|i| i.list_display_name.as_deref())) {
            (Some(identity), Some(display_name)) => identity.eq_ignore_ascii_case(display_name.trim()),
            _ => false,
        };

        identity_match
            || self.predicate
                .as_ref()
                .map(|predicate| predicate(client_state, resource_path, item))
                .unwrap_or(false)
    }
}

impl fmt::Debug for ProcessorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorDescriptor")
            .field("name", &self.name)
            .field("hint", &self.hint)
            .field("path_pattern", &self.path_pattern.as_ref().map(|p| p.as_str()))
            .field("identity", &self.identity)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Which resolution stage produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStage {
    ExplicitName,
    BusinessHint,
    ResourcePath,
    ItemIdentity,
}

/// A resolved descriptor and how it was found
#[derive(Debug, Clone)]
pub struct Resolution {
    pub descriptor: Arc<ProcessorDescriptor>,
    pub stage: MatchStage,
}

/// Ordered set of processor descriptors
#[derive(Default)]
pub struct ProcessorRegistry {
    descriptors: Vec<Arc<ProcessorDescriptor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self { descriptors: Vec::new() }
    }

    /// Register a descriptor; registration order breaks ties within a stage
    pub fn register(&mut self, descriptor: ProcessorDescriptor) -> ProcessorResult<()> {
        if self.get(&descriptor.name).is_some() {
            return Err(ProcessorError::already_registered(&descriptor.name));
        }
        debug!("Registered processor '{}'", descriptor.name);
        self.descriptors.push(Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProcessorDescriptor>> {
        self.descriptors.iter().find(|d| d.name == name).cloned()
    }

    pub fn list_processors(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.name.clone()).collect()
    }

    pub fn processor_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Resolve a change event to zero or one processor
    pub fn resolve(&self, client_state: &str, resource_path: &str, item: Option<&Item>) -> Option<Resolution> {
        let directives = Directives::parse(client_state);

        if let Some(name) = directives.processor.as_deref() {
            if let Some(descriptor) = self.get(name) {
                return Some(Resolution { descriptor, stage: MatchStage::ExplicitName });
            }
            debug!("Explicit processor '{}' is not registered, trying other stages", name);
        }

        let stages: [(MatchStage, &dyn Fn(&ProcessorDescriptor) -> bool); 3] = [
            (MatchStage::BusinessHint, &|d: &ProcessorDescriptor| d.matches_hint(client_state)),
            (MatchStage::ResourcePath, &|d: &ProcessorDescriptor| d.matches_path(resource_path)),
            (MatchStage::ItemIdentity, &|d: &ProcessorDescriptor| d.matches_item(client_state, resource_path, item)),
        ];

        for (stage, matches) in stages {
            if let Some(descriptor) = self.descriptors.iter().find(|d| matches(d)) {
                debug!("Resolved processor '{}' via {:?}", descriptor.name, stage);
                return Some(Resolution { descriptor: Arc::clone(descriptor), stage });
            }
        }

        None
    }
}
