//! # Job Instance Ledger
//!
//! Per hook slot record of the job instances registered for the active
//! templates, and of the instances actually submitted to the cluster.
//!
//! Each template keeps its registered instances in order; only the latest
//! instance of each template takes part in the gate. The applied history
//! survives template re-derivation so status keeps showing earlier runs.

use crate::crd::{AnsibleJob, NamespacedName};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
struct TemplateInstances {
    template: String,
    instances: Vec<AnsibleJob>,
}

/// Ledger of one hook slot
#[derive(Debug, Clone, Default)]
pub struct JobInstances {
    templates: Vec<TemplateInstances>,
    applied: VecDeque<NamespacedName>,
}

impl JobInstances {
    /// Empty ledger that keeps the applied history of `previous`
    #[must_use]
    pub fn continuing(previous: &JobInstances) -> Self {
        Self {
            templates: Vec::new(),
            applied: previous.applied.clone(),
        }
    }

    /// Register an instance of `template`
    ///
    /// Re-registering an instance with the latest instance's name replaces it.
    pub fn register(&mut self, template: &str, instance: AnsibleJob) {
        let name = instance.metadata.name.clone();
        match self.templates.iter_mut().find(|t| t.template == template) {
            Some(entry) => match entry.instances.last_mut() {
                Some(latest) if latest.metadata.name == name => *latest = instance,
                _ => entry.instances.push(instance),
            },
            None => self.templates.push(TemplateInstances {
                template: template.to_string(),
                instances: vec![instance],
            }),
        }
    }

    /// True when no template is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Latest instance of every template, in discovery order
    pub fn latest(&self) -> impl Iterator<Item = &AnsibleJob> {
        self.templates.iter().filter_map(|t| t.instances.last())
    }

    /// Record a submitted instance, keeping at most `limit` entries
    ///
    /// Instances already in the history are not recorded again.
    pub fn record_applied(&mut self, key: NamespacedName, limit: usize) {
        if self.applied.contains(&key) {
            return;
        }
        self.applied.push_back(key);
        while self.applied.len() > limit.max(1) {
            self.applied.pop_front();
        }
    }

    /// Most recently submitted instance
    #[must_use]
    pub fn last_applied(&self) -> Option<&NamespacedName> {
        self.applied.back()
    }

    /// Submitted instances, oldest first, formatted `namespace/name`
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.applied.iter().map(ToString::to_string).collect()
    }
}
