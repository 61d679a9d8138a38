//! Named fit predicates, priority functions and algorithm providers

use crate::algorithm::predicates::{
    HostName, MatchNodeSelector, NodeLabelPresence, PodFitsPorts, PodFitsResources,
    TaintToleration,
};
use crate::algorithm::priorities::{
    BalancedResourceAllocation, LeastRequestedPriority, NodeLabelPriority, ServiceAntiAffinity,
    ServiceSpreadingPriority,
};
use crate::algorithm::{FitPredicate, PriorityConfig, PriorityFunction};
use crate::error::{Result, SchedulerError};
use crate::listers::{NodeLister, PodLister, ServiceLister};
use crate::policy::{PredicatePolicy, PriorityPolicy};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the provider used when none is given
pub const DEFAULT_PROVIDER: &str = "DefaultProvider";

/// What plugin factories may build on
#[derive(Clone)]
pub struct PluginFactoryArgs {
    pub pod_lister: Arc<dyn PodLister>,
    pub service_lister: Arc<dyn ServiceLister>,
    pub node_lister: Arc<dyn NodeLister>,
}

pub type FitPredicateFactory =
    Arc<dyn Fn(&PluginFactoryArgs) -> Arc<dyn FitPredicate> + Send + Sync>;

pub type PriorityFunctionFactory =
    Arc<dyn Fn(&PluginFactoryArgs) -> Arc<dyn PriorityFunction> + Send + Sync>;

#[derive(Clone)]
struct PriorityEntry {
    factory: PriorityFunctionFactory,
    weight: i32,
}

/// Bundle of predicate and priority names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlgorithmProvider {
    pub fit_predicate_keys: BTreeSet<String>,
    pub priority_function_keys: BTreeSet<String>,
}

/// Registry of plugin factories
///
/// Each `ConfigFactory` owns one, so custom policies registered by one
/// scheduler never leak into another.
#[derive(Default)]
pub struct AlgorithmRegistry {
    fit_predicates: HashMap<String, FitPredicateFactory>,
    priorities: HashMap<String, PriorityEntry>,
    providers: HashMap<String, AlgorithmProvider>,
}

impl AlgorithmRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in plugins and `DefaultProvider`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        let predicates = [
            registry.register_fit_predicate("PodFitsResources", |_| Arc::new(PodFitsResources)),
            registry.register_fit_predicate("PodFitsPorts", |_| Arc::new(PodFitsPorts)),
            registry.register_fit_predicate("MatchNodeSelector", |_| Arc::new(MatchNodeSelector)),
            registry.register_fit_predicate("HostName", |_| Arc::new(HostName)),
            registry.register_fit_predicate("TaintToleration", |_| Arc::new(TaintToleration)),
        ];

        let priorities = [
            registry.register_priority_function(
                "LeastRequestedPriority",
                |_| Arc::new(LeastRequestedPriority),
                1,
            ),
            registry.register_priority_function(
                "BalancedResourceAllocation",
                |_| Arc::new(BalancedResourceAllocation),
                1,
            ),
            registry.register_priority_function(
                "ServiceSpreadingPriority",
                |args| {
                    Arc::new(ServiceSpreadingPriority::new(
                        args.pod_lister.clone(),
                        args.service_lister.clone(),
                    ))
                },
                1,
            ),
        ];

        registry.register_algorithm_provider(
            DEFAULT_PROVIDER,
            predicates.into_iter().collect(),
            priorities.into_iter().collect(),
        );
        registry
    }

    /// Register a predicate factory, replacing any previous one with the same name
    pub fn register_fit_predicate<F>(&mut self, name: &str, factory: F) -> String
    where
        F: Fn(&PluginFactoryArgs) -> Arc<dyn FitPredicate> + Send + Sync + 'static,
    {
        debug!("Registering fit predicate {}", name);
        self.fit_predicates
            .insert(name.to_string(), Arc::new(factory));
        name.to_string()
    }

    /// Register a priority factory with its weight
    pub fn register_priority_function<F>(&mut self, name: &str, factory: F, weight: i32) -> String
    where
        F: Fn(&PluginFactoryArgs) -> Arc<dyn PriorityFunction> + Send + Sync + 'static,
    {
        debug!("Registering priority function {} (weight {})", name, weight);
        self.priorities.insert(
            name.to_string(),
            PriorityEntry {
                factory: Arc::new(factory),
                weight,
            },
        );
        name.to_string()
    }

    /// Register a predicate described by a policy entry
    ///
    /// Entries with an argument define a new predicate under their name;
    /// entries without one must name a registered predicate.
    pub fn register_custom_fit_predicate(&mut self, policy: &PredicatePolicy) -> Result<String> {
        if let Some(presence) = policy
            .argument
            .as_ref()
            .and_then(|arg| arg.labels_presence.clone())
        {
            let name = policy.name.clone();
            return Ok(self.register_fit_predicate(&policy.name, move |_| {
                Arc::new(NodeLabelPresence::new(
                    name.clone(),
                    presence.labels.clone(),
                    presence.presence,
                ))
            }));
        }

        if self.fit_predicates.contains_key(&policy.name) {
            Ok(policy.name.clone())
        } else {
            Err(SchedulerError::unknown_predicate(&policy.name))
        }
    }

    /// Register a priority described by a policy entry
    ///
    /// Entries naming a registered priority take the policy's weight.
    pub fn register_custom_priority_function(&mut self, policy: &PriorityPolicy) -> Result<String> {
        if let Some(argument) = &policy.argument {
            let name = policy.name.clone();
            if let Some(anti_affinity) = argument.service_anti_affinity.clone() {
                return Ok(self.register_priority_function(
                    &policy.name,
                    move |args| {
                        Arc::new(ServiceAntiAffinity::new(
                            name.clone(),
                            anti_affinity.label.clone(),
                            args.pod_lister.clone(),
                            args.service_lister.clone(),
                        ))
                    },
                    policy.weight,
                ));
            }
            if let Some(preference) = argument.label_preference.clone() {
                return Ok(self.register_priority_function(
                    &policy.name,
                    move |_| {
                        Arc::new(NodeLabelPriority::new(
                            name.clone(),
                            preference.label.clone(),
                            preference.presence,
                        ))
                    },
                    policy.weight,
                ));
            }
        }

        match self.priorities.get_mut(&policy.name) {
            Some(entry) => {
                entry.weight = policy.weight;
                Ok(policy.name.clone())
            }
            None => Err(SchedulerError::unknown_priority(&policy.name)),
        }
    }

    pub fn register_algorithm_provider(
        &mut self,
        name: &str,
        fit_predicate_keys: BTreeSet<String>,
        priority_function_keys: BTreeSet<String>,
    ) -> String {
        info!(
            "Registering algorithm provider {} ({} predicates, {} priorities)",
            name,
            fit_predicate_keys.len(),
            priority_function_keys.len()
        );
        self.providers.insert(
            name.to_string(),
            AlgorithmProvider {
                fit_predicate_keys,
                priority_function_keys,
            },
        );
        name.to_string()
    }

    pub fn get_algorithm_provider(&self, name: &str) -> Result<&AlgorithmProvider> {
        self.providers
            .get(name)
            .ok_or_else(|| SchedulerError::unknown_provider(name))
    }

    /// Build the named predicates; fails on the first unknown name
    pub fn get_fit_predicates(
        &self,
        keys: &BTreeSet<String>,
        args: &PluginFactoryArgs,
    ) -> Result<Vec<Arc<dyn FitPredicate>>> {
        keys.iter()
            .map(|key| {
                self.fit_predicates
                    .get(key)
                    .map(|factory| factory(args))
                    .ok_or_else(|| SchedulerError::unknown_predicate(key))
            })
            .collect()
    }

    /// Build the named priorities with their registered weights
    pub fn get_priority_configs(
        &self,
        keys: &BTreeSet<String>,
        args: &PluginFactoryArgs,
    ) -> Result<Vec<PriorityConfig>> {
        keys.iter()
            .map(|key| {
                self.priorities
                    .get(key)
                    .map(|entry| PriorityConfig::new((entry.factory)(args), entry.weight))
                    .ok_or_else(|| SchedulerError::unknown_priority(key))
            })
            .collect()
    }

    pub fn is_fit_predicate_registered(&self, name: &str) -> bool {
        self.fit_predicates.contains_key(name)
    }

    pub fn is_priority_function_registered(&self, name: &str) -> bool {
        self.priorities.contains_key(name)
    }
}
