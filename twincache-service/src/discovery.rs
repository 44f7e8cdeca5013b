//! Name discovery.
//!
//! Produces the name sets a rebuild publishes:
//!
//! - exact whitelist names, always
//! - registry names matching a whitelist prefix, only when prefixes exist
//! - every simulation model property, unfiltered

use std::collections::BTreeSet;
use twincache_core::{NameSet, TwinCacheResult, Whitelist};
use twincache_upstream::{DeviceRegistry, SimulationRegistry};

/// Aggregates names from the device registry and the simulation service.
#[derive(Debug, Clone)]
pub struct NameDiscovery<D, M> {
    registry: D,
    simulation: M,
    whitelist: Whitelist,
}

impl<D, M> NameDiscovery<D, M>
where
    D: DeviceRegistry,
    M: SimulationRegistry,
{
    pub fn new(registry: D, simulation: M, whitelist: Whitelist) -> Self {
        Self {
            registry,
            simulation,
            whitelist,
        }
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// Exact whitelist names plus registry names matched by a prefix rule.
    pub async fn whitelisted_names(&self) -> TwinCacheResult<NameSet> {
        let mut names = self.whitelist.full_names().clone();

        if self.whitelist.has_prefixes() {
            let all = self.registry.twin_names().await?;
            names.union_with(&self.whitelist.filter_by_prefix(&all));
        } else {
            tracing::debug!("No prefix rules configured, device registry not queried");
        }

        Ok(names)
    }

    /// Reported-property names declared by simulation device models.
    pub async fn simulation_names(&self) -> TwinCacheResult<BTreeSet<String>> {
        self.simulation.reported_property_names().await
    }

    /// Run both lookups concurrently and merge them. The first failure wins.
    pub async fn gather(&self) -> TwinCacheResult<NameSet> {
        let (mut names, simulated) =
            tokio::try_join!(self.whitelisted_names(), self.simulation_names())?;
        names.reported_properties.extend(simulated);

        tracing::debug!(
            tags = names.tags.len(),
            reported = names.reported_properties.len(),
            "Gathered twin names"
        );
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twincache_test_utils::{name_set, ScriptedDeviceRegistry, ScriptedSimulationRegistry};

    fn registry() -> ScriptedDeviceRegistry {
        ScriptedDeviceRegistry::new(NameSet::new(
            ["Building", "Group", "Color"],
            ["Type", "Config.Interval", "Other"],
        ))
    }

    #[tokio::test]
    async fn test_gather_filters_registry_and_keeps_simulation() {
        let discovery = NameDiscovery::new(
            registry(),
            ScriptedSimulationRegistry::new(["MethodStatus"]),
            Whitelist::parse("tags.Building, tags.Group, reported.Type, reported.Config.*"),
        );

        let names = discovery.gather().await.unwrap();
        assert_eq!(names.tags, name_set(&["Building", "Group"]));
        assert_eq!(
            names.reported_properties,
            name_set(&["Config.Interval", "MethodStatus", "Type"])
        );
    }

    #[tokio::test]
    async fn test_exact_only_whitelist_skips_registry() {
        let registry = registry();
        let discovery = NameDiscovery::new(
            registry.clone(),
            ScriptedSimulationRegistry::new(Vec::<String>::new()),
            Whitelist::parse("tags.Building, reported.Type"),
        );

        let names = discovery.gather().await.unwrap();
        assert_eq!(registry.calls(), 0);
        assert_eq!(names, NameSet::new(["Building"], ["Type"]));
    }

    #[tokio::test]
    async fn test_exact_names_published_even_if_unknown_upstream() {
        let discovery = NameDiscovery::new(
            ScriptedDeviceRegistry::new(NameSet::default()),
            ScriptedSimulationRegistry::new(Vec::<String>::new()),
            Whitelist::parse("tags.Nowhere, tags.x*"),
        );
        let names = discovery.whitelisted_names().await.unwrap();
        assert_eq!(names.tags, name_set(&["Nowhere"]));
    }

    #[tokio::test]
    async fn test_upstream_failure_fails_gather() {
        let discovery = NameDiscovery::new(
            registry(),
            ScriptedSimulationRegistry::new(["MethodStatus"]).failing_first(1),
            Whitelist::parse("tags.*"),
        );
        let err = discovery.gather().await.unwrap_err();
        assert!(err.is_upstream());
    }
}
