//! Core unit registry implementation

use crate::{
    error::{Error, Result},
    lifecycle::{ActivityFn, LifecycleProps, LifecycleSet, UnitExports, UnitLoader},
    models::{UnitSnapshot, UnitStatus},
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything needed to register a unit
pub struct UnitRegistration<L> {
    name: String,
    loader: Arc<dyn UnitLoader>,
    activity: ActivityFn<L>,
    custom_props: serde_json::Value,
}

impl<L> UnitRegistration<L> {
    /// Registration from an async loader closure and an activity predicate
    pub fn new<F, Fut, A>(name: impl Into<String>, loader: F, activity: A) -> Self
    where
        F: Fn(LifecycleProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<UnitExports>> + Send + 'static,
        A: Fn(&L) -> bool + Send + Sync + 'static,
    {
        Self::with_loader(name, Arc::new(loader), activity)
    }

    /// Registration from an existing loader object
    pub fn with_loader<A>(name: impl Into<String>, loader: Arc<dyn UnitLoader>, activity: A) -> Self
    where
        A: Fn(&L) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            loader,
            activity: Arc::new(activity),
            custom_props: serde_json::Value::Null,
        }
    }

    /// Custom props passed to every lifecycle function of the unit
    pub fn with_custom_props(mut self, props: serde_json::Value) -> Self {
        self.custom_props = props;
        self
    }

    /// Unit name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A registered unit
struct UnitEntry<L> {
    status: UnitStatus,
    activity: ActivityFn<L>,
    loader: Arc<dyn UnitLoader>,
    custom_props: serde_json::Value,
    lifecycles: Option<Arc<LifecycleSet>>,
    unload_requested: bool,
    registered_at: DateTime<Utc>,
    last_status_change: DateTime<Utc>,
}

impl<L> UnitEntry<L> {
    fn snapshot(&self, name: &str) -> UnitSnapshot {
        UnitSnapshot {
            name: name.to_string(),
            status: self.status,
            has_lifecycles: self.lifecycles.is_some(),
            unload_requested: self.unload_requested,
            registered_at: self.registered_at,
            last_status_change: self.last_status_change,
        }
    }

    fn update_status(&mut self, status: UnitStatus) {
        self.status = status;
        self.last_status_change = Utc::now();
        // Exports do not survive an unload or a failure
        if matches!(status, UnitStatus::NotLoaded | UnitStatus::SkipBecauseBroken) {
            self.lifecycles = None;
        }
    }
}

/// The four disjoint unit sets of one reroute pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReroutePlan {
    /// Unload requested, not mounted and no longer needed
    pub to_unload: Vec<String>,
    /// Mounted but no longer active
    pub to_unmount: Vec<String>,
    /// Active but not loaded
    pub to_load: Vec<String>,
    /// Active, loaded and not mounted
    pub to_mount: Vec<String>,
}

impl ReroutePlan {
    /// Whether the plan touches no unit
    pub fn is_empty(&self) -> bool {
        self.to_unload.is_empty()
            && self.to_unmount.is_empty()
            && self.to_load.is_empty()
            && self.to_mount.is_empty()
    }

    /// All names in pass order: unload, unmount, load, mount
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.to_unload
            .iter()
            .chain(&self.to_unmount)
            .chain(&self.to_load)
            .chain(&self.to_mount)
    }
}

/// Selector view of a unit, taken under the lock and evaluated outside it
struct Candidate<L> {
    name: String,
    status: UnitStatus,
    unload_requested: bool,
    activity: ActivityFn<L>,
}

/// In-memory registry of units, keyed by name in registration order
pub struct Registry<L> {
    units: RwLock<IndexMap<String, UnitEntry<L>>>,
}

impl<L> Default for Registry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> Registry<L> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            units: RwLock::new(IndexMap::new()),
        }
    }

    /// Register a new unit
    pub fn register(&self, registration: UnitRegistration<L>) -> Result<()> {
        let UnitRegistration {
            name,
            loader,
            activity,
            custom_props,
        } = registration;

        if name.trim().is_empty() {
            return Err(Error::InvalidName(name));
        }

        let mut units = self.units.write();
        if units.contains_key(&name) {
            return Err(Error::UnitExists(name));
        }

        info!("Registering unit: {}", name);
        let now = Utc::now();
        units.insert(
            name,
            UnitEntry {
                status: UnitStatus::NotLoaded,
                activity,
                loader,
                custom_props,
                lifecycles: None,
                unload_requested: false,
                registered_at: now,
                last_status_change: now,
            },
        );
        Ok(())
    }

    /// Remove a unit, returning its last snapshot
    pub fn unregister(&self, name: &str) -> Result<UnitSnapshot> {
        let entry = self
            .units
            .write()
            .shift_remove(name)
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))?;

        info!("Unregistered unit: {} ({})", name, entry.status);
        Ok(entry.snapshot(name))
    }

    /// Whether a unit is registered
    pub fn contains(&self, name: &str) -> bool {
        self.units.read().contains_key(name)
    }

    /// Names of all units in registration order
    pub fn unit_names(&self) -> Vec<String> {
        self.units.read().keys().cloned().collect()
    }

    /// Number of registered units
    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    /// Whether no unit is registered
    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }

    /// Snapshot of a unit
    pub fn snapshot(&self, name: &str) -> Result<UnitSnapshot> {
        self.units
            .read()
            .get(name)
            .map(|entry| entry.snapshot(name))
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))
    }

    /// Snapshots of all units in registration order
    pub fn list(&self) -> Vec<UnitSnapshot> {
        self.units
            .read()
            .iter()
            .map(|(name, entry)| entry.snapshot(name))
            .collect()
    }

    /// Current status of a unit
    pub fn status(&self, name: &str) -> Result<UnitStatus> {
        self.units
            .read()
            .get(name)
            .map(|entry| entry.status)
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))
    }

    /// Set the status of a unit, returning the previous one
    ///
    /// Fails if `status` is not reachable from the current status in one
    /// arrow of the status table.
    pub fn set_status(&self, name: &str, status: UnitStatus) -> Result<UnitStatus> {
        let mut units = self.units.write();
        let entry = units
            .get_mut(name)
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))?;

        let old = entry.status;
        if !old.can_transition_to(status) {
            return Err(Error::InvalidStatusTransition {
                unit: name.to_string(),
                from: old,
                to: status,
            });
        }

        debug!("Unit {} status: {} -> {}", name, old, status);
        entry.update_status(status);
        Ok(old)
    }

    /// Move a unit to `to` if its current status is one of `from`
    ///
    /// Returns the previous status when the transition happened and `None`
    /// when the precondition did not hold. The check and the write happen
    /// under one lock.
    pub fn try_transition(
        &self,
        name: &str,
        from: &[UnitStatus],
        to: UnitStatus,
    ) -> Result<Option<UnitStatus>> {
        let mut units = self.units.write();
        let entry = units
            .get_mut(name)
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))?;

        let old = entry.status;
        if !from.contains(&old) {
            return Ok(None);
        }
        if !old.can_transition_to(to) {
            return Err(Error::InvalidStatusTransition {
                unit: name.to_string(),
                from: old,
                to,
            });
        }

        debug!("Unit {} status: {} -> {}", name, old, to);
        entry.update_status(to);
        Ok(Some(old))
    }

    /// Demote a unit to `SKIP_BECAUSE_BROKEN`. No-op if it already is.
    pub fn mark_broken(&self, name: &str) -> Result<UnitStatus> {
        let mut units = self.units.write();
        let entry = units
            .get_mut(name)
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))?;

        let old = entry.status;
        if !old.is_broken() {
            debug!("Unit {} status: {} -> {}", name, old, UnitStatus::SkipBecauseBroken);
            entry.update_status(UnitStatus::SkipBecauseBroken);
        }
        Ok(old)
    }

    /// Loader of a unit
    pub fn loader(&self, name: &str) -> Result<Arc<dyn UnitLoader>> {
        self.units
            .read()
            .get(name)
            .map(|entry| entry.loader.clone())
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))
    }

    /// Props for a lifecycle call on a unit
    pub fn props(&self, name: &str) -> Result<LifecycleProps> {
        self.units
            .read()
            .get(name)
            .map(|entry| LifecycleProps {
                name: name.to_string(),
                custom: entry.custom_props.clone(),
            })
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))
    }

    /// Install validated exports and advance a loading unit to
    /// `NOT_BOOTSTRAPPED`
    pub fn install_lifecycles(&self, name: &str, lifecycles: LifecycleSet) -> Result<()> {
        let mut units = self.units.write();
        let entry = units
            .get_mut(name)
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))?;

        let old = entry.status;
        if !old.can_transition_to(UnitStatus::NotBootstrapped) {
            return Err(Error::InvalidStatusTransition {
                unit: name.to_string(),
                from: old,
                to: UnitStatus::NotBootstrapped,
            });
        }

        debug!("Unit {} status: {} -> {}", name, old, UnitStatus::NotBootstrapped);
        entry.lifecycles = Some(Arc::new(lifecycles));
        entry.update_status(UnitStatus::NotBootstrapped);
        Ok(())
    }

    /// Installed exports of a unit, if it is loaded
    pub fn lifecycles(&self, name: &str) -> Result<Option<Arc<LifecycleSet>>> {
        self.units
            .read()
            .get(name)
            .map(|entry| entry.lifecycles.clone())
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))
    }

    /// Flag a unit for unloading
    pub fn request_unload(&self, name: &str) -> Result<()> {
        let mut units = self.units.write();
        let entry = units
            .get_mut(name)
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))?;
        entry.unload_requested = true;
        Ok(())
    }

    /// Clear the unload flag of a unit. Missing units are ignored.
    pub fn clear_unload_request(&self, name: &str) {
        if let Some(entry) = self.units.write().get_mut(name) {
            entry.unload_requested = false;
        }
    }

    /// Whether an unload is pending for a unit
    pub fn unload_requested(&self, name: &str) -> Result<bool> {
        self.units
            .read()
            .get(name)
            .map(|entry| entry.unload_requested)
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))
    }

    /// Names of mounted units in registration order
    pub fn mounted_unit_names(&self) -> Vec<String> {
        self.units
            .read()
            .iter()
            .filter(|(_, entry)| entry.status.is_active())
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn candidates(&self) -> Vec<Candidate<L>> {
        self.units
            .read()
            .iter()
            .map(|(name, entry)| Candidate {
                name: name.clone(),
                status: entry.status,
                unload_requested: entry.unload_requested,
                activity: entry.activity.clone(),
            })
            .collect()
    }

    /// Evaluate a unit's activity predicate
    pub fn should_be_active(&self, name: &str, location: &L) -> Result<bool> {
        let activity = self
            .units
            .read()
            .get(name)
            .map(|entry| entry.activity.clone())
            .ok_or_else(|| Error::UnitNotFound(name.to_string()))?;
        Ok(activity(location))
    }

    /// Names of all units whose predicate holds for `location`, in
    /// registration order. Statuses are not consulted.
    pub fn check_activity(&self, location: &L) -> Vec<String> {
        self.candidates()
            .into_iter()
            .filter(|unit| (unit.activity)(location))
            .map(|unit| unit.name)
            .collect()
    }

    /// Units that are active but whose code is not loaded
    pub fn units_to_load(&self, location: &L) -> Vec<String> {
        self.plan(location).to_load
    }

    /// Mounted units that are no longer active
    pub fn units_to_unmount(&self, location: &L) -> Vec<String> {
        self.plan(location).to_unmount
    }

    /// Loaded, unmounted units that are active
    pub fn units_to_mount(&self, location: &L) -> Vec<String> {
        self.plan(location).to_mount
    }

    /// Units with a pending unload that are neither mounted nor active
    pub fn units_to_unload(&self, location: &L) -> Vec<String> {
        self.plan(location).to_unload
    }

    /// Compute the four disjoint sets of a reroute pass
    ///
    /// Broken units and units with an operation in flight never appear.
    /// Each predicate is evaluated once, outside the registry lock.
    pub fn plan(&self, location: &L) -> ReroutePlan {
        let mut plan = ReroutePlan::default();

        for unit in self.candidates() {
            if unit.status.is_broken() {
                continue;
            }
            let active = (unit.activity)(location);

            match unit.status {
                UnitStatus::Mounted if !active => plan.to_unmount.push(unit.name),
                UnitStatus::NotLoaded if active => plan.to_load.push(unit.name),
                UnitStatus::NotLoaded if unit.unload_requested => plan.to_unload.push(unit.name),
                UnitStatus::NotBootstrapped | UnitStatus::NotMounted => {
                    if active {
                        plan.to_mount.push(unit.name);
                    } else if unit.unload_requested {
                        plan.to_unload.push(unit.name);
                    }
                }
                _ => {}
            }
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::UnitExports;

    fn registration(name: &str, prefix: &'static str) -> UnitRegistration<String> {
        UnitRegistration::new(
            name,
            |_props| async { anyhow::Ok(UnitExports::noop()) },
            move |path: &String| path.starts_with(prefix),
        )
    }

    fn walk(registry: &Registry<String>, name: &str, path: &[UnitStatus]) {
        for status in path {
            registry.set_status(name, *status).unwrap();
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = Registry::new();
        registry.register(registration("app1", "/app1")).unwrap();

        // Duplicate names are rejected
        assert_eq!(
            registry.register(registration("app1", "/other")),
            Err(Error::UnitExists("app1".to_string()))
        );
        // So are blank ones
        assert!(matches!(
            registry.register(registration("  ", "/")),
            Err(Error::InvalidName(_))
        ));

        let snapshot = registry.snapshot("app1").unwrap();
        assert_eq!(snapshot.status, UnitStatus::NotLoaded);
        assert!(!snapshot.has_lifecycles);
        assert_eq!(registry.unit_names(), vec!["app1"]);
        assert!(matches!(registry.status("nope"), Err(Error::UnitNotFound(_))));
    }

    #[test]
    fn test_set_status_enforces_table() {
        let registry = Registry::new();
        registry.register(registration("app1", "/app1")).unwrap();

        let err = registry.set_status("app1", UnitStatus::Mounted).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidStatusTransition {
                unit: "app1".to_string(),
                from: UnitStatus::NotLoaded,
                to: UnitStatus::Mounted,
            }
        );

        let old = registry
            .set_status("app1", UnitStatus::LoadingSourceCode)
            .unwrap();
        assert_eq!(old, UnitStatus::NotLoaded);
    }

    #[test]
    fn test_try_transition_precondition() {
        let registry = Registry::new();
        registry.register(registration("app1", "/app1")).unwrap();

        // Precondition not met: nothing happens
        let result = registry
            .try_transition("app1", &[UnitStatus::NotMounted], UnitStatus::Mounting)
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(registry.status("app1").unwrap(), UnitStatus::NotLoaded);

        let result = registry
            .try_transition("app1", &[UnitStatus::NotLoaded], UnitStatus::LoadingSourceCode)
            .unwrap();
        assert_eq!(result, Some(UnitStatus::NotLoaded));
    }

    #[test]
    fn test_lifecycles_cleared_on_unload_and_break() {
        let registry = Registry::new();
        registry.register(registration("app1", "/app1")).unwrap();
        registry.register(registration("app2", "/app2")).unwrap();

        for name in ["app1", "app2"] {
            registry
                .set_status(name, UnitStatus::LoadingSourceCode)
                .unwrap();
            let set = UnitExports::noop().validate(name).unwrap();
            registry.install_lifecycles(name, set).unwrap();
            assert!(registry.lifecycles(name).unwrap().is_some());
        }

        walk(
            &registry,
            "app1",
            &[UnitStatus::Unloading, UnitStatus::NotLoaded],
        );
        assert!(registry.lifecycles("app1").unwrap().is_none());

        assert_eq!(
            registry.mark_broken("app2").unwrap(),
            UnitStatus::NotBootstrapped
        );
        assert!(registry.lifecycles("app2").unwrap().is_none());
        // Broken is absorbing
        assert!(registry.set_status("app2", UnitStatus::NotLoaded).is_err());
    }

    #[test]
    fn test_check_activity_in_registration_order() {
        let registry = Registry::new();
        registry.register(registration("app1", "/app1")).unwrap();
        registry.register(registration("app2", "/app2")).unwrap();
        registry
            .register(UnitRegistration::new(
                "navbar",
                |_props| async { anyhow::Ok(UnitExports::noop()) },
                |_: &String| true,
            ))
            .unwrap();

        assert_eq!(
            registry.check_activity(&"/app1".to_string()),
            vec!["app1", "navbar"]
        );
        assert_eq!(
            registry.check_activity(&"/app2".to_string()),
            vec!["app2", "navbar"]
        );
        assert_eq!(registry.check_activity(&"/app3".to_string()), vec!["navbar"]);
    }

    #[test]
    fn test_plan_sets_are_disjoint() {
        use UnitStatus::*;

        let registry = Registry::new();
        for name in ["mounted-stale", "mounted-live", "bootstrapped", "fresh", "broken", "unload-me"] {
            registry.register(registration(name, "/live")).unwrap();
        }

        let loaded = [LoadingSourceCode, NotBootstrapped, Bootstrapping, NotMounted];
        walk(&registry, "mounted-stale", &loaded);
        walk(&registry, "mounted-stale", &[Mounting, Mounted]);
        walk(&registry, "mounted-live", &loaded);
        walk(&registry, "mounted-live", &[Mounting, Mounted]);
        walk(&registry, "bootstrapped", &loaded);
        walk(&registry, "unload-me", &loaded);
        registry.request_unload("unload-me").unwrap();
        registry.mark_broken("broken").unwrap();

        // Everything is active at /live
        let plan = registry.plan(&"/live".to_string());
        assert_eq!(plan.to_load, vec!["fresh"]);
        assert_eq!(plan.to_mount, vec!["bootstrapped", "unload-me"]);
        assert!(plan.to_unmount.is_empty());
        // Active units are never unloaded by a pass
        assert!(plan.to_unload.is_empty());

        // Nothing is active elsewhere
        let plan = registry.plan(&"/elsewhere".to_string());
        assert_eq!(plan.to_unmount, vec!["mounted-stale", "mounted-live"]);
        assert_eq!(plan.to_unload, vec!["unload-me"]);
        assert!(plan.to_load.is_empty());
        assert!(plan.to_mount.is_empty());
        assert_eq!(plan.names().count(), 3);

        assert_eq!(
            registry.mounted_unit_names(),
            vec!["mounted-stale", "mounted-live"]
        );
    }

    #[test]
    fn test_unregister() {
        let registry = Registry::new();
        registry.register(registration("app1", "/app1")).unwrap();

        let snapshot = registry.unregister("app1").unwrap();
        assert_eq!(snapshot.name, "app1");
        assert!(registry.is_empty());
        assert!(registry.unregister("app1").is_err());
    }

    #[test]
    fn test_custom_props() {
        let registry: Registry<String> = Registry::new();
        registry
            .register(
                registration("app1", "/app1")
                    .with_custom_props(serde_json::json!({ "theme": "dark" })),
            )
            .unwrap();

        let props = registry.props("app1").unwrap();
        assert_eq!(props.name, "app1");
        assert_eq!(props.custom["theme"], "dark");
    }
}
