use super::{Lifecycles, contain_panic, lifecycle_error, timeouts::reasonable_time};
use crate::Result;
use tracing::{debug, info};
use unit_registry::{Operation, UnitStatus};

impl<L> Lifecycles<L> {
    /// Load a unit: `NOT_LOADED -> LOADING_SOURCE_CODE -> NOT_BOOTSTRAPPED`
    ///
    /// The exports produced by the loader are validated here, once. Exports
    /// missing a required operation break the unit the same way a failing
    /// loader does.
    pub async fn load(&self, name: &str) -> Result<()> {
        let registry = &self.ctx.registry;

        if registry
            .try_transition(name, &[UnitStatus::NotLoaded], UnitStatus::LoadingSourceCode)?
            .is_none()
        {
            debug!("Skipping load of unit {}: already loaded", name);
            return Ok(());
        }

        let loader = registry.loader(name)?;
        let props = registry.props(name)?;
        let threshold = self.ctx.config.warning_threshold(Operation::Load, None);

        let exports = match reasonable_time(
            &self.ctx.notifier,
            name,
            Operation::Load,
            threshold,
            contain_panic(name, Operation::Load, loader.load(props)),
        )
        .await
        {
            Ok(exports) => exports,
            Err(cause) => return self.fail(name, lifecycle_error(name, Operation::Load, cause)),
        };

        match exports.validate(name) {
            Ok(set) => {
                registry.install_lifecycles(name, set)?;
                info!("Loaded unit {}", name);
                Ok(())
            }
            Err(err) => self.fail(name, err.into()),
        }
    }
}
