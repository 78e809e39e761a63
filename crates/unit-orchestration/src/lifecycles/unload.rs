use super::{Lifecycles, lifecycle_error};
use crate::{Error, Result};
use tracing::{debug, info};
use unit_registry::{Operation, UnitStatus};

impl<L> Lifecycles<L> {
    /// Unload a unit whose unload was requested: `NOT_MOUNTED |
    /// NOT_BOOTSTRAPPED -> UNLOADING -> NOT_LOADED`
    ///
    /// Units without a pending request are left alone. A mounted unit, or
    /// one with an operation in flight, keeps its request for a later pass.
    /// Everyone waiting on the request is answered once the unit settles.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let registry = &self.ctx.registry;
        if !registry.unload_requested(name)? {
            return Ok(());
        }

        match registry.status(name)? {
            UnitStatus::NotLoaded => {
                self.finish_unload(name, Ok(()));
                return Ok(());
            }
            status @ UnitStatus::SkipBecauseBroken => {
                self.finish_unload(
                    name,
                    Err(Error::UnloadAborted {
                        unit: name.to_string(),
                        status,
                    }),
                );
                return Ok(());
            }
            _ => {}
        }

        if registry
            .try_transition(
                name,
                &[UnitStatus::NotMounted, UnitStatus::NotBootstrapped],
                UnitStatus::Unloading,
            )?
            .is_none()
        {
            debug!("Unload of unit {} deferred: still in use", name);
            return Ok(());
        }

        // Units without an unload function unload immediately
        let result = match registry.lifecycles(name)? {
            Some(set) => self.run_chain(name, Operation::Unload, &set).await?,
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                registry.set_status(name, UnitStatus::NotLoaded)?;
                info!("Unloaded unit {}", name);
                self.finish_unload(name, Ok(()));
                Ok(())
            }
            Err(cause) => {
                let err = lifecycle_error(name, Operation::Unload, cause);
                self.finish_unload(name, Err(err.clone()));
                self.fail(name, err)
            }
        }
    }

    fn finish_unload(&self, name: &str, result: Result<()>) {
        self.ctx.registry.clear_unload_request(name);
        self.ctx.unloads.finish(name, result);
    }
}
