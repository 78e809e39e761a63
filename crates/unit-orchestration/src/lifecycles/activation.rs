use super::Lifecycles;
use crate::Result;
use unit_registry::{Operation, UnitStatus};

impl<L> Lifecycles<L> {
    /// Bootstrap a loaded unit: `NOT_BOOTSTRAPPED -> BOOTSTRAPPING ->
    /// NOT_MOUNTED`. Returns immediately if the unit is already
    /// bootstrapped.
    pub async fn bootstrap(&self, name: &str) -> Result<()> {
        self.transition(name, Operation::Bootstrap, UnitStatus::NotBootstrapped)
            .await
    }

    /// Mount a bootstrapped unit: `NOT_MOUNTED -> MOUNTING -> MOUNTED`
    pub async fn mount(&self, name: &str) -> Result<()> {
        self.transition(name, Operation::Mount, UnitStatus::NotMounted)
            .await
    }

    /// Unmount a mounted unit: `MOUNTED -> UNMOUNTING -> NOT_MOUNTED`
    pub async fn unmount(&self, name: &str) -> Result<()> {
        self.transition(name, Operation::Unmount, UnitStatus::Mounted)
            .await
    }
}
