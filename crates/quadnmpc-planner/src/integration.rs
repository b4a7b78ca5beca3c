//! Bridge between the planner and the quadnmpc-core simulator

use quadnmpc_core::simulation::{SimConfig, Simulator};
use quadnmpc_core::VecX;

use crate::config::MpcConfig;
use crate::error::ConfigurationError;
use crate::executor::{Vehicle, VehicleStep};

impl Vehicle for Simulator {
    fn current_state(&self) -> VecX {
        self.state().clone()
    }

    fn apply_control(&mut self, control: &VecX) -> VehicleStep {
        let step = self.step(control);
        VehicleStep {
            next_state: step.state,
            stable: step.stable,
        }
    }
}

/// Simulator running the controller's model at the controller's stage period
///
/// Uses the controller's physical constants, so the plant and the prediction
/// model agree exactly apart from the finer integration step.
pub fn matched_simulator(config: &MpcConfig, initial_state: Option<VecX>) -> Result<Simulator, ConfigurationError> {
    let variant = config.variant()?;
    let sim_config = SimConfig {
        dt: config.horizon.dt,
        physics: config.physics.clone(),
        initial_state: initial_state.map(|x| x.as_slice().to_vec()),
        ..SimConfig::default()
    };
    Ok(Simulator::new(variant, sim_config)?)
}
