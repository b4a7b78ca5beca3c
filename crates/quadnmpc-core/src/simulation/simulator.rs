//! Main simulation runner
//!
//! Plays the role of the physical vehicle: holds the true state, applies
//! saturated controls for one control period and flags envelope
//! violations.

use std::sync::Arc;

use log::debug;
use nalgebra::Vector4;

use crate::dynamics::{DiscreteTransition, Dynamics, ModelError, ModelVariant};
use crate::math::{quaternion_from_vector, tilt_angle};
use crate::VecX;

use super::{EnvelopeConfig, SimConfig};

/// Simulation output for one control period
#[derive(Debug, Clone)]
pub struct SimStep {
    /// Time at the end of the step [s]
    pub time: f64,
    /// State at the end of the step
    pub state: VecX,
    /// Control actually applied (after saturation)
    pub control: VecX,
    /// Whether the state is inside the envelope
    pub stable: bool,
}

/// Simulation history
#[derive(Debug, Clone, Default)]
pub struct SimHistory {
    /// Time stamps [s], one per recorded state
    pub times: Vec<f64>,
    /// States, starting with the initial state
    pub states: Vec<VecX>,
    /// Applied controls; `controls[k]` moved `states[k]` to `states[k + 1]`
    pub controls: Vec<VecX>,
}

impl SimHistory {
    fn start(state: &VecX) -> Self {
        Self {
            times: vec![0.0],
            states: vec![state.clone()],
            controls: Vec::new(),
        }
    }

    /// Get simulation duration
    pub fn duration(&self) -> f64 {
        match (self.times.first(), self.times.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Number of applied controls
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

/// Single-vehicle simulator
pub struct Simulator {
    /// Configuration
    pub config: SimConfig,
    model: Arc<dyn Dynamics>,
    transition: DiscreteTransition,
    initial_state: VecX,
    state: VecX,
    time: f64,
    history: SimHistory,
}

impl Simulator {
    /// Create a simulator for `variant` built from `config.physics`
    pub fn new(variant: ModelVariant, config: SimConfig) -> Result<Self, ModelError> {
        let model = variant.build(config.physics.clone());
        Self::with_model(model, config)
    }

    /// Create a simulator around an existing model
    pub fn with_model(model: Arc<dyn Dynamics>, config: SimConfig) -> Result<Self, ModelError> {
        let transition = DiscreteTransition::new(model.clone(), config.dt, config.substeps)?;

        let initial_state = match &config.initial_state {
            Some(x) if x.len() != model.state_dim() => {
                return Err(ModelError::StateLength {
                    expected: model.state_dim(),
                    got: x.len(),
                })
            }
            Some(x) => VecX::from_column_slice(x),
            None => model.hover_state(),
        };

        let history = SimHistory::start(&initial_state);

        Ok(Self {
            config,
            model,
            transition,
            state: initial_state.clone(),
            initial_state,
            time: 0.0,
            history,
        })
    }

    /// Reset simulation to initial state
    pub fn reset(&mut self) {
        self.state = self.initial_state.clone();
        self.time = 0.0;
        self.history = SimHistory::start(&self.state);
    }

    /// Overwrite the current state (for disturbance injection)
    pub fn set_state(&mut self, state: VecX) -> Result<(), ModelError> {
        if state.len() != self.model.state_dim() {
            return Err(ModelError::StateLength {
                expected: self.model.state_dim(),
                got: state.len(),
            });
        }
        self.state = state;
        Ok(())
    }

    /// Apply `control` for one control period
    ///
    /// The control is clamped to the model's actuator limits, as real
    /// actuators saturate.
    pub fn step(&mut self, control: &VecX) -> SimStep {
        let applied = self.model.control_bounds().clamp(control);
        if applied != *control {
            debug!("control saturated: {:?} -> {:?}", control.as_slice(), applied.as_slice());
        }

        self.state = self.transition.step(&self.state, &applied);
        self.time += self.config.dt;

        self.history.times.push(self.time);
        self.history.states.push(self.state.clone());
        self.history.controls.push(applied.clone());

        SimStep {
            time: self.time,
            state: self.state.clone(),
            control: applied,
            stable: self.is_stable(),
        }
    }

    /// Run with a state-feedback law until `duration` elapses or the
    /// vehicle leaves the envelope
    pub fn run<C>(&mut self, duration: f64, mut controller: C) -> &SimHistory
    where
        C: FnMut(f64, &VecX) -> VecX,
    {
        while self.time < duration - 1e-9 {
            let u = controller(self.time, &self.state);
            if !self.step(&u).stable {
                debug!("simulation left envelope at t={:.2}", self.time);
                break;
            }
        }
        &self.history
    }

    /// Whether the current state is inside the envelope
    pub fn is_stable(&self) -> bool {
        within_envelope(self.model.as_ref(), &self.state, &self.config.envelope)
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn state(&self) -> &VecX {
        &self.state
    }

    pub fn history(&self) -> &SimHistory {
        &self.history
    }

    pub fn model(&self) -> &Arc<dyn Dynamics> {
        &self.model
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }
}

/// Envelope check shared by the simulator and its callers
pub fn within_envelope(model: &dyn Dynamics, state: &VecX, envelope: &EnvelopeConfig) -> bool {
    if state.iter().any(|v| !v.is_finite()) {
        return false;
    }

    let variant = model.variant();
    let position = state.rows(0, variant.position_dim()).norm();
    let velocity = variant.velocity_slots();
    let speed = state.rows(velocity.start, velocity.len()).norm();
    if position > envelope.max_position || speed > envelope.max_speed {
        return false;
    }

    match model.orientation_slots() {
        Some(slots) => {
            let q = Vector4::new(
                state[slots.start],
                state[slots.start + 1],
                state[slots.start + 2],
                state[slots.start + 3],
            );
            quaternion_from_vector(&q)
                .map(|q| tilt_angle(&q) <= envelope.max_tilt)
                .unwrap_or(false)
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn hover_sim() -> Simulator {
        Simulator::new(ModelVariant::Full, SimConfig::default()).unwrap()
    }

    #[test]
    fn test_simulator_creation() {
        let sim = hover_sim();

        assert_eq!(sim.time(), 0.0);
        assert_eq!(sim.state().len(), 10);
        assert!(sim.is_stable());
        assert_eq!(sim.history().states.len(), 1);
    }

    #[test]
    fn test_wrong_initial_state_rejected() {
        let config = SimConfig {
            initial_state: Some(vec![0.0; 3]),
            ..SimConfig::default()
        };
        let err = Simulator::new(ModelVariant::Full, config).err();

        assert_eq!(err, Some(ModelError::StateLength { expected: 10, got: 3 }));
    }

    #[test]
    fn test_hover_holds_position() {
        let mut sim = hover_sim();
        let u = sim.model().hover_control();

        for _ in 0..10 {
            let step = sim.step(&u);
            assert!(step.stable);
        }

        assert_relative_eq!(sim.time(), 1.0, epsilon = 1e-10);
        assert_relative_eq!(sim.state()[2], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_control_saturates() {
        let mut sim = hover_sim();
        let step = sim.step(&VecX::from_vec(vec![100.0, 0.0, 0.0, 10.0]));

        assert_eq!(step.control.as_slice(), &[20.0, 0.0, 0.0, 6.0]);
    }

    #[test]
    fn test_free_fall_leaves_envelope() {
        let config = SimConfig {
            envelope: EnvelopeConfig {
                max_position: 1.0,
                ..EnvelopeConfig::default()
            },
            ..SimConfig::default()
        };
        let mut sim = Simulator::new(ModelVariant::Full, config).unwrap();

        // Minimum thrust is 2 m/s², so net acceleration is 2 - g
        let history = sim.run(5.0, |_t, _x| VecX::from_vec(vec![0.0, 0.0, 0.0, 0.0]));
        let z = history.states.last().map(|x| x[2]).unwrap();

        assert!(z < -1.0);
        assert!(sim.time() < 5.0);
        assert!(!sim.is_stable());
        assert!(sim.history().controls.iter().all(|u| u[0] == 2.0));
    }

    #[test]
    fn test_reset() {
        let mut sim = hover_sim();
        sim.step(&VecX::from_vec(vec![15.0, 0.0, 0.0, 0.0]));
        assert!(sim.state()[2] > 0.0);

        sim.reset();

        assert_eq!(sim.time(), 0.0);
        assert_eq!(sim.state(), &sim.model().hover_state());
        assert!(sim.history().is_empty());
    }

    #[test]
    fn test_set_state_injects_disturbance() {
        let mut sim = hover_sim();
        let u = sim.model().hover_control();
        let mut kicked = sim.state().clone();
        kicked[9] = 1.0;

        sim.set_state(kicked).unwrap();
        sim.step(&u);

        // Hover thrust cancels gravity, so the kick coasts
        assert_relative_eq!(sim.state()[2], 0.1, epsilon = 1e-10);
        assert_relative_eq!(sim.state()[9], 1.0, epsilon = 1e-10);

        let err = sim.set_state(VecX::zeros(6)).unwrap_err();
        assert_eq!(err, ModelError::StateLength { expected: 10, got: 6 });
        assert_eq!(sim.state().len(), 10);

        sim.reset();
        assert_eq!(sim.state(), &sim.model().hover_state());
    }

    #[test]
    fn test_tilt_envelope() {
        let sim = hover_sim();
        let mut x = sim.model().hover_state();
        // 120° roll
        let q = nalgebra::UnitQuaternion::from_euler_angles(2.1, 0.0, 0.0);
        x[3] = q.w;
        x[4] = q.i;
        x[5] = q.j;
        x[6] = q.k;

        assert!(!within_envelope(sim.model().as_ref(), &x, &EnvelopeConfig::default()));
    }

    #[test]
    fn test_fixed_wing_cruise() {
        let mut sim = Simulator::new(ModelVariant::FixedWing, SimConfig::default()).unwrap();
        let u = sim.model().hover_control();
        let history = sim.run(2.0, |_t, _x| u.clone());

        assert_eq!(history.len(), 20);
        assert!(sim.is_stable());
        assert_relative_eq!(sim.state()[1], 0.0, epsilon = 1e-8);
    }
}
