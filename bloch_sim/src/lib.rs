//! Bloch and Bloch-McConnell magnetization simulation.
//!
//! Every physical operation (free precession, RF excitation, spoiling) is an
//! affine map m -> A*m + B on the magnetization. Operations are built per
//! spin, composed, applied in place or solved for a periodic steady state.
//! Units: ms, Hz, G, G/cm, cm; angles in radians.

pub mod error;
pub mod magnetization;
pub mod matrix;
pub mod mcmatrix;
pub mod expm;
pub mod spin;
pub mod freeprecess;
pub mod excitation;
pub mod spoil;
pub mod propagator;
pub mod trajectory;
pub mod config;

pub use error::{BlochError, Result};
pub use magnetization::{Magnetization, MagnetizationMC, StateVector};
pub use matrix::{Block, BlochMatrix, BlochDynamicsMatrix, ExchangeDynamicsMatrix, FreePrecessionMatrix, IdealSpoilingMatrix};
pub use mcmatrix::{BlochMcConnellDynamicsMatrix, BlochMcConnellMatrix, exchange_index, exchange_pair};
pub use expm::{BlochMcConnellWorkspace, MatrixExponentialWorkspace};
pub use spin::{GAMBAR, GAMMA, Gradient, Position, Spin, SpinMC, SpinSystem};
pub use excitation::{GradientProfile, InstantaneousRf, RfWaveform};
pub use spoil::{GradientSpoiling, IdealSpoiling, RfSpoiling};
pub use propagator::{AffineOp, AffineOpMC, Propagator, combine};
pub use trajectory::trajectory;
pub use config::{ConfigFile, SpinConfig, SpinMCConfig};
