use std::f64::consts::PI;
use serde::{Deserialize, Serialize};
use crate::error::Result;
use crate::excitation::InstantaneousRf;
use crate::expm::BlochMcConnellWorkspace;
use crate::magnetization::Magnetization;
use crate::matrix::IdealSpoilingMatrix;
use crate::propagator::{AffineOp, AffineOpMC};
use crate::spin::{Gradient, Spin, SpinMC};

/// Removes all transverse magnetization and keeps Mz, compartment by
/// compartment.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IdealSpoiling;

impl IdealSpoiling {
    pub fn matrix(&self) -> IdealSpoilingMatrix {
        IdealSpoilingMatrix
    }

    pub fn op(&self) -> AffineOp {
        AffineOp::linear(&IdealSpoilingMatrix)
    }

    pub fn op_mc(&self,n:usize) -> AffineOpMC {
        AffineOpMC::block_diagonal(&IdealSpoilingMatrix,n)
    }
}

fn spoiled(m:&Magnetization) -> Magnetization {
    Magnetization::new(0.0,0.0,m.z)
}

impl Spin {
    pub fn spoil(&mut self) {
        self.m = spoiled(&self.m);
    }
}

impl SpinMC {
    pub fn spoil(&mut self) {
        self.m.iter_mut().for_each(|m| *m = spoiled(m));
    }
}

/// Dephasing by a gradient lobe: free precession for `duration` ms under
/// `gradient`. Spoils only when averaged over positions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GradientSpoiling {
    pub gradient:Gradient,
    pub duration:f64,
}

impl GradientSpoiling {
    pub fn new(gradient:Gradient,duration:f64) -> GradientSpoiling {
        GradientSpoiling{gradient,duration}
    }

    /** Gradient area in G*ms/cm */
    pub fn area(&self) -> Gradient {
        Gradient::new(self.gradient.x*self.duration,self.gradient.y*self.duration,self.gradient.z*self.duration)
    }

    pub fn op(&self,spin:&Spin) -> Result<AffineOp> {
        Ok(AffineOp::from(spin.freeprecess(self.duration,Some(&self.gradient))?))
    }

    pub fn op_mc(&self,spin:&SpinMC,ws:&mut BlochMcConnellWorkspace) -> Result<AffineOpMC> {
        let mut out = AffineOpMC::identity(spin.n());
        spin.freeprecess(self.duration,Some(&self.gradient),ws,&mut out)?;
        Ok(out)
    }
}

/// Quadratic RF phase cycling: excitation k is played at phase
/// increment*k*(k+1)/2.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RfSpoiling {
    pub increment:f64,
}

impl RfSpoiling {
    pub fn new(increment:f64) -> RfSpoiling {
        RfSpoiling{increment}
    }

    /** 117 degrees, the usual choice for spoiled gradient echo */
    pub fn standard() -> RfSpoiling {
        RfSpoiling{increment:117.0*PI/180.0}
    }

    /** Phase (rad, wrapped to [0, 2pi)) of the k-th excitation */
    pub fn phase(&self,k:usize) -> f64 {
        let k = k as f64;
        (self.increment*k*(k + 1.0)/2.0).rem_euclid(2.0*PI)
    }

    pub fn pulse(&self,k:usize,alpha:f64) -> InstantaneousRf {
        InstantaneousRf::new(alpha,self.phase(k))
    }
}

#[cfg(test)]
mod tests {
use super::*;
use approx::assert_relative_eq;
use crate::magnetization::MagnetizationMC;
use crate::propagator::Propagator;

#[test]
fn ideal_spoiling_keeps_mz(){
    let mut s = Spin::new(1.0,1000.0,100.0,0.0).unwrap().with_magnetization(Magnetization::new(0.3,-0.4,0.5));
    s.spoil();
    assert_eq!(s.m,Magnetization::new(0.0,0.0,0.5));
    let m = IdealSpoiling.op().transform(&Magnetization::new(0.3,-0.4,0.5));
    assert_eq!(m,s.m);
}

#[test]
fn ideal_spoiling_is_idempotent(){
    let once = IdealSpoiling.op_mc(3);
    let twice = once.compose(&once).unwrap();
    assert_eq!(once,twice);
    let single = IdealSpoiling.op();
    assert_eq!(single.compose(&single),single);
}

#[test]
fn multi_compartment_spoiling(){
    let mut s = SpinMC::new(1.0,vec![0.5,0.5],vec![400.0,800.0],vec![20.0,80.0],vec![0.0,0.0],vec![vec![0.0,0.0],vec![0.0,0.0]]).unwrap();
    s = s.with_magnetization(MagnetizationMC::new(vec![Magnetization::new(0.1,0.2,0.3),Magnetization::new(0.4,0.5,0.6)]).unwrap()).unwrap();
    let mut expected = s.m.clone();
    IdealSpoiling.op_mc(2).apply(&mut expected).unwrap();
    s.spoil();
    assert_eq!(s.m,expected);
    assert_eq!(s.m[1],Magnetization::new(0.0,0.0,0.6));
}

#[test]
fn rf_spoiling_phase_schedule(){
    let inc = 0.3;
    let rf = RfSpoiling::new(inc);
    assert_eq!(rf.phase(0),0.0);
    assert_relative_eq!(rf.phase(1),inc,epsilon = 1e-15);
    assert_relative_eq!(rf.phase(2),3.0*inc,epsilon = 1e-15);
    assert_relative_eq!(rf.phase(3),6.0*inc,epsilon = 1e-15);
    // successive differences grow linearly
    let std = RfSpoiling::standard();
    for k in 1..40 {
        let d = (std.phase(k) - std.phase(k - 1)).rem_euclid(2.0*PI);
        assert_relative_eq!(d,(std.increment*k as f64).rem_euclid(2.0*PI),epsilon = 1e-9);
    }
}

#[test]
fn gradient_spoiling_area(){
    let g = GradientSpoiling::new(Gradient::new(0.0,0.5,2.0),3.0);
    assert_eq!(g.area(),Gradient::new(0.0,1.5,6.0));
}
}
