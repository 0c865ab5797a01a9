use std::f64::consts::PI;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::trace;
use crate::error::{BlochError, Result, check_compartments};
use crate::expm::BlochMcConnellWorkspace;
use crate::matrix::{Block, BlochMatrix};
use crate::propagator::{AffineOp, AffineOpMC};
use crate::spin::{GAMBAR, Gradient, Spin, SpinMC};

/// Hard RF rotation by `alpha` (rad) about the transverse axis at phase
/// `theta` (rad) from +x. Same sense as free precession (dM/dt = gamma M x B):
/// alpha = pi/2, theta = 0 tips +z onto +y.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InstantaneousRf {
    pub alpha:f64,
    pub theta:f64,
}

impl InstantaneousRf {
    pub fn new(alpha:f64,theta:f64) -> InstantaneousRf {
        InstantaneousRf{alpha,theta}
    }

    pub fn rotation(&self) -> BlochMatrix {
        let (sa,ca) = self.alpha.sin_cos();
        let (st,ct) = self.theta.sin_cos();
        BlochMatrix {
            xx: ct*ct + st*st*ca,  xy: ct*st*(1.0 - ca), xz: -st*sa,
            yx: ct*st*(1.0 - ca),  yy: st*st + ct*ct*ca, yz: ct*sa,
            zx: st*sa,             zy: -ct*sa,           zz: ca,
        }
    }

    /** The rotation undoing this one */
    pub fn inverse(&self) -> InstantaneousRf {
        InstantaneousRf{alpha:-self.alpha,theta:self.theta}
    }

    pub fn op(&self) -> AffineOp {
        AffineOp::linear(&self.rotation())
    }

    pub fn op_mc(&self,n:usize) -> AffineOpMC {
        AffineOpMC::block_diagonal(&self.rotation(),n)
    }
}

/// Gradient played during an RF waveform.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum GradientProfile {
    #[default]
    None,
    Constant(Gradient),
    /// One gradient per RF sample.
    PerSample(Vec<Gradient>),
}

/// Shaped RF pulse: complex B1 samples in G held for dt ms each.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RfWaveform {
    samples:Vec<Complex64>,
    dt:f64,
    phase_offset:f64,
    gradient:GradientProfile,
}

impl RfWaveform {
    pub fn new(samples:Vec<Complex64>,dt:f64,phase_offset:f64,gradient:GradientProfile) -> Result<RfWaveform> {
        if samples.is_empty() {
            return Err(BlochError::invalid("rf sample count",0.0));
        }
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(BlochError::invalid("dt",dt));
        }
        if let GradientProfile::PerSample(g) = &gradient {
            if g.len() != samples.len() {
                return Err(BlochError::WaveformLength{samples:samples.len(),gradients:g.len()});
            }
        }
        Ok(RfWaveform{samples,dt,phase_offset,gradient})
    }

    /** Constant-amplitude pulse of flip alpha at phase theta spread over n samples */
    pub fn hard(alpha:f64,theta:f64,duration:f64,n:usize) -> Result<RfWaveform> {
        if n == 0 {
            return Err(BlochError::invalid("rf sample count",0.0));
        }
        if !(duration > 0.0) {
            return Err(BlochError::invalid("duration",duration));
        }
        let dt = duration/n as f64;
        let amplitude = alpha/(2.0*PI*GAMBAR*duration/1000.0);
        RfWaveform::new(vec![Complex64::from_polar(amplitude,theta);n],dt,0.0,GradientProfile::None)
    }

    pub fn with_gradient(mut self,gradient:GradientProfile) -> Result<RfWaveform> {
        if let GradientProfile::PerSample(g) = &gradient {
            if g.len() != self.samples.len() {
                return Err(BlochError::WaveformLength{samples:self.samples.len(),gradients:g.len()});
            }
        }
        self.gradient = gradient;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn duration(&self) -> f64 {
        self.dt*self.samples.len() as f64
    }

    pub fn samples(&self) -> &[Complex64] {
        &self.samples
    }

    pub fn gradient(&self) -> &GradientProfile {
        &self.gradient
    }

    pub fn gradient_at(&self,k:usize) -> Option<&Gradient> {
        match &self.gradient {
            GradientProfile::None => None,
            GradientProfile::Constant(g) => Some(g),
            GradientProfile::PerSample(g) => g.get(k),
        }
    }

    /** Flip angle (rad) of sample k */
    pub fn flip_angle(&self,k:usize) -> f64 {
        2.0*PI*GAMBAR*self.samples[k].norm()*self.dt/1000.0
    }

    pub fn phase(&self,k:usize) -> f64 {
        self.samples[k].arg() + self.phase_offset
    }

    pub fn pulse(&self,k:usize) -> InstantaneousRf {
        InstantaneousRf::new(self.flip_angle(k),self.phase(k))
    }

    pub fn total_flip_angle(&self) -> f64 {
        (0..self.len()).map(|k| self.flip_angle(k)).sum()
    }
}

impl Spin {
    pub fn excite(&self,rf:&InstantaneousRf) -> AffineOp {
        rf.op()
    }

    /// Integrates a shaped pulse: each sample is a half step of free
    /// precession, the sample's hard rotation, and another half step.
    pub fn excite_waveform(&self,wf:&RfWaveform) -> Result<AffineOp> {
        trace!(samples = wf.len(),dt = wf.dt(),"waveform excitation");
        let half_dt = 0.5*wf.dt();
        let mut op = AffineOp::identity();
        let mut step = AffineOp::identity();
        let mut current:Option<Option<&Gradient>> = None;
        for k in 0..wf.len() {
            let g = wf.gradient_at(k);
            if current != Some(g) {
                step = AffineOp::from(self.freeprecess(half_dt,g)?);
                current = Some(g);
            }
            let r = wf.pulse(k).rotation();
            op = op.compose(&step);
            op = AffineOp::new(r*op.a,r.apply(&op.b));
            op = op.compose(&step);
        }
        Ok(op)
    }
}

impl SpinMC {
    /** The same rotation on every compartment */
    pub fn excite(&self,rf:&InstantaneousRf) -> AffineOpMC {
        rf.op_mc(self.n())
    }

    /// Shaped-pulse integration into `out` using the scratch held by `ws`.
    /// Allocation free.
    pub fn excite_waveform_into(&self,wf:&RfWaveform,ws:&mut BlochMcConnellWorkspace,out:&mut AffineOpMC) -> Result<()> {
        check_compartments(self.n(),ws.n())?;
        check_compartments(self.n(),out.n())?;
        trace!(compartments = self.n(),samples = wf.len(),dt = wf.dt(),"waveform excitation");
        let half_dt = 0.5*wf.dt();
        out.set_identity();
        let mut offset:Option<f64> = None;
        for k in 0..wf.len() {
            let o = self.gradient_offset(wf.gradient_at(k));
            if offset != Some(o) {
                self.freeprecess_offset(half_dt,o,&mut ws.expm,&mut ws.step)?;
                offset = Some(o);
            }
            out.compose_into(&ws.step,&mut ws.scratch)?;
            std::mem::swap(out,&mut ws.scratch);
            out.then_block_diagonal(&wf.pulse(k).rotation());
            out.compose_into(&ws.step,&mut ws.scratch)?;
            std::mem::swap(out,&mut ws.scratch);
        }
        Ok(())
    }

    pub fn excite_waveform(&self,wf:&RfWaveform,ws:&mut BlochMcConnellWorkspace) -> Result<AffineOpMC> {
        let mut out = AffineOpMC::identity(self.n());
        self.excite_waveform_into(wf,ws,&mut out)?;
        Ok(out)
    }
}
