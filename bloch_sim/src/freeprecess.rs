use tracing::trace;
use crate::error::{BlochError, Result, check_compartments};
use crate::expm::{self, BlochMcConnellWorkspace, MatrixExponentialWorkspace, expm_single};
use crate::magnetization::Magnetization;
use crate::matrix::FreePrecessionMatrix;
use crate::propagator::AffineOpMC;
use crate::spin::{Gradient, Spin, SpinMC};

fn check_duration(t:f64) -> Result<()> {
    match t >= 0.0 && t.is_finite() {
        true => Ok(()),
        false => Err(BlochError::invalid("duration",t))
    }
}

impl Spin {
    /// Relaxation and precession for t ms, optionally under a gradient.
    /// Returns (A,B) with B = (I - A)*Meq.
    pub fn freeprecess(&self,t:f64,grad:Option<&Gradient>) -> Result<(FreePrecessionMatrix,Magnetization)> {
        check_duration(t)?;
        let a = expm_single(&self.dynamics(grad),t);
        let meq = self.meq();
        Ok((a,meq - a*meq))
    }
}

impl SpinMC {
    // exact propagator with an off-resonance offset (rad/ms) into out
    pub(crate) fn freeprecess_offset(&self,t:f64,offset:f64,ws:&mut MatrixExponentialWorkspace,out:&mut AffineOpMC) -> Result<()> {
        check_duration(t)?;
        check_compartments(self.n(),out.n())?;
        expm::expm(&mut out.a,ws,self.generator(),t,offset)?;
        out.a.subtract_mul(self.meq(),&mut out.b)
    }

    /// Exact free precession for t ms written into `out`, reusing `ws`.
    /// Allocation free.
    pub fn freeprecess(&self,t:f64,grad:Option<&Gradient>,ws:&mut BlochMcConnellWorkspace,out:&mut AffineOpMC) -> Result<()> {
        check_compartments(self.n(),ws.n())?;
        self.freeprecess_offset(t,self.gradient_offset(grad),&mut ws.expm,out)
    }

    /** Exact free precession, allocating its own workspace and result */
    pub fn freeprecess_exact(&self,t:f64,grad:Option<&Gradient>) -> Result<AffineOpMC> {
        let mut ws = MatrixExponentialWorkspace::new(self.n());
        let mut out = AffineOpMC::identity(self.n());
        self.freeprecess_offset(t,self.gradient_offset(grad),&mut ws,&mut out)?;
        Ok(out)
    }

    /// Free precession to first order in the exchange rates. Cheap and
    /// stateless, accurate while every rate times t is small.
    pub fn freeprecess_approx(&self,t:f64,grad:Option<&Gradient>) -> Result<AffineOpMC> {
        check_duration(t)?;
        trace!(compartments = self.n(),t,"approximate free precession");
        let a = expm::expm_approx(self.generator(),t,self.gradient_offset(grad));
        let mut b = self.meq().clone();
        a.subtract_mul(self.meq(),&mut b)?;
        AffineOpMC::new(a,b)
    }
}
