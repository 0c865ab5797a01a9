/*
 Matrix exponential of the Bloch-McConnell generator.

 No generator block couples z to x/y, so exp(G t) splits into

   - a real n x n longitudinal exponential exp(L t), L_ii = -R1_i, L_ij = r_ij
   - a complex n x n transverse exponential exp(T t) acting on m = Mx + iMy,
     T_ii = -R2_i - i*dw_i, T_ij = r_ij

 and block (i,j) of the propagator is

     [ Re P  -Im P  0 ]
     [ Im P   Re P  0 ]
     [  0      0    Q ]

 with P = exp(T t)_ij and Q = exp(L t)_ij. One compartment is the usual
 E1/E2 closed form, two compartments use the closed form of a 2x2
 exponential, larger systems go through a scaling-and-squaring series held in
 a reusable workspace.
 */

use num_complex::Complex64;
use tracing::{debug, trace, warn};
use crate::error::{BlochError, Result, check_compartments};
use crate::matrix::{Block, BlochMatrix, BlochDynamicsMatrix, FreePrecessionMatrix};
use crate::mcmatrix::{BlochMcConnellDynamicsMatrix, BlochMcConnellMatrix};
use crate::propagator::AffineOpMC;

// below this |z| the cosh/sinhc pair is evaluated from its Taylor series
const SERIES_THRESHOLD:f64 = 1.0e-2;
const TAYLOR_TERMS:usize = 30;
// the series is evaluated on exp(X/2^s) with ||X/2^s|| below this
const SCALED_NORM:f64 = 0.5;
/// Largest exchange rate times duration for which the first-order
/// approximation is considered accurate.
pub const APPROX_RATE_TIME_LIMIT:f64 = 0.1;

/// e^(mu t)*(cosh(disc t), sinh(disc t)/disc). Both are even in disc so the
/// branch of the square root that produced disc does not matter, and the
/// disc -> 0 limit (cosh -> 1, sinh(disc t)/disc -> t) is exact.
fn cosh_sinhc(mu:Complex64,disc:Complex64,t:f64) -> (Complex64,Complex64) {
    let z = disc*t;
    if z.norm() < SERIES_THRESHOLD {
        let em = (mu*t).exp();
        let z2 = z*z;
        let cosh = 1.0 + z2*(0.5 + z2*(1.0/24.0 + z2/720.0));
        let sinhc = 1.0 + z2*(1.0/6.0 + z2*(1.0/120.0 + z2/5040.0));
        (em*cosh,em*sinhc*t)
    }else{
        let ep = ((mu + disc)*t).exp();
        let en = ((mu - disc)*t).exp();
        ((ep + en)*0.5,(ep - en)/(disc*2.0))
    }
}

/// (e^(a t) - e^(b t))/(a - b), equal to t*e^(a t) when a == b.
fn exp_divided_difference(a:Complex64,b:Complex64,t:f64) -> Complex64 {
    cosh_sinhc((a + b)*0.5,(a - b)*0.5,t).1
}

/// exp([[p,q],[s,u]] t) in closed form.
fn expm2(p:Complex64,q:Complex64,s:Complex64,u:Complex64,t:f64) -> [[Complex64;2];2] {
    let mu = (p + u)*0.5;
    let delta = (p - u)*0.5;
    let disc = (delta*delta + q*s).sqrt();
    let (ch,sh) = cosh_sinhc(mu,disc,t);
    [
        [ch + sh*delta,sh*q],
        [sh*s,ch - sh*delta],
    ]
}

#[inline]
fn transverse_rate(d:&BlochDynamicsMatrix,offset:f64) -> Complex64 {
    Complex64::new(-d.r2,-(d.dw + offset))
}

#[inline]
fn write_block(out:&mut BlochMatrix,p:Complex64,q:f64) {
    *out = BlochMatrix{xx:p.re,xy:-p.im,yx:p.im,yy:p.re,zz:q,..BlochMatrix::zeros()};
}

/// Exact propagator of a single compartment over t ms.
pub fn expm_single(d:&BlochDynamicsMatrix,t:f64) -> FreePrecessionMatrix {
    FreePrecessionMatrix::from_decay((-t*d.r1).exp(),(-t*d.r2).exp(),d.dw*t)
}

/// Scratch storage for the series exponential of an n x n complex matrix.
/// Sized once and reused; one computation at a time.
#[derive(Clone, Debug)]
pub struct MatrixExponentialWorkspace {
    n:usize,
    x:Vec<Complex64>,
    term:Vec<Complex64>,
    acc:Vec<Complex64>,
    tmp:Vec<Complex64>,
}

fn inf_norm(m:&[Complex64],n:usize) -> f64 {
    m.chunks(n).map(|row| row.iter().map(|v| v.norm()).sum::<f64>()).fold(0.0,f64::max)
}

fn set_identity(m:&mut [Complex64],n:usize) {
    m.iter_mut().enumerate().for_each(|(k,v)| {
        *v = if k/n == k%n {Complex64::new(1.0,0.0)} else {Complex64::new(0.0,0.0)}
    });
}

fn matmul(out:&mut [Complex64],a:&[Complex64],b:&[Complex64],n:usize) {
    for i in 0..n {
        for j in 0..n {
            let mut acc = Complex64::new(0.0,0.0);
            for k in 0..n {
                acc += a[i*n + k]*b[k*n + j];
            }
            out[i*n + j] = acc;
        }
    }
}

impl MatrixExponentialWorkspace {
    pub fn new(n:usize) -> MatrixExponentialWorkspace {
        let zeros = vec![Complex64::new(0.0,0.0);n*n];
        MatrixExponentialWorkspace{
            n,
            x:zeros.clone(),
            term:zeros.clone(),
            acc:zeros.clone(),
            tmp:zeros,
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    fn set(&mut self,i:usize,j:usize,value:Complex64) {
        self.x[i*self.n + j] = value;
    }

    fn result(&self,i:usize,j:usize) -> Complex64 {
        self.acc[i*self.n + j]
    }

    /// acc = exp(x t). x is overwritten.
    fn exponentiate(&mut self,t:f64) {
        let n = self.n;
        let norm = inf_norm(&self.x,n)*t.abs();
        let squarings = match norm > SCALED_NORM {
            true => (norm/SCALED_NORM).log2().ceil() as i32,
            false => 0
        };
        let scale = t/2f64.powi(squarings);
        self.x.iter_mut().for_each(|v| *v *= scale);

        set_identity(&mut self.acc,n);
        set_identity(&mut self.term,n);
        for k in 1..=TAYLOR_TERMS {
            matmul(&mut self.tmp,&self.term,&self.x,n);
            let inv = 1.0/k as f64;
            self.tmp.iter_mut().for_each(|v| *v *= inv);
            std::mem::swap(&mut self.term,&mut self.tmp);
            self.acc.iter_mut().zip(self.term.iter()).for_each(|(a,b)| *a += *b);
            if inf_norm(&self.term,n) <= f64::EPSILON*inf_norm(&self.acc,n) {
                break;
            }
        }
        for _ in 0..squarings {
            matmul(&mut self.tmp,&self.acc,&self.acc,n);
            std::mem::swap(&mut self.acc,&mut self.tmp);
        }
    }
}

/// Per-spin scratch for exact Bloch-McConnell free precession and waveform
/// excitation. Allocated once for a compartment count and reused every step.
/// Not shareable between threads while in use; build one per worker.
#[derive(Clone, Debug)]
pub struct BlochMcConnellWorkspace {
    n:usize,
    pub(crate) expm:MatrixExponentialWorkspace,
    pub(crate) step:AffineOpMC,
    pub(crate) scratch:AffineOpMC,
}

impl BlochMcConnellWorkspace {
    pub fn new(n:usize) -> Result<BlochMcConnellWorkspace> {
        if n == 0 {
            return Err(BlochError::CompartmentMismatch{expected:1,found:0});
        }
        debug!(compartments = n,"allocating Bloch-McConnell workspace");
        Ok(BlochMcConnellWorkspace{
            n,
            expm:MatrixExponentialWorkspace::new(n),
            step:AffineOpMC::identity(n),
            scratch:AffineOpMC::identity(n),
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn expm_workspace(&mut self) -> &mut MatrixExponentialWorkspace {
        &mut self.expm
    }
}

/// Exact propagator exp(a t) written into `out`. `offset` (rad/ms) is added
/// to every compartment's off-resonance, e.g. a gradient at the spin's
/// position. Allocation free.
pub fn expm(out:&mut BlochMcConnellMatrix,ws:&mut MatrixExponentialWorkspace,a:&BlochMcConnellDynamicsMatrix,t:f64,offset:f64) -> Result<()> {
    let n = a.n();
    check_compartments(n,out.n())?;
    check_compartments(n,ws.n())?;
    trace!(compartments = n,t,offset,"exact Bloch-McConnell exponential");
    match n {
        1 => {
            let d = a.dynamics(0);
            let shifted = BlochDynamicsMatrix::new(d.r1,d.r2,d.dw + offset);
            *out.block_mut(0,0) = expm_single(&shifted,t).to_matrix();
        }
        2 => expm_pair(out,a,t,offset),
        _ => expm_series(out,ws,a,t,offset),
    }
    Ok(())
}

fn expm_pair(out:&mut BlochMcConnellMatrix,a:&BlochMcConnellDynamicsMatrix,t:f64,offset:f64) {
    let r01 = Complex64::new(a.exchange(0,1).r,0.0);
    let r10 = Complex64::new(a.exchange(1,0).r,0.0);
    let (d0,d1) = (a.dynamics(0),a.dynamics(1));
    let p = expm2(transverse_rate(d0,offset),r01,r10,transverse_rate(d1,offset),t);
    let q = expm2(Complex64::new(-d0.r1,0.0),r01,r10,Complex64::new(-d1.r1,0.0),t);
    for i in 0..2 {
        for j in 0..2 {
            write_block(out.block_mut(i,j),p[i][j],q[i][j].re);
        }
    }
}

fn expm_series(out:&mut BlochMcConnellMatrix,ws:&mut MatrixExponentialWorkspace,a:&BlochMcConnellDynamicsMatrix,t:f64,offset:f64) {
    let n = a.n();
    for i in 0..n {
        for j in 0..n {
            let v = match i == j {
                true => transverse_rate(a.dynamics(i),offset),
                false => Complex64::new(a.exchange(i,j).r,0.0)
            };
            ws.set(i,j,v);
        }
    }
    ws.exponentiate(t);
    for i in 0..n {
        for j in 0..n {
            write_block(out.block_mut(i,j),ws.result(i,j),0.0);
        }
    }

    for i in 0..n {
        for j in 0..n {
            let v = match i == j {
                true => -a.dynamics(i).r1,
                false => a.exchange(i,j).r
            };
            ws.set(i,j,Complex64::new(v,0.0));
        }
    }
    ws.exponentiate(t);
    for i in 0..n {
        for j in 0..n {
            out.block_mut(i,j).zz = ws.result(i,j).re;
        }
    }
}

/// First-order (in the exchange rates) approximation of exp(a t):
/// diagonal blocks are the uncoupled exponentials, block (i,j) is
/// r_ij*(e^(d_i t) - e^(d_j t))/(d_i - d_j). Accurate while every r_ij*t is
/// small (see `APPROX_RATE_TIME_LIMIT`). Needs no workspace.
pub fn expm_approx(a:&BlochMcConnellDynamicsMatrix,t:f64,offset:f64) -> BlochMcConnellMatrix {
    let n = a.n();
    let rate_time = a.exchange_blocks().iter().map(|e| e.r).fold(0.0,f64::max)*t.abs();
    if rate_time > APPROX_RATE_TIME_LIMIT {
        warn!(rate_time,limit = APPROX_RATE_TIME_LIMIT,"first-order exchange approximation used outside its accuracy domain");
    }
    let mut out = BlochMcConnellMatrix::zeros(n);
    for i in 0..n {
        let di = transverse_rate(a.dynamics(i),offset);
        let li = Complex64::new(-a.dynamics(i).r1,0.0);
        for j in 0..n {
            let (p,q) = match i == j {
                true => ((di*t).exp(),(li*t).exp().re),
                false => {
                    let r = a.exchange(i,j).r;
                    let dj = transverse_rate(a.dynamics(j),offset);
                    let lj = Complex64::new(-a.dynamics(j).r1,0.0);
                    (exp_divided_difference(di,dj,t)*r,exp_divided_difference(li,lj,t).re*r)
                }
            };
            write_block(out.block_mut(i,j),p,q);
        }
    }
    out
}

#[cfg(test)]
mod tests {
use super::*;
use approx::assert_relative_eq;
use nalgebra::DMatrix;
use crate::matrix::ExchangeDynamicsMatrix;

fn generator(r1:&[f64],r2:&[f64],dw:&[f64],rate:f64) -> BlochMcConnellDynamicsMatrix {
    let n = r1.len();
    let a = (0..n).map(|i| BlochDynamicsMatrix::new(r1[i],r2[i],dw[i])).collect();
    let e = (0..n*(n - 1)).map(|k| ExchangeDynamicsMatrix::new(rate*(1.0 + 0.5*k as f64))).collect();
    BlochMcConnellDynamicsMatrix::new(a,e).unwrap()
}

fn dense_reference(a:&BlochMcConnellDynamicsMatrix,t:f64) -> DMatrix<f64> {
    (a.to_dense()*t).exp()
}

#[test]
fn cosh_sinhc_branches_agree_at_threshold(){
    let mu = Complex64::new(-0.02,0.3);
    let t = 10.0;
    let disc = Complex64::new(SERIES_THRESHOLD/t,0.0);
    let below = cosh_sinhc(mu,disc*0.999999,t);
    let above = cosh_sinhc(mu,disc*1.000001,t);
    assert!((below.0 - above.0).norm() < 1e-9);
    assert!((below.1 - above.1).norm() < 1e-9);
}

#[test]
fn divided_difference_limit(){
    let a = Complex64::new(-0.05,0.2);
    let t = 3.0;
    let d = exp_divided_difference(a,a,t);
    let expected = (a*t).exp()*t;
    assert!((d - expected).norm() < 1e-15);
}

#[test]
fn single_block_closed_form(){
    let d = BlochDynamicsMatrix::new(0.001,0.01,0.3);
    let t = 7.0;
    let f = expm_single(&d,t);
    let reference = (d.to_nalgebra()*t).exp();
    assert_relative_eq!(f.to_nalgebra(),reference,epsilon = 1e-12);
}

#[test]
fn pair_closed_form_matches_dense(){
    let a = generator(&[0.001,0.0025],&[0.01,0.05],&[0.0,0.0942],0.02);
    let mut out = BlochMcConnellMatrix::zeros(2);
    let mut ws = MatrixExponentialWorkspace::new(2);
    expm(&mut out,&mut ws,&a,20.0,0.0).unwrap();
    assert_relative_eq!(out.to_dense(),dense_reference(&a,20.0),epsilon = 1e-10);
}

#[test]
fn degenerate_pair_is_finite(){
    // identical compartments: no frequency or relaxation difference
    let a = generator(&[0.002,0.002],&[0.02,0.02],&[0.1,0.1],0.01);
    let mut out = BlochMcConnellMatrix::zeros(2);
    let mut ws = MatrixExponentialWorkspace::new(2);
    expm(&mut out,&mut ws,&a,15.0,0.0).unwrap();
    let dense = out.to_dense();
    assert!(dense.iter().all(|v| v.is_finite()));
    assert_relative_eq!(dense,dense_reference(&a,15.0),epsilon = 1e-10);

    // and with no exchange at all
    let a = generator(&[0.002,0.002],&[0.02,0.02],&[0.1,0.1],0.0);
    expm(&mut out,&mut ws,&a,15.0,0.0).unwrap();
    assert_relative_eq!(out.to_dense(),dense_reference(&a,15.0),epsilon = 1e-12);
}

#[test]
fn exceptional_point_pair_matches_dense(){
    // equal R2, symmetric exchange r and a frequency split of 2r: the
    // transverse block is defective and its discriminant vanishes
    let r = 0.01;
    let a = BlochMcConnellDynamicsMatrix::new(
        vec![BlochDynamicsMatrix::new(0.002,0.02,0.1 + 2.0*r),BlochDynamicsMatrix::new(0.0025,0.02,0.1)],
        vec![ExchangeDynamicsMatrix::new(r);2],
    ).unwrap();
    let mut out = BlochMcConnellMatrix::zeros(2);
    let mut ws = MatrixExponentialWorkspace::new(2);
    for t in [0.5,15.0,80.0] {
        expm(&mut out,&mut ws,&a,t,0.0).unwrap();
        let dense = out.to_dense();
        assert!(dense.iter().all(|v| v.is_finite()));
        assert_relative_eq!(dense,dense_reference(&a,t),epsilon = 1e-10);
    }
    // offset shifts both frequencies and keeps the split
    expm(&mut out,&mut ws,&a,15.0,0.3).unwrap();
    let shifted = BlochMcConnellDynamicsMatrix::new(
        vec![BlochDynamicsMatrix::new(0.002,0.02,0.4 + 2.0*r),BlochDynamicsMatrix::new(0.0025,0.02,0.4)],
        vec![ExchangeDynamicsMatrix::new(r);2],
    ).unwrap();
    assert_relative_eq!(out.to_dense(),dense_reference(&shifted,15.0),epsilon = 1e-10);
}

#[test]
fn series_matches_dense_for_three_and_four_compartments(){
    let a = generator(&[0.001,0.0025,0.0015],&[0.01,0.05,0.02],&[0.0,0.0942,-0.05],0.01);
    let mut out = BlochMcConnellMatrix::zeros(3);
    let mut ws = MatrixExponentialWorkspace::new(3);
    expm(&mut out,&mut ws,&a,25.0,0.0).unwrap();
    assert_relative_eq!(out.to_dense(),dense_reference(&a,25.0),epsilon = 1e-10);

    let a = generator(&[0.001,0.0025,0.0015,0.003],&[0.01,0.05,0.02,0.1],&[0.0,0.0942,-0.05,0.3],0.005);
    let mut out = BlochMcConnellMatrix::zeros(4);
    let mut ws = MatrixExponentialWorkspace::new(4);
    expm(&mut out,&mut ws,&a,100.0,0.0).unwrap();
    assert_relative_eq!(out.to_dense(),dense_reference(&a,100.0),epsilon = 1e-10);
}

#[test]
fn offset_shifts_every_compartment(){
    let offset = 0.07;
    let a = generator(&[0.001,0.0025],&[0.01,0.05],&[0.0,0.0942],0.02);
    let shifted = generator(&[0.001,0.0025],&[0.01,0.05],&[offset,0.0942 + offset],0.02);
    let mut ws = MatrixExponentialWorkspace::new(2);
    let mut out = BlochMcConnellMatrix::zeros(2);
    let mut expected = BlochMcConnellMatrix::zeros(2);
    expm(&mut out,&mut ws,&a,10.0,offset).unwrap();
    expm(&mut expected,&mut ws,&shifted,10.0,0.0).unwrap();
    assert!(out.max_abs_diff(&expected) < 1e-14);
    let approx = expm_approx(&a,10.0,offset);
    let approx_expected = expm_approx(&shifted,10.0,0.0);
    assert!(approx.max_abs_diff(&approx_expected) < 1e-14);
}

#[test]
fn approximation_is_exact_without_exchange(){
    let a = generator(&[0.001,0.0025,0.004],&[0.01,0.05,0.08],&[0.0,0.0942,0.2],0.0);
    let mut out = BlochMcConnellMatrix::zeros(3);
    let mut ws = MatrixExponentialWorkspace::new(3);
    expm(&mut out,&mut ws,&a,30.0,0.0).unwrap();
    assert!(expm_approx(&a,30.0,0.0).max_abs_diff(&out) < 1e-12);
}

#[test]
fn approximation_error_is_second_order(){
    let t = 5.0;
    let a = generator(&[0.001,0.0025],&[0.01,0.05],&[0.0,0.0942],0.001);
    let mut out = BlochMcConnellMatrix::zeros(2);
    let mut ws = MatrixExponentialWorkspace::new(2);
    expm(&mut out,&mut ws,&a,t,0.0).unwrap();
    let err = expm_approx(&a,t,0.0).max_abs_diff(&out);
    assert!(err > 0.0);
    assert!(err < 1e-4,"first order error too large: {}",err);
}

#[test]
fn mismatched_workspace_is_rejected(){
    let a = generator(&[0.001,0.0025],&[0.01,0.05],&[0.0,0.0942],0.02);
    let mut out = BlochMcConnellMatrix::zeros(2);
    let mut ws = MatrixExponentialWorkspace::new(3);
    assert!(matches!(expm(&mut out,&mut ws,&a,1.0,0.0),Err(BlochError::CompartmentMismatch{expected:2,found:3})));
    assert!(BlochMcConnellWorkspace::new(0).is_err());
}
}
