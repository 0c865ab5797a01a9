use std::f64::consts::PI;
use std::fmt;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{BlochError, Result, check_compartments};
use crate::magnetization::{Magnetization, MagnetizationMC};
use crate::matrix::{BlochDynamicsMatrix, ExchangeDynamicsMatrix};
use crate::mcmatrix::{BlochMcConnellDynamicsMatrix, exchange_pair};
use crate::propagator::{AffineOp, AffineOpMC, Propagator};

/// Proton gyromagnetic ratio over 2pi, Hz/G.
pub const GAMBAR:f64 = 4257.747892;
/// Proton gyromagnetic ratio, rad/s/G.
pub const GAMMA:f64 = 2.0*PI*GAMBAR;

/** Hz -> rad/ms */
#[inline]
pub fn hz_to_rad_per_ms(f:f64) -> f64 {
    2.0*PI*f/1000.0
}

/// Spin location in cm.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x:f64,
    pub y:f64,
    pub z:f64
}

impl Position {
    pub fn new(x:f64,y:f64,z:f64) -> Position {
        Position{x,y,z}
    }
}

/// Gradient amplitude in G/cm.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Gradient {
    pub x:f64,
    pub y:f64,
    pub z:f64
}

impl Gradient {
    pub fn new(x:f64,y:f64,z:f64) -> Gradient {
        Gradient{x,y,z}
    }

    /** Off-resonance (Hz) seen at pos */
    pub fn offset_hz(&self,pos:&Position) -> f64 {
        GAMBAR*(self.x*pos.x + self.y*pos.y + self.z*pos.z)
    }

    /** Off-resonance (rad/ms) seen at pos */
    pub fn offset(&self,pos:&Position) -> f64 {
        hz_to_rad_per_ms(self.offset_hz(pos))
    }
}

fn check_relaxation(name:&'static str,t:f64) -> Result<()> {
    match t > 0.0 && !t.is_nan() {
        true => Ok(()),
        false => Err(BlochError::invalid(name,t))
    }
}

fn check_finite(name:&'static str,v:f64) -> Result<()> {
    match v.is_finite() {
        true => Ok(()),
        false => Err(BlochError::invalid(name,v))
    }
}

/// Single-compartment spin. Times in ms, off-resonance in Hz.
/// T1/T2 may be infinite (no relaxation).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spin {
    pub m:Magnetization,
    m0:f64,
    t1:f64,
    t2:f64,
    df:f64,
    pos:Position,
}

impl Spin {
    /** A spin at the origin, starting at thermal equilibrium */
    pub fn new(m0:f64,t1:f64,t2:f64,df:f64) -> Result<Spin> {
        if !(m0 >= 0.0) || !m0.is_finite() {
            return Err(BlochError::invalid("m0",m0));
        }
        check_relaxation("t1",t1)?;
        check_relaxation("t2",t2)?;
        check_finite("df",df)?;
        Ok(Spin{
            m:Magnetization::equilibrium(m0),
            m0,t1,t2,df,
            pos:Position::default(),
        })
    }

    pub fn with_position(mut self,pos:Position) -> Spin {
        self.pos = pos;
        self
    }

    pub fn with_magnetization(mut self,m:Magnetization) -> Spin {
        self.m = m;
        self
    }

    pub fn m0(&self) -> f64 {
        self.m0
    }
    pub fn t1(&self) -> f64 {
        self.t1
    }
    pub fn t2(&self) -> f64 {
        self.t2
    }
    pub fn df(&self) -> f64 {
        self.df
    }
    pub fn pos(&self) -> &Position {
        &self.pos
    }

    pub fn meq(&self) -> Magnetization {
        Magnetization::equilibrium(self.m0)
    }

    /** Gradient-induced off-resonance (rad/ms) at this spin */
    pub fn gradient_offset(&self,grad:Option<&Gradient>) -> f64 {
        grad.map_or(0.0,|g| g.offset(&self.pos))
    }

    /** Generator block (R1, R2, dw) including any gradient */
    pub fn dynamics(&self,grad:Option<&Gradient>) -> BlochDynamicsMatrix {
        BlochDynamicsMatrix::new(
            1.0/self.t1,
            1.0/self.t2,
            hz_to_rad_per_ms(self.df) + self.gradient_offset(grad),
        )
    }

    pub fn signal(&self) -> Complex64 {
        self.m.signal()
    }

    /** Apply an operation to this spin's magnetization in place */
    pub fn apply(&mut self,op:&AffineOp) {
        op.apply_to(&mut self.m);
    }
}

impl fmt::Display for Spin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "m:{}\nm0:{}\nt1:{}\nt2:{}\ndf:{}\npos:{:?}",
        self.m,self.m0,self.t1,self.t2,self.df,self.pos)
    }
}

/// Multi-compartment spin with first-order exchange between compartments.
///
/// `r[i][j]` is the rate (1/ms) at which compartment j's magnetization
/// converts to compartment i; the diagonal is ignored. Each compartment
/// relaxes toward frac[i]*m0, which is only a fixed point of the coupled
/// system when the rates are in detailed balance
/// (r[i][j]*frac[j] == r[j][i]*frac[i]).
#[derive(Clone, Debug, PartialEq)]
pub struct SpinMC {
    pub m:MagnetizationMC,
    m0:f64,
    frac:Vec<f64>,
    t1:Vec<f64>,
    t2:Vec<f64>,
    df:Vec<f64>,
    r:Vec<Vec<f64>>,
    pos:Position,
    meq:MagnetizationMC,
    generator:BlochMcConnellDynamicsMatrix,
}

const FRACTION_TOLERANCE:f64 = 1e-9;

impl SpinMC {
    pub fn new(m0:f64,frac:Vec<f64>,t1:Vec<f64>,t2:Vec<f64>,df:Vec<f64>,r:Vec<Vec<f64>>) -> Result<SpinMC> {
        let n = frac.len();
        if n == 0 {
            return Err(BlochError::CompartmentMismatch{expected:1,found:0});
        }
        check_compartments(n,t1.len())?;
        check_compartments(n,t2.len())?;
        check_compartments(n,df.len())?;
        if r.len() != n {
            return Err(BlochError::ExchangeTableShape{compartments:n,rows:r.len(),row:0,len:r.first().map_or(0,|row| row.len())});
        }
        if let Some((row,bad)) = r.iter().enumerate().find(|(_,row)| row.len() != n) {
            return Err(BlochError::ExchangeTableShape{compartments:n,rows:n,row,len:bad.len()});
        }
        if !(m0 >= 0.0) || !m0.is_finite() {
            return Err(BlochError::invalid("m0",m0));
        }
        for i in 0..n {
            if !(frac[i] >= 0.0) {
                return Err(BlochError::invalid("frac",frac[i]));
            }
            check_relaxation("t1",t1[i])?;
            check_relaxation("t2",t2[i])?;
            check_finite("df",df[i])?;
            for j in (0..n).filter(|j| *j != i) {
                if !(r[i][j] >= 0.0) || !r[i][j].is_finite() {
                    return Err(BlochError::invalid("exchange rate",r[i][j]));
                }
            }
        }
        let total:f64 = frac.iter().sum();
        if (total - 1.0).abs() > FRACTION_TOLERANCE {
            return Err(BlochError::invalid("sum of fractions",total));
        }

        // loss to other compartments adds to each compartment's own rates
        let a = (0..n).map(|i| {
            let out:f64 = (0..n).filter(|k| *k != i).map(|k| r[k][i]).sum();
            BlochDynamicsMatrix::new(1.0/t1[i] + out,1.0/t2[i] + out,hz_to_rad_per_ms(df[i]))
        }).collect();
        let e = (0..n*(n - 1)).map(|k| {
            let (i,j) = exchange_pair(k,n);
            ExchangeDynamicsMatrix::new(r[i][j])
        }).collect();
        let generator = BlochMcConnellDynamicsMatrix::new(a,e)?;
        let meq = MagnetizationMC::equilibrium(m0,&frac);
        debug!(compartments = n,m0,"built multi-compartment spin");

        Ok(SpinMC{
            m:meq.clone(),
            m0,frac,t1,t2,df,r,
            pos:Position::default(),
            meq,
            generator,
        })
    }

    pub fn with_position(mut self,pos:Position) -> SpinMC {
        self.pos = pos;
        self
    }

    pub fn with_magnetization(mut self,m:MagnetizationMC) -> Result<SpinMC> {
        check_compartments(self.n(),m.n())?;
        self.m = m;
        Ok(self)
    }

    pub fn n(&self) -> usize {
        self.frac.len()
    }
    pub fn m0(&self) -> f64 {
        self.m0
    }
    pub fn frac(&self) -> &[f64] {
        &self.frac
    }
    pub fn t1(&self) -> &[f64] {
        &self.t1
    }
    pub fn t2(&self) -> &[f64] {
        &self.t2
    }
    pub fn df(&self) -> &[f64] {
        &self.df
    }
    pub fn exchange_rates(&self) -> &[Vec<f64>] {
        &self.r
    }
    pub fn pos(&self) -> &Position {
        &self.pos
    }
    pub fn meq(&self) -> &MagnetizationMC {
        &self.meq
    }
    pub fn generator(&self) -> &BlochMcConnellDynamicsMatrix {
        &self.generator
    }

    pub fn gradient_offset(&self,grad:Option<&Gradient>) -> f64 {
        grad.map_or(0.0,|g| g.offset(&self.pos))
    }

    pub fn signal(&self) -> Complex64 {
        self.m.signal()
    }

    pub fn apply(&mut self,op:&AffineOpMC) -> Result<()> {
        op.apply(&mut self.m)
    }
}

/// Ensemble of independent spins, e.g. isochromats spread across a voxel.
#[derive(Clone, Debug, Default)]
pub struct SpinSystem {
    pub spins:Vec<Spin>,
}

impl SpinSystem {
    pub fn new() -> SpinSystem {
        SpinSystem{spins:Vec::new()}
    }

    /** Copies of `template` placed at each position */
    pub fn isochromats(template:&Spin,positions:&[Position]) -> SpinSystem {
        SpinSystem{
            spins:positions.iter().map(|p| template.clone().with_position(*p)).collect()
        }
    }

    /** Apply the operation built for each spin by `op` */
    pub fn apply<F>(&mut self,mut op:F) -> Result<()>
    where F:FnMut(&Spin) -> Result<AffineOp> {
        for spin in self.spins.iter_mut() {
            let a = op(spin)?;
            spin.apply(&a);
        }
        Ok(())
    }

    pub fn mean_magnetization(&self) -> Magnetization {
        match self.spins.len() {
            0 => Magnetization::null(),
            n => self.spins.iter().fold(Magnetization::null(),|acc,s| acc + s.m)*(1.0/n as f64)
        }
    }

    pub fn signal(&self) -> Complex64 {
        self.mean_magnetization().signal()
    }
}
