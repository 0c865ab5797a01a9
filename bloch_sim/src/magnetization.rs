use std::ops;
use std::fmt;
use ndarray::ArrayViewMut1;
use num_complex::Complex64;
use serde::{Serialize, Deserialize};
use crate::error::{BlochError, Result, check_compartments};

/// Magnetization of a single compartment in the rotating frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Magnetization {
    pub x:f64,
    pub y:f64,
    pub z:f64
}

impl Magnetization {
    pub fn new(x:f64,y:f64,z:f64) -> Magnetization {
        Magnetization{x,y,z}
    }

    /** Returns a null vector where all fields are 0.0 */
    pub fn null() -> Magnetization {
        Magnetization{x:0.0,y:0.0,z:0.0}
    }

    /** Thermal equilibrium (0,0,m0) */
    pub fn equilibrium(m0:f64) -> Magnetization {
        Magnetization{x:0.0,y:0.0,z:m0}
    }

    pub fn mag(&self) -> f64 {
        (self.x*self.x + self.y*self.y + self.z*self.z).sqrt()
    }

    /** Transverse magnetization as the complex signal Mx + iMy */
    pub fn signal(&self) -> Complex64 {
        Complex64::new(self.x,self.y)
    }

    pub fn to_array(&self) -> [f64;3] {
        [self.x,self.y,self.z]
    }

    pub fn max_abs_diff(&self,other:&Magnetization) -> f64 {
        (self.x - other.x).abs()
            .max((self.y - other.y).abs())
            .max((self.z - other.z).abs())
    }
}

/** Vector addition */
impl ops::Add<Magnetization> for Magnetization {
    type Output = Magnetization;
    fn add(self, rhs:Magnetization) -> Magnetization {
        Magnetization::new(self.x + rhs.x,self.y + rhs.y,self.z + rhs.z)
    }
}

/** Vector subtraction */
impl ops::Sub<Magnetization> for Magnetization {
    type Output = Magnetization;
    fn sub(self, rhs:Magnetization) -> Magnetization {
        Magnetization::new(self.x - rhs.x,self.y - rhs.y,self.z - rhs.z)
    }
}

impl ops::Neg for Magnetization {
    type Output = Magnetization;
    fn neg(self) -> Magnetization {
        Magnetization::new(-self.x,-self.y,-self.z)
    }
}

impl ops::AddAssign<Magnetization> for Magnetization {
    fn add_assign(&mut self, rhs:Magnetization) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl ops::SubAssign<Magnetization> for Magnetization {
    fn sub_assign(&mut self, rhs:Magnetization) {
        self.x -= rhs.x;
        self.y -= rhs.y;
        self.z -= rhs.z;
    }
}

/** Vector dot product */
impl ops::Mul<Magnetization> for Magnetization {
    type Output = f64;
    fn mul(self, rhs:Magnetization) -> f64 {
        self.x*rhs.x + self.y*rhs.y + self.z*rhs.z
    }
}

/** Vector-scalar multiplication */
impl ops::Mul<Magnetization> for f64 {
    type Output = Magnetization;
    fn mul(self,rhs:Magnetization) -> Magnetization {
        Magnetization::new(self*rhs.x, self*rhs.y, self*rhs.z)
    }
}

/** Vector-scalar multiplication (commutative) */
impl ops::Mul<f64> for Magnetization {
    type Output = Magnetization;
    fn mul(self,rhs:f64) -> Magnetization {
        Magnetization::new(self.x*rhs, self.y*rhs, self.z*rhs)
    }
}

impl fmt::Display for Magnetization {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{},{},{}", self.x,self.y,self.z)
    }
}

/// Magnetization of every compartment of a spin. Index i always refers to
/// the same physical compartment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MagnetizationMC(Vec<Magnetization>);

impl MagnetizationMC {
    pub fn new(compartments:Vec<Magnetization>) -> Result<MagnetizationMC> {
        if compartments.is_empty() {
            return Err(BlochError::CompartmentMismatch{expected:1,found:0});
        }
        Ok(MagnetizationMC(compartments))
    }

    pub fn null(n:usize) -> MagnetizationMC {
        MagnetizationMC(vec![Magnetization::null();n])
    }

    /** Equilibrium (0,0,frac[i]*m0) for each compartment */
    pub fn equilibrium(m0:f64,frac:&[f64]) -> MagnetizationMC {
        MagnetizationMC(frac.iter().map(|f| Magnetization::equilibrium(f*m0)).collect())
    }

    pub fn n(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_,Magnetization> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_,Magnetization> {
        self.0.iter_mut()
    }

    pub fn as_slice(&self) -> &[Magnetization] {
        &self.0
    }

    /** Sum over compartments */
    pub fn total(&self) -> Magnetization {
        self.0.iter().fold(Magnetization::null(),|acc,m| acc + *m)
    }

    pub fn signal(&self) -> Complex64 {
        self.total().signal()
    }

    pub fn fill(&mut self,value:Magnetization) {
        self.0.iter_mut().for_each(|m| *m = value);
    }

    pub fn copy_from(&mut self,other:&MagnetizationMC) -> Result<()> {
        check_compartments(self.n(),other.n())?;
        self.0.copy_from_slice(&other.0);
        Ok(())
    }

    pub fn add_assign(&mut self,other:&MagnetizationMC) -> Result<()> {
        check_compartments(self.n(),other.n())?;
        self.0.iter_mut().zip(other.0.iter()).for_each(|(a,b)| *a += *b);
        Ok(())
    }

    pub fn max_abs_diff(&self,other:&MagnetizationMC) -> f64 {
        self.0.iter().zip(other.0.iter())
            .map(|(a,b)| a.max_abs_diff(b))
            .fold(0.0,f64::max)
    }
}

impl ops::Index<usize> for MagnetizationMC {
    type Output = Magnetization;
    fn index(&self, i:usize) -> &Magnetization {
        &self.0[i]
    }
}

impl ops::IndexMut<usize> for MagnetizationMC {
    fn index_mut(&mut self, i:usize) -> &mut Magnetization {
        &mut self.0[i]
    }
}

impl fmt::Display for MagnetizationMC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts:Vec<String> = self.0.iter().map(|m| format!("({})",m)).collect();
        write!(f, "{}", parts.join(" "))
    }
}

/// A magnetization state that can be written as one row of a trajectory.
pub trait StateVector {
    /** Number of scalar components (3 per compartment) */
    fn n_components(&self) -> usize;
    fn write_row(&self,row:ArrayViewMut1<f64>);
}

impl StateVector for Magnetization {
    fn n_components(&self) -> usize {
        3
    }
    fn write_row(&self,mut row:ArrayViewMut1<f64>) {
        row[0] = self.x;
        row[1] = self.y;
        row[2] = self.z;
    }
}

impl StateVector for MagnetizationMC {
    fn n_components(&self) -> usize {
        3*self.n()
    }
    fn write_row(&self,mut row:ArrayViewMut1<f64>) {
        for (i,m) in self.0.iter().enumerate() {
            row[3*i] = m.x;
            row[3*i + 1] = m.y;
            row[3*i + 2] = m.z;
        }
    }
}

#[cfg(test)]
mod tests {
use super::*;

#[test]
fn vec_addition(){
    let v = Magnetization::new(4.0,2.1,3.1);
    let w = Magnetization::new(2.0,1.0,0.2);
    let r = v + w;
    assert!(r.max_abs_diff(&Magnetization::new(6.0,3.1,3.3)) < 1e-12);
    assert_eq!(v + w, w + v);
}

#[test]
fn vec_dot_product(){
    let v = Magnetization::new(4.0,2.1,3.1);
    let w = Magnetization::new(2.0,1.0,0.2);
    assert!((v*w - 10.72).abs() < 1e-12);
    assert_eq!(v*Magnetization::null(),0.0);
}

#[test]
fn equilibrium_uses_fractions(){
    let m = MagnetizationMC::equilibrium(2.0,&[0.25,0.75]);
    assert_eq!(m.n(),2);
    assert_eq!(m[0],Magnetization::new(0.0,0.0,0.5));
    assert_eq!(m[1],Magnetization::new(0.0,0.0,1.5));
    assert_eq!(m.total().z,2.0);
}

#[test]
fn empty_multi_compartment_is_rejected(){
    assert!(MagnetizationMC::new(vec![]).is_err());
}

#[test]
fn mismatched_copy_is_rejected(){
    let mut a = MagnetizationMC::null(2);
    let b = MagnetizationMC::null(3);
    assert!(matches!(a.copy_from(&b),Err(BlochError::CompartmentMismatch{expected:2,found:3})));
}

#[test]
fn signal_sums_compartments(){
    let m = MagnetizationMC::new(vec![
        Magnetization::new(1.0,0.5,0.0),
        Magnetization::new(-0.25,0.5,1.0),
    ]).unwrap();
    let s = m.signal();
    assert_eq!(s.re,0.75);
    assert_eq!(s.im,1.0);
}
}
