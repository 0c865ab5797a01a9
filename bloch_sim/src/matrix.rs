/*
 Structured 3x3 blocks used to build Bloch and Bloch-McConnell propagators.

 Apart from the dense BlochMatrix, every block type shares the "axial" zero
 pattern

     [ a  b  0 ]
     [-b  a  0 ]
     [ 0  0  c ]

 i.e. a rotation-scaling of the transverse plane plus an independent
 longitudinal scalar. This pattern is closed under addition and
 multiplication, so products and sums of structured blocks are computed from
 the three scalars (a,b,c) alone and a dense block is only produced when the
 result type cannot hold it.
 */

use std::ops;
use std::fmt;
use nalgebra::Matrix3;
use serde::{Serialize, Deserialize};
use crate::magnetization::Magnetization;

/// Behaviour shared by all 3x3 block types.
pub trait Block: Copy {
    fn to_matrix(&self) -> BlochMatrix;
    /** self*m */
    fn apply(&self,m:&Magnetization) -> Magnetization;
    /** self*rhs */
    fn mul_dense(&self,rhs:&BlochMatrix) -> BlochMatrix;
    /** lhs*self */
    fn dense_mul(&self,lhs:&BlochMatrix) -> BlochMatrix;
    /** dest += sign*self */
    fn add_to(&self,dest:&mut BlochMatrix,sign:f64);
    fn to_nalgebra(&self) -> Matrix3<f64> {
        let m = self.to_matrix();
        Matrix3::new(
            m.xx,m.xy,m.xz,
            m.yx,m.yy,m.yz,
            m.zx,m.zy,m.zz,
        )
    }
}

type AxialParts = (f64,f64,f64);

trait Axial {
    fn axial(&self) -> AxialParts;
}

trait FromAxial {
    fn from_axial(parts:AxialParts) -> Self;
}

#[inline]
fn axial_mul(l:AxialParts,r:AxialParts) -> AxialParts {
    (l.0*r.0 - l.1*r.1, l.0*r.1 + l.1*r.0, l.2*r.2)
}

#[inline]
fn axial_add(l:AxialParts,r:AxialParts,sign:f64) -> AxialParts {
    (l.0 + sign*r.0, l.1 + sign*r.1, l.2 + sign*r.2)
}

#[inline]
fn axial_apply((a,b,c):AxialParts,m:&Magnetization) -> Magnetization {
    Magnetization::new(a*m.x + b*m.y, -b*m.x + a*m.y, c*m.z)
}

// T*M
#[inline]
fn axial_left((a,b,c):AxialParts,m:&BlochMatrix) -> BlochMatrix {
    BlochMatrix {
        xx: a*m.xx + b*m.yx, xy: a*m.xy + b*m.yy, xz: a*m.xz + b*m.yz,
        yx: a*m.yx - b*m.xx, yy: a*m.yy - b*m.xy, yz: a*m.yz - b*m.xz,
        zx: c*m.zx, zy: c*m.zy, zz: c*m.zz,
    }
}

// M*T
#[inline]
fn axial_right(m:&BlochMatrix,(a,b,c):AxialParts) -> BlochMatrix {
    BlochMatrix {
        xx: a*m.xx - b*m.xy, xy: b*m.xx + a*m.xy, xz: c*m.xz,
        yx: a*m.yx - b*m.yy, yy: b*m.yx + a*m.yy, yz: c*m.yz,
        zx: a*m.zx - b*m.zy, zy: b*m.zx + a*m.zy, zz: c*m.zz,
    }
}

#[inline]
fn axial_add_to((a,b,c):AxialParts,dest:&mut BlochMatrix,sign:f64) {
    dest.xx += sign*a;
    dest.xy += sign*b;
    dest.yx -= sign*b;
    dest.yy += sign*a;
    dest.zz += sign*c;
}

/// Dense 3x3 block, needed once excitation mixes all three axes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlochMatrix {
    pub xx:f64, pub xy:f64, pub xz:f64,
    pub yx:f64, pub yy:f64, pub yz:f64,
    pub zx:f64, pub zy:f64, pub zz:f64,
}

impl BlochMatrix {
    pub fn new(rows:[[f64;3];3]) -> BlochMatrix {
        BlochMatrix {
            xx:rows[0][0], xy:rows[0][1], xz:rows[0][2],
            yx:rows[1][0], yy:rows[1][1], yz:rows[1][2],
            zx:rows[2][0], zy:rows[2][1], zz:rows[2][2],
        }
    }

    pub fn identity() -> BlochMatrix {
        BlochMatrix{xx:1.0,yy:1.0,zz:1.0,..BlochMatrix::zeros()}
    }

    pub fn zeros() -> BlochMatrix {
        BlochMatrix::default()
    }

    pub fn rows(&self) -> [[f64;3];3] {
        [
            [self.xx,self.xy,self.xz],
            [self.yx,self.yy,self.yz],
            [self.zx,self.zy,self.zz],
        ]
    }

    pub fn transpose(&self) -> BlochMatrix {
        BlochMatrix {
            xx:self.xx, xy:self.yx, xz:self.zx,
            yx:self.xy, yy:self.yy, yz:self.zy,
            zx:self.xz, zy:self.yz, zz:self.zz,
        }
    }

    pub fn from_nalgebra(m:&Matrix3<f64>) -> BlochMatrix {
        BlochMatrix::new([
            [m[(0,0)],m[(0,1)],m[(0,2)]],
            [m[(1,0)],m[(1,1)],m[(1,2)]],
            [m[(2,0)],m[(2,1)],m[(2,2)]],
        ])
    }

    pub fn max_abs_diff(&self,other:&BlochMatrix) -> f64 {
        let a = self.rows();
        let b = other.rows();
        let mut d:f64 = 0.0;
        for i in 0..3 {
            for j in 0..3 {
                d = d.max((a[i][j] - b[i][j]).abs());
            }
        }
        d
    }

    /** Fused multiply-add: self += a*b, using the product specialised for (A,B) */
    pub fn muladd<A,B>(&mut self,a:&A,b:&B)
    where A:Block + ops::Mul<B>, B:Block, <A as ops::Mul<B>>::Output:Block {
        (*a * *b).add_to(self,1.0);
    }

    /** self = a*b */
    pub fn mul_into<A,B>(&mut self,a:&A,b:&B)
    where A:Block + ops::Mul<B>, B:Block, <A as ops::Mul<B>>::Output:Block {
        *self = (*a * *b).to_matrix();
    }
}

impl FromAxial for BlochMatrix {
    fn from_axial((a,b,c):AxialParts) -> BlochMatrix {
        BlochMatrix {
            xx:a, xy:b, xz:0.0,
            yx:-b, yy:a, yz:0.0,
            zx:0.0, zy:0.0, zz:c,
        }
    }
}

impl Block for BlochMatrix {
    fn to_matrix(&self) -> BlochMatrix {
        *self
    }
    fn apply(&self,m:&Magnetization) -> Magnetization {
        Magnetization::new(
            self.xx*m.x + self.xy*m.y + self.xz*m.z,
            self.yx*m.x + self.yy*m.y + self.yz*m.z,
            self.zx*m.x + self.zy*m.y + self.zz*m.z,
        )
    }
    fn mul_dense(&self,rhs:&BlochMatrix) -> BlochMatrix {
        let a = self;
        let b = rhs;
        BlochMatrix {
            xx: a.xx*b.xx + a.xy*b.yx + a.xz*b.zx,
            xy: a.xx*b.xy + a.xy*b.yy + a.xz*b.zy,
            xz: a.xx*b.xz + a.xy*b.yz + a.xz*b.zz,
            yx: a.yx*b.xx + a.yy*b.yx + a.yz*b.zx,
            yy: a.yx*b.xy + a.yy*b.yy + a.yz*b.zy,
            yz: a.yx*b.xz + a.yy*b.yz + a.yz*b.zz,
            zx: a.zx*b.xx + a.zy*b.yx + a.zz*b.zx,
            zy: a.zx*b.xy + a.zy*b.yy + a.zz*b.zy,
            zz: a.zx*b.xz + a.zy*b.yz + a.zz*b.zz,
        }
    }
    fn dense_mul(&self,lhs:&BlochMatrix) -> BlochMatrix {
        lhs.mul_dense(self)
    }
    fn add_to(&self,dest:&mut BlochMatrix,sign:f64) {
        dest.xx += sign*self.xx; dest.xy += sign*self.xy; dest.xz += sign*self.xz;
        dest.yx += sign*self.yx; dest.yy += sign*self.yy; dest.yz += sign*self.yz;
        dest.zx += sign*self.zx; dest.zy += sign*self.zy; dest.zz += sign*self.zz;
    }
}

/// Generator block of one compartment:
///
/// ```text
///     [-R2  dw   0 ]
///     [-dw -R2   0 ]
///     [ 0   0  -R1 ]
/// ```
///
/// with rates in 1/ms and the off-resonance dw in rad/ms.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlochDynamicsMatrix {
    pub r1:f64,
    pub r2:f64,
    pub dw:f64,
}

impl BlochDynamicsMatrix {
    pub fn new(r1:f64,r2:f64,dw:f64) -> BlochDynamicsMatrix {
        BlochDynamicsMatrix{r1,r2,dw}
    }
}

impl Axial for BlochDynamicsMatrix {
    fn axial(&self) -> AxialParts {
        (-self.r2,self.dw,-self.r1)
    }
}

impl FromAxial for BlochDynamicsMatrix {
    fn from_axial((a,b,c):AxialParts) -> BlochDynamicsMatrix {
        BlochDynamicsMatrix{r1:-c,r2:-a,dw:b}
    }
}

/// Exchange block r*I coupling two compartments. r is in 1/ms.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeDynamicsMatrix {
    pub r:f64,
}

impl ExchangeDynamicsMatrix {
    pub fn new(r:f64) -> ExchangeDynamicsMatrix {
        ExchangeDynamicsMatrix{r}
    }
}

impl Axial for ExchangeDynamicsMatrix {
    fn axial(&self) -> AxialParts {
        (self.r,0.0,self.r)
    }
}

impl FromAxial for ExchangeDynamicsMatrix {
    fn from_axial((a,b,c):AxialParts) -> ExchangeDynamicsMatrix {
        debug_assert!(b == 0.0 && a == c);
        ExchangeDynamicsMatrix{r:a}
    }
}

/// Propagator of one free-precession interval:
///
/// ```text
///     [ E2cos  E2sin  0  ]
///     [-E2sin  E2cos  0  ]
///     [  0      0     E1 ]
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FreePrecessionMatrix {
    pub e1:f64,
    pub e2cos:f64,
    pub e2sin:f64,
}

impl FreePrecessionMatrix {
    pub fn new(e1:f64,e2cos:f64,e2sin:f64) -> FreePrecessionMatrix {
        FreePrecessionMatrix{e1,e2cos,e2sin}
    }

    /** Decay factors e1, e2 and accumulated precession angle theta (rad) */
    pub fn from_decay(e1:f64,e2:f64,theta:f64) -> FreePrecessionMatrix {
        let (s,c) = theta.sin_cos();
        FreePrecessionMatrix{e1,e2cos:e2*c,e2sin:e2*s}
    }

    pub fn identity() -> FreePrecessionMatrix {
        FreePrecessionMatrix{e1:1.0,e2cos:1.0,e2sin:0.0}
    }
}

impl Default for FreePrecessionMatrix {
    fn default() -> Self {
        FreePrecessionMatrix::identity()
    }
}

impl Axial for FreePrecessionMatrix {
    fn axial(&self) -> AxialParts {
        (self.e2cos,self.e2sin,self.e1)
    }
}

impl FromAxial for FreePrecessionMatrix {
    fn from_axial((a,b,c):AxialParts) -> FreePrecessionMatrix {
        FreePrecessionMatrix{e1:c,e2cos:a,e2sin:b}
    }
}

/// diag(0,0,1): removes transverse magnetization, keeps Mz.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IdealSpoilingMatrix;

impl Axial for IdealSpoilingMatrix {
    fn axial(&self) -> AxialParts {
        (0.0,0.0,1.0)
    }
}

macro_rules! axial_block {
    ($($t:ty),*) => {$(
        impl Block for $t {
            fn to_matrix(&self) -> BlochMatrix {
                BlochMatrix::from_axial(self.axial())
            }
            fn apply(&self,m:&Magnetization) -> Magnetization {
                axial_apply(self.axial(),m)
            }
            fn mul_dense(&self,rhs:&BlochMatrix) -> BlochMatrix {
                axial_left(self.axial(),rhs)
            }
            fn dense_mul(&self,lhs:&BlochMatrix) -> BlochMatrix {
                axial_right(lhs,self.axial())
            }
            fn add_to(&self,dest:&mut BlochMatrix,sign:f64) {
                axial_add_to(self.axial(),dest,sign)
            }
        }
    )*}
}

axial_block!(BlochDynamicsMatrix, FreePrecessionMatrix);

impl Block for ExchangeDynamicsMatrix {
    fn to_matrix(&self) -> BlochMatrix {
        BlochMatrix{xx:self.r,yy:self.r,zz:self.r,..BlochMatrix::zeros()}
    }
    fn apply(&self,m:&Magnetization) -> Magnetization {
        *m*self.r
    }
    fn mul_dense(&self,rhs:&BlochMatrix) -> BlochMatrix {
        *rhs*self.r
    }
    fn dense_mul(&self,lhs:&BlochMatrix) -> BlochMatrix {
        *lhs*self.r
    }
    fn add_to(&self,dest:&mut BlochMatrix,sign:f64) {
        dest.xx += sign*self.r;
        dest.yy += sign*self.r;
        dest.zz += sign*self.r;
    }
}

impl Block for IdealSpoilingMatrix {
    fn to_matrix(&self) -> BlochMatrix {
        BlochMatrix{zz:1.0,..BlochMatrix::zeros()}
    }
    fn apply(&self,m:&Magnetization) -> Magnetization {
        Magnetization::new(0.0,0.0,m.z)
    }
    fn mul_dense(&self,rhs:&BlochMatrix) -> BlochMatrix {
        BlochMatrix{zx:rhs.zx,zy:rhs.zy,zz:rhs.zz,..BlochMatrix::zeros()}
    }
    fn dense_mul(&self,lhs:&BlochMatrix) -> BlochMatrix {
        BlochMatrix{xz:lhs.xz,yz:lhs.yz,zz:lhs.zz,..BlochMatrix::zeros()}
    }
    fn add_to(&self,dest:&mut BlochMatrix,sign:f64) {
        dest.zz += sign;
    }
}

/** Dense matrix times any block */
impl<B:Block> ops::Mul<B> for BlochMatrix {
    type Output = BlochMatrix;
    fn mul(self,rhs:B) -> BlochMatrix {
        rhs.dense_mul(&self)
    }
}

impl<B:Block> ops::Add<B> for BlochMatrix {
    type Output = BlochMatrix;
    fn add(self,rhs:B) -> BlochMatrix {
        let mut out = self;
        rhs.add_to(&mut out,1.0);
        out
    }
}

impl<B:Block> ops::Sub<B> for BlochMatrix {
    type Output = BlochMatrix;
    fn sub(self,rhs:B) -> BlochMatrix {
        let mut out = self;
        rhs.add_to(&mut out,-1.0);
        out
    }
}

impl<B:Block> ops::AddAssign<B> for BlochMatrix {
    fn add_assign(&mut self,rhs:B) {
        rhs.add_to(self,1.0);
    }
}

impl<B:Block> ops::SubAssign<B> for BlochMatrix {
    fn sub_assign(&mut self,rhs:B) {
        rhs.add_to(self,-1.0);
    }
}

impl ops::Mul<Magnetization> for BlochMatrix {
    type Output = Magnetization;
    fn mul(self,rhs:Magnetization) -> Magnetization {
        self.apply(&rhs)
    }
}

impl ops::Mul<f64> for BlochMatrix {
    type Output = BlochMatrix;
    fn mul(self,s:f64) -> BlochMatrix {
        BlochMatrix {
            xx:s*self.xx, xy:s*self.xy, xz:s*self.xz,
            yx:s*self.yx, yy:s*self.yy, yz:s*self.yz,
            zx:s*self.zx, zy:s*self.zy, zz:s*self.zz,
        }
    }
}

impl ops::Mul<BlochMatrix> for f64 {
    type Output = BlochMatrix;
    fn mul(self,rhs:BlochMatrix) -> BlochMatrix {
        rhs*self
    }
}

impl ops::Neg for BlochMatrix {
    type Output = BlochMatrix;
    fn neg(self) -> BlochMatrix {
        self*-1.0
    }
}

macro_rules! structured_with_dense {
    ($($t:ty),*) => {$(
        impl ops::Mul<BlochMatrix> for $t {
            type Output = BlochMatrix;
            fn mul(self,rhs:BlochMatrix) -> BlochMatrix {
                self.mul_dense(&rhs)
            }
        }
        impl ops::Add<BlochMatrix> for $t {
            type Output = BlochMatrix;
            fn add(self,rhs:BlochMatrix) -> BlochMatrix {
                let mut out = rhs;
                self.add_to(&mut out,1.0);
                out
            }
        }
        impl ops::Sub<BlochMatrix> for $t {
            type Output = BlochMatrix;
            fn sub(self,rhs:BlochMatrix) -> BlochMatrix {
                let mut out = -rhs;
                self.add_to(&mut out,1.0);
                out
            }
        }
        impl ops::Mul<Magnetization> for $t {
            type Output = Magnetization;
            fn mul(self,rhs:Magnetization) -> Magnetization {
                self.apply(&rhs)
            }
        }
    )*}
}

structured_with_dense!(BlochDynamicsMatrix, ExchangeDynamicsMatrix, FreePrecessionMatrix, IdealSpoilingMatrix);

macro_rules! axial_mul {
    ($($lhs:ty, $rhs:ty => $out:ty);* $(;)?) => {$(
        impl ops::Mul<$rhs> for $lhs {
            type Output = $out;
            fn mul(self,rhs:$rhs) -> $out {
                <$out as FromAxial>::from_axial(axial_mul(self.axial(),rhs.axial()))
            }
        }
    )*}
}

macro_rules! axial_add_sub {
    ($($lhs:ty, $rhs:ty => $out:ty);* $(;)?) => {$(
        impl ops::Add<$rhs> for $lhs {
            type Output = $out;
            fn add(self,rhs:$rhs) -> $out {
                <$out as FromAxial>::from_axial(axial_add(self.axial(),rhs.axial(),1.0))
            }
        }
        impl ops::Sub<$rhs> for $lhs {
            type Output = $out;
            fn sub(self,rhs:$rhs) -> $out {
                <$out as FromAxial>::from_axial(axial_add(self.axial(),rhs.axial(),-1.0))
            }
        }
    )*}
}

type D = BlochDynamicsMatrix;
type E = ExchangeDynamicsMatrix;
type F = FreePrecessionMatrix;
type S = IdealSpoilingMatrix;

axial_mul! {
    D, D => BlochMatrix;
    D, E => D;
    D, F => BlochMatrix;
    D, S => BlochMatrix;
    E, D => D;
    E, E => E;
    E, F => F;
    E, S => BlochMatrix;
    F, D => BlochMatrix;
    F, E => F;
    F, F => F;
    F, S => F;
    S, D => BlochMatrix;
    S, E => BlochMatrix;
    S, F => F;
}

impl ops::Mul<S> for S {
    type Output = S;
    fn mul(self,_rhs:S) -> S {
        IdealSpoilingMatrix
    }
}

axial_add_sub! {
    D, D => D;
    D, E => D;
    D, F => BlochMatrix;
    D, S => BlochMatrix;
    E, D => D;
    E, E => E;
    E, F => F;
    E, S => BlochMatrix;
    F, D => BlochMatrix;
    F, E => F;
    F, F => F;
    F, S => F;
    S, D => BlochMatrix;
    S, E => BlochMatrix;
    S, F => F;
    S, S => BlochMatrix;
}

impl fmt::Display for BlochMatrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\n{},{},{}\n{},{},{}\n{},{},{}",
            self.xx,self.xy,self.xz,
            self.yx,self.yy,self.yz,
            self.zx,self.zy,self.zz)
    }
}
