use nalgebra::{DMatrix, DVector};
use tracing::debug;
use crate::error::{BlochError, Result, check_compartments};
use crate::magnetization::{Magnetization, MagnetizationMC};
use crate::matrix::{Block, BlochMatrix, FreePrecessionMatrix};
use crate::mcmatrix::BlochMcConnellMatrix;

// pivots below this fraction of ||I - A||inf make the steady state undefined
const SINGULAR_PIVOT:f64 = 1e-12;

/// An operation on magnetization of the form m -> A*m + B.
pub trait Propagator: Sized + Clone {
    type State;

    /** Replace m with A*m + B */
    fn apply(&self,m:&mut Self::State) -> Result<()>;

    /** The operation performing self first, then next */
    fn then(&self,next:&Self) -> Result<Self>;

    /** Fixed point m = A*m + B of a periodic operation */
    fn steady_state(&self) -> Result<Self::State>;

    /** Identity operation of the same shape */
    fn identity_like(&self) -> Self;

    /// The operation applied `count` times in a row, by repeated squaring.
    /// Zero repetitions give the identity.
    fn repeat(&self,count:usize) -> Result<Self> {
        let mut out = self.identity_like();
        let mut power = self.clone();
        let mut k = count;
        while k > 0 {
            if k & 1 == 1 {
                out = out.then(&power)?;
            }
            k >>= 1;
            if k > 0 {
                power = power.then(&power)?;
            }
        }
        Ok(out)
    }
}

/// Composes operations in the order given.
pub fn combine<P:Propagator>(ops:&[P]) -> Result<P> {
    let (first,rest) = ops.split_first().ok_or(BlochError::invalid("operation count",0.0))?;
    rest.iter().try_fold(first.clone(),|acc,op| acc.then(op))
}

// solve (I - a) x = b
fn solve_steady_state(a:DMatrix<f64>,b:DVector<f64>) -> Result<DVector<f64>> {
    let n = a.nrows();
    let system = DMatrix::<f64>::identity(n,n) - a;
    let norm = system.row_iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0,f64::max);
    let lu = system.lu();
    let min_pivot = lu.u().diagonal().iter().map(|v| v.abs()).fold(f64::INFINITY,f64::min);
    debug!(size = n,min_pivot,norm,"steady state solve");
    if !(min_pivot > SINGULAR_PIVOT*norm) {
        return Err(BlochError::Singular);
    }
    lu.solve(&b).ok_or(BlochError::Singular)
}

/// Affine operation on a single compartment.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AffineOp {
    pub a:BlochMatrix,
    pub b:Magnetization,
}

impl AffineOp {
    pub fn new(a:BlochMatrix,b:Magnetization) -> AffineOp {
        AffineOp{a,b}
    }

    pub fn identity() -> AffineOp {
        AffineOp{a:BlochMatrix::identity(),b:Magnetization::null()}
    }

    /** Purely linear operation, B = 0 */
    pub fn linear<B:Block>(block:&B) -> AffineOp {
        AffineOp{a:block.to_matrix(),b:Magnetization::null()}
    }

    pub fn transform(&self,m:&Magnetization) -> Magnetization {
        self.a*(*m) + self.b
    }

    pub fn apply_to(&self,m:&mut Magnetization) {
        *m = self.transform(m);
    }

    /** self first, then next: A = A2*A1, B = A2*B1 + B2 */
    pub fn compose(&self,next:&AffineOp) -> AffineOp {
        AffineOp{
            a:next.a*self.a,
            b:next.a*self.b + next.b,
        }
    }
}

impl Default for AffineOp {
    fn default() -> Self {
        AffineOp::identity()
    }
}

impl From<(FreePrecessionMatrix,Magnetization)> for AffineOp {
    fn from((a,b):(FreePrecessionMatrix,Magnetization)) -> AffineOp {
        AffineOp{a:a.to_matrix(),b}
    }
}

impl Propagator for AffineOp {
    type State = Magnetization;

    fn apply(&self,m:&mut Magnetization) -> Result<()> {
        self.apply_to(m);
        Ok(())
    }

    fn then(&self,next:&AffineOp) -> Result<AffineOp> {
        Ok(self.compose(next))
    }

    fn steady_state(&self) -> Result<Magnetization> {
        let a = DMatrix::from_row_slice(3,3,&self.a.rows().concat());
        let b = DVector::from_row_slice(&self.b.to_array());
        let x = solve_steady_state(a,b)?;
        Ok(Magnetization::new(x[0],x[1],x[2]))
    }

    fn identity_like(&self) -> AffineOp {
        AffineOp::identity()
    }
}

/// Affine operation on all compartments of a multi-compartment spin.
#[derive(Clone, Debug, PartialEq)]
pub struct AffineOpMC {
    pub a:BlochMcConnellMatrix,
    pub b:MagnetizationMC,
}

impl AffineOpMC {
    pub fn new(a:BlochMcConnellMatrix,b:MagnetizationMC) -> Result<AffineOpMC> {
        check_compartments(a.n(),b.n())?;
        Ok(AffineOpMC{a,b})
    }

    pub fn identity(n:usize) -> AffineOpMC {
        AffineOpMC{a:BlochMcConnellMatrix::identity(n),b:MagnetizationMC::null(n)}
    }

    /** The same linear block on every compartment, B = 0 */
    pub fn block_diagonal<B:Block>(block:&B,n:usize) -> AffineOpMC {
        AffineOpMC{a:BlochMcConnellMatrix::block_diagonal(block,n),b:MagnetizationMC::null(n)}
    }

    pub fn n(&self) -> usize {
        self.a.n()
    }

    pub fn set_identity(&mut self) {
        self.a.fill_identity();
        self.b.fill(Magnetization::null());
    }

    /** out = A*m + B */
    pub fn apply_into(&self,m:&MagnetizationMC,out:&mut MagnetizationMC) -> Result<()> {
        self.a.apply_into(m,out)?;
        out.add_assign(&self.b)
    }

    pub fn transform(&self,m:&MagnetizationMC) -> Result<MagnetizationMC> {
        let mut out = MagnetizationMC::null(self.n());
        self.apply_into(m,&mut out)?;
        Ok(out)
    }

    /** out = self followed by next, without allocating */
    pub fn compose_into(&self,next:&AffineOpMC,out:&mut AffineOpMC) -> Result<()> {
        check_compartments(self.n(),next.n())?;
        check_compartments(self.n(),out.n())?;
        out.a.mul_into(&next.a,&self.a)?;
        next.a.apply_into(&self.b,&mut out.b)?;
        out.b.add_assign(&next.b)
    }

    pub fn compose(&self,next:&AffineOpMC) -> Result<AffineOpMC> {
        let mut out = AffineOpMC::identity(self.n());
        self.compose_into(next,&mut out)?;
        Ok(out)
    }

    /// Follow self by the same linear block on every compartment, in place.
    pub fn then_block_diagonal<B:Block>(&mut self,block:&B) {
        self.a.mul_block_diagonal_left(block);
        self.b.iter_mut().for_each(|m| *m = block.apply(m));
    }
}

impl Propagator for AffineOpMC {
    type State = MagnetizationMC;

    fn apply(&self,m:&mut MagnetizationMC) -> Result<()> {
        let out = self.transform(m)?;
        *m = out;
        Ok(())
    }

    fn then(&self,next:&AffineOpMC) -> Result<AffineOpMC> {
        self.compose(next)
    }

    fn steady_state(&self) -> Result<MagnetizationMC> {
        let n = self.n();
        let b = DVector::from_iterator(3*n,self.b.iter().flat_map(|m| m.to_array()));
        let x = solve_steady_state(self.a.to_dense(),b)?;
        MagnetizationMC::new(x.as_slice().chunks(3).map(|c| Magnetization::new(c[0],c[1],c[2])).collect())
    }

    fn identity_like(&self) -> AffineOpMC {
        AffineOpMC::identity(self.n())
    }
}
