use std::fmt;
use nalgebra::DMatrix;
use crate::error::{BlochError, Result, check_compartments};
use crate::magnetization::{Magnetization, MagnetizationMC};
use crate::matrix::{Block, BlochMatrix, BlochDynamicsMatrix, ExchangeDynamicsMatrix};

/// Position of the exchange block (i,j), i != j, in the packed exchange list
/// of an n-compartment generator. Row i holds its n-1 blocks in column order
/// with the diagonal skipped. `None` for a diagonal or out of range pair.
#[inline]
pub fn exchange_index(i:usize,j:usize,n:usize) -> Option<usize> {
    if i == j || i >= n || j >= n {
        return None;
    }
    Some(i*(n - 1) + if j < i {j} else {j - 1})
}

/// Inverse of `exchange_index`.
///
/// # Panics
/// Divides by zero when n < 2; k must be below n*(n-1).
#[inline]
pub fn exchange_pair(k:usize,n:usize) -> (usize,usize) {
    debug_assert!(n > 1 && k < n*(n - 1));
    let i = k/(n - 1);
    let r = k%(n - 1);
    let j = if r < i {r} else {r + 1};
    (i,j)
}

/// Continuous-time Bloch-McConnell generator: one dynamics block per
/// compartment on the diagonal, one scalar exchange block per ordered pair
/// (i,j), i != j, off the diagonal.
#[derive(Clone, Debug, PartialEq)]
pub struct BlochMcConnellDynamicsMatrix {
    a:Vec<BlochDynamicsMatrix>,
    e:Vec<ExchangeDynamicsMatrix>,
}

impl BlochMcConnellDynamicsMatrix {
    pub fn new(a:Vec<BlochDynamicsMatrix>,e:Vec<ExchangeDynamicsMatrix>) -> Result<BlochMcConnellDynamicsMatrix> {
        let n = a.len();
        if n == 0 {
            return Err(BlochError::CompartmentMismatch{expected:1,found:0});
        }
        let expected = n*(n - 1);
        if e.len() != expected {
            return Err(BlochError::ExchangeBlockCount{compartments:n,expected,found:e.len()});
        }
        Ok(BlochMcConnellDynamicsMatrix{a,e})
    }

    pub fn n(&self) -> usize {
        self.a.len()
    }

    pub fn dynamics(&self,i:usize) -> &BlochDynamicsMatrix {
        &self.a[i]
    }

    pub fn dynamics_blocks(&self) -> &[BlochDynamicsMatrix] {
        &self.a
    }

    /// Exchange block (i,j).
    ///
    /// # Panics
    /// If i == j or either index is not a compartment. See `try_exchange`.
    pub fn exchange(&self,i:usize,j:usize) -> &ExchangeDynamicsMatrix {
        match self.try_exchange(i,j) {
            Some(e) => e,
            None => panic!("no exchange block ({},{}) in a {} compartment generator",i,j,self.n()),
        }
    }

    pub fn try_exchange(&self,i:usize,j:usize) -> Option<&ExchangeDynamicsMatrix> {
        exchange_index(i,j,self.n()).map(|k| &self.e[k])
    }

    pub fn exchange_blocks(&self) -> &[ExchangeDynamicsMatrix] {
        &self.e
    }

    /** Block (i,j) as a dense 3x3 */
    pub fn block(&self,i:usize,j:usize) -> BlochMatrix {
        match i == j {
            true => self.a[i].to_matrix(),
            false => self.exchange(i,j).to_matrix()
        }
    }

    /** generator*m */
    pub fn apply(&self,m:&MagnetizationMC) -> Result<MagnetizationMC> {
        let n = self.n();
        check_compartments(n,m.n())?;
        let mut out = MagnetizationMC::null(n);
        for i in 0..n {
            let mut acc = self.a[i].apply(&m[i]);
            for j in (0..n).filter(|j| *j != i) {
                acc += self.exchange(i,j).apply(&m[j]);
            }
            out[i] = acc;
        }
        Ok(out)
    }

    /// Dense 3n x 3n generator, read straight from the packed fields.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let n = self.n();
        let mut out = DMatrix::<f64>::zeros(3*n,3*n);
        for (i,d) in self.a.iter().enumerate() {
            let o = 3*i;
            out[(o,o)] = -d.r2;
            out[(o,o + 1)] = d.dw;
            out[(o + 1,o)] = -d.dw;
            out[(o + 1,o + 1)] = -d.r2;
            out[(o + 2,o + 2)] = -d.r1;
        }
        for (k,e) in self.e.iter().enumerate() {
            let (i,j) = exchange_pair(k,n);
            for c in 0..3 {
                out[(3*i + c,3*j + c)] = e.r;
            }
        }
        out
    }
}

/// Discrete-time propagator stored as n x n dense 3x3 blocks (row major).
#[derive(Clone, Debug, PartialEq)]
pub struct BlochMcConnellMatrix {
    n:usize,
    blocks:Vec<BlochMatrix>,
}

impl BlochMcConnellMatrix {
    pub fn zeros(n:usize) -> BlochMcConnellMatrix {
        BlochMcConnellMatrix{n,blocks:vec![BlochMatrix::zeros();n*n]}
    }

    pub fn identity(n:usize) -> BlochMcConnellMatrix {
        let mut m = BlochMcConnellMatrix::zeros(n);
        m.fill_identity();
        m
    }

    /** The same block repeated on the diagonal */
    pub fn block_diagonal<B:Block>(block:&B,n:usize) -> BlochMcConnellMatrix {
        let mut m = BlochMcConnellMatrix::zeros(n);
        let b = block.to_matrix();
        for i in 0..n {
            m.blocks[i*n + i] = b;
        }
        m
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn block(&self,i:usize,j:usize) -> &BlochMatrix {
        &self.blocks[i*self.n + j]
    }

    pub fn block_mut(&mut self,i:usize,j:usize) -> &mut BlochMatrix {
        &mut self.blocks[i*self.n + j]
    }

    pub fn fill_identity(&mut self) {
        let n = self.n;
        for i in 0..n {
            for j in 0..n {
                self.blocks[i*n + j] = if i == j {BlochMatrix::identity()} else {BlochMatrix::zeros()};
            }
        }
    }

    pub fn fill_zero(&mut self) {
        self.blocks.iter_mut().for_each(|b| *b = BlochMatrix::zeros());
    }

    pub fn copy_from(&mut self,other:&BlochMcConnellMatrix) -> Result<()> {
        check_compartments(self.n,other.n)?;
        self.blocks.copy_from_slice(&other.blocks);
        Ok(())
    }

    /** self += a*b */
    pub fn muladd(&mut self,a:&BlochMcConnellMatrix,b:&BlochMcConnellMatrix) -> Result<()> {
        check_compartments(self.n,a.n)?;
        check_compartments(self.n,b.n)?;
        let n = self.n;
        for i in 0..n {
            for j in 0..n {
                let mut acc = self.blocks[i*n + j];
                for k in 0..n {
                    acc.muladd(&a.blocks[i*n + k],&b.blocks[k*n + j]);
                }
                self.blocks[i*n + j] = acc;
            }
        }
        Ok(())
    }

    /** self = a*b */
    pub fn mul_into(&mut self,a:&BlochMcConnellMatrix,b:&BlochMcConnellMatrix) -> Result<()> {
        check_compartments(self.n,a.n)?;
        self.fill_zero();
        self.muladd(a,b)
    }

    /** self = diag(block)*self, without building the block diagonal */
    pub fn mul_block_diagonal_left<B:Block>(&mut self,block:&B) {
        self.blocks.iter_mut().for_each(|m| *m = block.mul_dense(m));
    }

    /** self = self*diag(block) */
    pub fn mul_block_diagonal_right<B:Block>(&mut self,block:&B) {
        self.blocks.iter_mut().for_each(|m| *m = block.dense_mul(m));
    }

    pub fn add(&self,other:&BlochMcConnellMatrix) -> Result<BlochMcConnellMatrix> {
        self.combine_elementwise(other,1.0)
    }

    pub fn sub(&self,other:&BlochMcConnellMatrix) -> Result<BlochMcConnellMatrix> {
        self.combine_elementwise(other,-1.0)
    }

    fn combine_elementwise(&self,other:&BlochMcConnellMatrix,sign:f64) -> Result<BlochMcConnellMatrix> {
        check_compartments(self.n,other.n)?;
        let mut out = self.clone();
        out.blocks.iter_mut().zip(other.blocks.iter()).for_each(|(a,b)| b.add_to(a,sign));
        Ok(out)
    }

    /** out = self*m */
    pub fn apply_into(&self,m:&MagnetizationMC,out:&mut MagnetizationMC) -> Result<()> {
        check_compartments(self.n,m.n())?;
        check_compartments(self.n,out.n())?;
        let n = self.n;
        for i in 0..n {
            let mut acc = Magnetization::null();
            for j in 0..n {
                acc += self.blocks[i*n + j].apply(&m[j]);
            }
            out[i] = acc;
        }
        Ok(())
    }

    pub fn apply(&self,m:&MagnetizationMC) -> Result<MagnetizationMC> {
        let mut out = MagnetizationMC::null(self.n);
        self.apply_into(m,&mut out)?;
        Ok(out)
    }

    /// out = (I - self)*v, computed as v - self*v so that I - self is never
    /// formed.
    pub fn subtract_mul(&self,v:&MagnetizationMC,out:&mut MagnetizationMC) -> Result<()> {
        self.apply_into(v,out)?;
        out.iter_mut().zip(v.iter()).for_each(|(o,vi)| *o = *vi - *o);
        Ok(())
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let n = self.n;
        let mut out = DMatrix::<f64>::zeros(3*n,3*n);
        for i in 0..n {
            for j in 0..n {
                let rows = self.blocks[i*n + j].rows();
                for (r,row) in rows.iter().enumerate() {
                    for (c,v) in row.iter().enumerate() {
                        out[(3*i + r,3*j + c)] = *v;
                    }
                }
            }
        }
        out
    }

    pub fn from_dense(m:&DMatrix<f64>) -> Result<BlochMcConnellMatrix> {
        if m.nrows() != m.ncols() || m.nrows()%3 != 0 || m.nrows() == 0 {
            return Err(BlochError::CompartmentMismatch{expected:m.nrows()/3,found:m.ncols()/3});
        }
        let n = m.nrows()/3;
        let mut out = BlochMcConnellMatrix::zeros(n);
        for i in 0..n {
            for j in 0..n {
                let mut rows = [[0.0;3];3];
                for (r,row) in rows.iter_mut().enumerate() {
                    for (c,v) in row.iter_mut().enumerate() {
                        *v = m[(3*i + r,3*j + c)];
                    }
                }
                out.blocks[i*n + j] = BlochMatrix::new(rows);
            }
        }
        Ok(out)
    }

    pub fn max_abs_diff(&self,other:&BlochMcConnellMatrix) -> f64 {
        self.blocks.iter().zip(other.blocks.iter())
            .map(|(a,b)| a.max_abs_diff(b))
            .fold(0.0,f64::max)
    }
}

impl fmt::Display for BlochMcConnellMatrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f,"{}",self.to_dense())
    }
}
