use ndarray::Array2;
use crate::error::Result;
use crate::magnetization::StateVector;
use crate::propagator::Propagator;

/// Applies `ops` in order starting from `initial`. Row 0 holds the initial
/// state, row k the state after the k-th operation; three columns
/// (x, y, z) per compartment.
pub fn trajectory<P>(initial:&P::State,ops:&[P]) -> Result<Array2<f64>>
where P:Propagator, P::State:StateVector + Clone {
    let mut out = Array2::<f64>::zeros((ops.len() + 1,initial.n_components()));
    let mut m = initial.clone();
    m.write_row(out.row_mut(0));
    for (k,op) in ops.iter().enumerate() {
        op.apply(&mut m)?;
        m.write_row(out.row_mut(k + 1));
    }
    Ok(out)
}
