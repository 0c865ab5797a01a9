use std::f64::consts::PI;
use approx::assert_relative_eq;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use bloch_sim::{
    AffineOp, AffineOpMC, Block, BlochError, BlochMatrix, BlochMcConnellWorkspace, GradientSpoiling,
    Gradient, IdealSpoiling, InstantaneousRf, Magnetization, Position, Propagator, RfWaveform, Spin,
    SpinMC, SpinSystem, combine,
};

#[test]
fn free_precession_scenario(){
    let s = Spin::new(1.0,1000.0,100.0,3.75).unwrap()
        .with_magnetization(Magnetization::new(1.0,0.0,0.0));
    let (a,b) = s.freeprecess(100.0,None).unwrap();
    let m = a*s.m + b;
    assert_relative_eq!(m.x,-0.2601,epsilon = 1e-4);
    assert_relative_eq!(m.y,-0.2601,epsilon = 1e-4);
    assert_relative_eq!(m.z,0.0952,epsilon = 1e-4);
}

#[test]
fn uncoupled_compartments_precess_independently(){
    let mc = SpinMC::new(
        1.0,
        vec![0.5,0.5],
        vec![1000.0,400.0],
        vec![100.0,20.0],
        vec![0.0,15.0],
        vec![vec![0.0,0.0],vec![0.0,0.0]],
    ).unwrap();
    let mut ws = BlochMcConnellWorkspace::new(2).unwrap();
    let mut op = AffineOpMC::identity(2);
    mc.freeprecess(20.0,None,&mut ws,&mut op).unwrap();

    assert_eq!(*op.a.block(0,1),BlochMatrix::zeros());
    assert_eq!(*op.a.block(1,0),BlochMatrix::zeros());

    let singles = [
        Spin::new(0.5,1000.0,100.0,0.0).unwrap(),
        Spin::new(0.5,400.0,20.0,15.0).unwrap(),
    ];
    for (i,s) in singles.iter().enumerate() {
        let (a,b) = s.freeprecess(20.0,None).unwrap();
        assert!(op.a.block(i,i).max_abs_diff(&a.to_matrix()) < 1e-14);
        assert!(op.b[i].max_abs_diff(&b) < 1e-14);
    }
}

#[test]
fn single_spin_closed_form_matches_dense_exponential(){
    let mut rng = StdRng::seed_from_u64(2024);
    for _ in 0..100 {
        let t1 = rng.gen_range(100.0..3000.0);
        let t2 = rng.gen_range(5.0..t1);
        let df = rng.gen_range(-200.0..200.0);
        let t = rng.gen_range(0.0..50.0);
        let s = Spin::new(1.0,t1,t2,df).unwrap();
        let (a,_) = s.freeprecess(t,None).unwrap();
        let reference = (s.dynamics(None).to_nalgebra()*t).exp();
        assert_relative_eq!(a.to_nalgebra(),reference,epsilon = 1e-12);
    }
}

fn random_op(rng:&mut StdRng,s:&Spin) -> AffineOp {
    match rng.gen_range(0..3) {
        0 => AffineOp::from(s.freeprecess(rng.gen_range(0.0..20.0),None).unwrap()),
        1 => s.excite(&InstantaneousRf::new(rng.gen_range(-PI..PI),rng.gen_range(-PI..PI))),
        _ => IdealSpoiling.op(),
    }
}

#[test]
fn composition_is_associative(){
    let mut rng = StdRng::seed_from_u64(99);
    let s = Spin::new(1.0,800.0,70.0,12.0).unwrap();
    for _ in 0..50 {
        let ops:Vec<AffineOp> = (0..3).map(|_| random_op(&mut rng,&s)).collect();
        let left = combine(&ops).unwrap();
        let right = ops[0].compose(&combine(&ops[1..]).unwrap());
        assert!(left.a.max_abs_diff(&right.a) < 1e-14);
        assert!(left.b.max_abs_diff(&right.b) < 1e-14);
    }

    let mc = SpinMC::new(1.0,vec![0.15,0.85],vec![400.0,832.0],vec![20.0,80.0],vec![15.0,0.0],
        vec![vec![0.0,0.01*0.15/0.85],vec![0.01,0.0]]).unwrap();
    let ops = vec![
        mc.freeprecess_exact(3.0,None).unwrap(),
        mc.excite(&InstantaneousRf::new(0.8,0.3)),
        mc.freeprecess_exact(7.0,None).unwrap(),
    ];
    let left = combine(&ops).unwrap();
    let right = ops[0].compose(&combine(&ops[1..]).unwrap()).unwrap();
    assert!(left.a.max_abs_diff(&right.a) < 1e-14);
    assert!(left.b.max_abs_diff(&right.b) < 1e-14);
}

#[test]
fn spoiling_twice_equals_once(){
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..20 {
        let m = Magnetization::new(rng.gen_range(-1.0..1.0),rng.gen_range(-1.0..1.0),rng.gen_range(-1.0..1.0));
        let mut once = Spin::new(1.0,1000.0,100.0,0.0).unwrap().with_magnetization(m);
        once.spoil();
        let mut twice = once.clone();
        twice.spoil();
        assert_eq!(once.m,twice.m);
    }
    let op = IdealSpoiling.op();
    assert_eq!(combine(&[op,op]).unwrap(),op);
}

#[test]
fn excitation_round_trip(){
    let mut rng = StdRng::seed_from_u64(77);
    for _ in 0..100 {
        let theta = rng.gen_range(-PI..PI);
        let alpha = rng.gen_range(-2.0*PI..2.0*PI);
        let m0 = Magnetization::new(rng.gen_range(-1.0..1.0),rng.gen_range(-1.0..1.0),rng.gen_range(-1.0..1.0));
        let mut m = m0;
        InstantaneousRf::new(alpha,theta).op().apply_to(&mut m);
        InstantaneousRf::new(-alpha,theta).op().apply_to(&mut m);
        assert!(m.max_abs_diff(&m0) < 1e-14);
    }
}

#[test]
fn short_hard_pulse_matches_instantaneous_rotation(){
    let s = Spin::new(1.0,1000.0,100.0,50.0).unwrap();
    let wf = RfWaveform::hard(PI/3.0,0.4,1e-6,8).unwrap();
    let op = s.excite_waveform(&wf).unwrap();
    let rf = InstantaneousRf::new(PI/3.0,0.4);
    assert!(op.a.max_abs_diff(&rf.rotation()) < 1e-6);
    assert!(op.b.mag() < 1e-6);

    let mc = SpinMC::new(1.0,vec![0.5,0.5],vec![400.0,800.0],vec![20.0,80.0],vec![0.0,30.0],
        vec![vec![0.0,0.02],vec![0.02,0.0]]).unwrap();
    let mut ws = BlochMcConnellWorkspace::new(2).unwrap();
    let op = mc.excite_waveform(&wf,&mut ws).unwrap();
    assert!(op.a.max_abs_diff(&mc.excite(&rf).a) < 1e-6);
}

#[test]
fn gradient_spoiling_dephases_an_ensemble(){
    // one full cycle of gradient phase across the isochromats
    let spoiler = GradientSpoiling::new(Gradient::new(0.0,0.0,1.0),1.0);
    let length = 1.0/(bloch_sim::GAMBAR*spoiler.area().z/1000.0);
    let n = 64;
    let positions:Vec<Position> = (0..n).map(|k| Position::new(0.0,0.0,length*k as f64/n as f64)).collect();
    let template = Spin::new(1.0,1000.0,100.0,0.0).unwrap();
    let mut system = SpinSystem::isochromats(&template,&positions);
    system.apply(|_| Ok(InstantaneousRf::new(PI/2.0,0.0).op())).unwrap();
    assert_relative_eq!(system.signal().norm(),1.0,epsilon = 1e-12);

    system.apply(|s| spoiler.op(s)).unwrap();
    assert!(system.signal().norm() < 1e-12);
    let mz = system.spins[0].m.z;
    assert!(system.spins.iter().all(|s| (s.m.z - mz).abs() < 1e-15));
    assert!(system.spins.iter().all(|s| s.signal().norm() > 0.99));
}

#[test]
fn single_compartment_mc_matches_spin(){
    let s = Spin::new(1.0,900.0,75.0,-20.0).unwrap();
    let mc = SpinMC::new(1.0,vec![1.0],vec![900.0],vec![75.0],vec![-20.0],vec![vec![0.0]]).unwrap();
    let rf = InstantaneousRf::new(0.5,0.1);

    let single = combine(&[AffineOp::from(s.freeprecess(6.0,None).unwrap()),s.excite(&rf),AffineOp::from(s.freeprecess(4.0,None).unwrap())]).unwrap();
    let multi = combine(&[mc.freeprecess_exact(6.0,None).unwrap(),mc.excite(&rf),mc.freeprecess_exact(4.0,None).unwrap()]).unwrap();
    assert!(multi.a.block(0,0).max_abs_diff(&single.a) < 1e-14);
    assert!(multi.b[0].max_abs_diff(&single.b) < 1e-14);

    let ss_single = single.steady_state().unwrap();
    let ss_multi = multi.steady_state().unwrap();
    assert!(ss_multi[0].max_abs_diff(&ss_single) < 1e-12);
}

#[test]
fn applying_in_place_matches_transform(){
    let mut s = Spin::new(1.0,1000.0,100.0,10.0).unwrap();
    let op = combine(&[s.excite(&InstantaneousRf::new(PI/2.0,0.0)),AffineOp::from(s.freeprecess(5.0,None).unwrap())]).unwrap();
    let expected = op.transform(&s.m);
    s.apply(&op);
    assert_eq!(s.m,expected);

    let mut mc = SpinMC::new(1.0,vec![0.4,0.6],vec![500.0,900.0],vec![30.0,90.0],vec![0.0,5.0],
        vec![vec![0.0,0.006],vec![0.004,0.0]]).unwrap();
    let op = mc.freeprecess_exact(5.0,None).unwrap().then(&mc.excite(&InstantaneousRf::new(0.3,0.0))).unwrap();
    let expected = op.transform(&mc.m).unwrap();
    mc.apply(&op).unwrap();
    assert!(mc.m.max_abs_diff(&expected) < 1e-15);
}

#[test]
fn identity_period_is_singular(){
    assert!(matches!(AffineOp::identity().steady_state(),Err(BlochError::Singular)));
    let s = Spin::new(1.0,f64::INFINITY,f64::INFINITY,0.0).unwrap();
    let op = AffineOp::from(s.freeprecess(10.0,None).unwrap());
    assert!(matches!(op.steady_state(),Err(BlochError::Singular)));
}
