//! Conic quadratic programs and the solver seam
//!
//! Problems are assembled densely with nalgebra and handed to a [`QpBackend`].
//! The default backend is Clarabel, a pure Rust interior-point solver. It
//! solves
//!
//! ```text
//! minimize    1/2 z'Pz + q'z
//! subject to  Az + s = b,  s in K
//! ```
//!
//! where `K` is a product of zero, non-negative and second-order cones.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, SecondOrderConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DVector};

use crate::common::SolverFailure;

/// One block of constraint rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConeSpec {
    /// `Az = b`
    Zero(usize),
    /// `Az <= b`
    Nonnegative(usize),
    /// `b - Az` lies in a second-order cone of this dimension
    SecondOrder(usize),
}

impl ConeSpec {
    pub fn rows(&self) -> usize {
        match *self {
            ConeSpec::Zero(n) | ConeSpec::Nonnegative(n) | ConeSpec::SecondOrder(n) => n,
        }
    }
}

/// Dense conic QP
#[derive(Debug, Clone)]
pub struct QpProblem {
    /// Symmetric cost Hessian; only the upper triangle is read
    pub p: DMatrix<f64>,
    pub q: DVector<f64>,
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
    pub cones: Vec<ConeSpec>,
}

impl QpProblem {
    pub fn num_variables(&self) -> usize {
        self.q.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.b.len()
    }

    /// Shape consistency between matrices and the cone list
    pub fn check_dimensions(&self) -> Result<(), SolverFailure> {
        let n = self.q.len();
        let m = self.b.len();
        let cone_rows: usize = self.cones.iter().map(ConeSpec::rows).sum();
        if self.p.shape() != (n, n) || self.a.shape() != (m, n) || cone_rows != m {
            return Err(SolverFailure::Backend(format!(
                "inconsistent QP dimensions: P {:?}, A {:?}, q {}, b {}, cone rows {}",
                self.p.shape(),
                self.a.shape(),
                n,
                m,
                cone_rows
            )));
        }
        Ok(())
    }
}

/// Solver limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QpSettings {
    pub max_iter: u32,
    /// Wall-clock deadline [s]
    pub time_limit: f64,
}

/// Termination status reported by a backend
#[derive(Debug, Clone, PartialEq)]
pub enum QpStatus {
    Solved,
    AlmostSolved,
    MaxIterations,
    MaxTime,
    /// Infeasible, numerical trouble, or anything else
    Failed(String),
}

impl QpStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, QpStatus::Solved | QpStatus::AlmostSolved)
    }
}

/// Backend output; `x` holds the final iterate even when the status is not a success
#[derive(Debug, Clone, PartialEq)]
pub struct QpSolution {
    pub status: QpStatus,
    pub x: Vec<f64>,
    pub iterations: u32,
}

/// Numerical solver behind the horizon optimizer
pub trait QpBackend: Send + Sync {
    fn solve(&self, problem: &QpProblem, settings: &QpSettings) -> Result<QpSolution, SolverFailure>;

    fn name(&self) -> &'static str;
}

/// Clarabel interior-point backend
#[derive(Debug, Clone, Copy, Default)]
pub struct ClarabelBackend;

impl QpBackend for ClarabelBackend {
    fn solve(&self, problem: &QpProblem, settings: &QpSettings) -> Result<QpSolution, SolverFailure> {
        problem.check_dimensions()?;

        let p_csc = dmatrix_to_csc_upper_tri(&problem.p);
        let a_csc = dmatrix_to_csc(&problem.a);
        let q: Vec<f64> = problem.q.iter().copied().collect();
        let b: Vec<f64> = problem.b.iter().copied().collect();
        let cones: Vec<SupportedConeT<f64>> = problem
            .cones
            .iter()
            .map(|cone| match *cone {
                ConeSpec::Zero(n) => ZeroConeT(n),
                ConeSpec::Nonnegative(n) => NonnegativeConeT(n),
                ConeSpec::SecondOrder(n) => SecondOrderConeT(n),
            })
            .collect();

        let clarabel_settings = DefaultSettingsBuilder::default()
            .max_iter(settings.max_iter)
            .time_limit(settings.time_limit)
            .verbose(false)
            .build()
            .map_err(|e| SolverFailure::Backend(format!("solver settings: {:?}", e)))?;

        let mut solver = DefaultSolver::new(&p_csc, &q, &a_csc, &b, &cones, clarabel_settings)
            .map_err(|e| SolverFailure::Backend(format!("solver setup: {:?}", e)))?;
        solver.solve();

        let solution = &solver.solution;
        let status = match solution.status {
            SolverStatus::Solved => QpStatus::Solved,
            SolverStatus::AlmostSolved => QpStatus::AlmostSolved,
            SolverStatus::MaxIterations => QpStatus::MaxIterations,
            SolverStatus::MaxTime => QpStatus::MaxTime,
            other => QpStatus::Failed(format!("{:?}", other)),
        };
        Ok(QpSolution {
            status,
            x: solution.x.clone(),
            iterations: solution.iterations,
        })
    }

    fn name(&self) -> &'static str {
        "clarabel"
    }
}

/// Convert a dense matrix to Clarabel CSC, dropping explicit zeros
pub(crate) fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Upper triangle of a symmetric dense matrix as Clarabel CSC
pub(crate) fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows.min(j + 1) {
            let v = m[(i, j)];
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}
