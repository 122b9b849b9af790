use nalgebra::DMatrix;

/// Shape of one block of the block-diagonal primal matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Dense symmetric `n × n` block constrained to be PSD.
    Psd(usize),
    /// Diagonal block of `n` non-negative scalars.
    Diagonal(usize),
}

impl BlockKind {
    pub fn size(self) -> usize {
        match self {
            BlockKind::Psd(n) | BlockKind::Diagonal(n) => n,
        }
    }
}

/// Upper-triangle entry of a symmetric block matrix (0-based, `row <= col`).
///
/// Off-diagonal entries stand for both `(row, col)` and `(col, row)`, so they
/// contribute `2 · value · X[row, col]` to the inner product.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SdpEntry {
    pub block: usize,
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

/// `⟨A, X⟩ = rhs`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SdpConstraint {
    pub entries: Vec<SdpEntry>,
    pub rhs: f64,
}

/// Standard-form semidefinite program:
/// minimize `⟨C, X⟩` subject to the constraints and `X ⪰ 0` blockwise.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SdpProblem {
    pub blocks: Vec<BlockKind>,
    pub constraints: Vec<SdpConstraint>,
    pub objective: Vec<SdpEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SdpStatus {
    Optimal,
    /// The solver stopped with a solution close to optimal.
    NearOptimal,
    PrimalInfeasible,
    DualInfeasible,
    Failed(String),
}

impl SdpStatus {
    /// Whether a primal matrix was produced that callers may inspect.
    pub fn is_usable(&self) -> bool {
        matches!(self, SdpStatus::Optimal | SdpStatus::NearOptimal)
    }

    pub fn describe(&self) -> String {
        match self {
            SdpStatus::Optimal => "optimal".to_string(),
            SdpStatus::NearOptimal => "near optimal".to_string(),
            SdpStatus::PrimalInfeasible => "primal infeasible".to_string(),
            SdpStatus::DualInfeasible => "dual infeasible".to_string(),
            SdpStatus::Failed(reason) => format!("failed: {reason}"),
        }
    }
}

/// Solver output. `primal` holds one matrix per block (diagonal blocks are
/// stored as square diagonal matrices) and is empty unless the status is
/// usable.
#[derive(Debug, Clone, PartialEq)]
pub struct SdpSolution {
    pub status: SdpStatus,
    pub primal: Vec<DMatrix<f64>>,
}

impl SdpSolution {
    pub fn without_primal(status: SdpStatus) -> Self {
        Self {
            status,
            primal: Vec::new(),
        }
    }
}

/// Abstract semidefinite solver interface.
pub trait SdpSolver {
    type Error: std::error::Error;

    /// Backend name used in logs and failure messages.
    fn name(&self) -> &str;

    /// Solve one program. Infeasibility is reported through
    /// [`SdpSolution::status`]; `Err` is reserved for failures to run the
    /// backend at all.
    fn solve(&mut self, problem: &SdpProblem) -> Result<SdpSolution, Self::Error>;
}

impl SdpProblem {
    /// Evaluate `⟨A, X⟩` for a list of entries against a primal solution.
    pub fn inner_product(entries: &[SdpEntry], primal: &[DMatrix<f64>]) -> f64 {
        entries
            .iter()
            .map(|e| {
                let x = primal
                    .get(e.block)
                    .and_then(|m| m.get((e.row, e.col)).copied())
                    .unwrap_or(0.0);
                if e.row == e.col {
                    e.value * x
                } else {
                    2.0 * e.value * x
                }
            })
            .sum()
    }

    /// Largest absolute constraint residual of a primal solution.
    pub fn max_residual(&self, primal: &[DMatrix<f64>]) -> f64 {
        self.constraints
            .iter()
            .map(|c| (Self::inner_product(&c.entries, primal) - c.rhs).abs())
            .fold(0.0, f64::max)
    }
}
