//! SDPA sparse format, the exchange format of CSDP.
//!
//! The solver maximises `tr(C X)` subject to `tr(A_i X) = a_i`, so the
//! minimisation objective of an [`SdpProblem`] is written negated.

use std::fmt::Write as _;

use nalgebra::DMatrix;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::sdp::{BlockKind, SdpEntry, SdpProblem};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SdpaError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("line {line}: entry ({row}, {col}) outside block {block}")]
    OutOfRange {
        line: usize,
        block: usize,
        row: usize,
        col: usize,
    },
}

/// Render a problem in SDPA sparse format.
pub fn to_sdpa(problem: &SdpProblem) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "* palisade sos program");
    let _ = writeln!(out, "{}", problem.constraints.len());
    let _ = writeln!(out, "{}", problem.blocks.len());
    let sizes: Vec<String> = problem
        .blocks
        .iter()
        .map(|b| match b {
            BlockKind::Psd(n) => n.to_string(),
            BlockKind::Diagonal(n) => format!("-{n}"),
        })
        .collect();
    let _ = writeln!(out, "{}", sizes.join(" "));
    let rhs: Vec<String> = problem.constraints.iter().map(|c| c.rhs.to_string()).collect();
    let _ = writeln!(out, "{}", rhs.join(" "));
    for entry in &problem.objective {
        write_entry(&mut out, 0, entry, -entry.value);
    }
    for (i, constraint) in problem.constraints.iter().enumerate() {
        for entry in &constraint.entries {
            write_entry(&mut out, i + 1, entry, entry.value);
        }
    }
    out
}

fn write_entry(out: &mut String, matno: usize, entry: &SdpEntry, value: f64) {
    if value == 0.0 {
        return;
    }
    let (row, col) = if entry.row <= entry.col {
        (entry.row, entry.col)
    } else {
        (entry.col, entry.row)
    };
    let _ = writeln!(
        out,
        "{matno} {} {} {} {value}",
        entry.block + 1,
        row + 1,
        col + 1
    );
}

/// SHA-256 of the rendered SDPA text, lowercase hex.
pub fn program_digest(problem: &SdpProblem) -> String {
    let digest = Sha256::digest(to_sdpa(problem).as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Read the primal matrix `X` from a CSDP solution file.
///
/// The first line holds the dual vector `y`; every later line is
/// `matno block i j value` with `matno = 1` for `Z` and `matno = 2` for `X`.
pub fn parse_solution(text: &str, problem: &SdpProblem) -> Result<Vec<DMatrix<f64>>, SdpaError> {
    let mut primal: Vec<DMatrix<f64>> = problem
        .blocks
        .iter()
        .map(|b| DMatrix::zeros(b.size(), b.size()))
        .collect();
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());
    if lines.next().is_none() {
        return Err(SdpaError::Malformed {
            line: 1,
            reason: "empty solution file".to_string(),
        });
    }
    for (line, content) in lines {
        let fields: Vec<&str> = content.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SdpaError::Malformed {
                line,
                reason: format!("expected 5 fields, found {}", fields.len()),
            });
        }
        let int = |s: &str| {
            s.parse::<usize>().map_err(|e| SdpaError::Malformed {
                line,
                reason: format!("`{s}`: {e}"),
            })
        };
        let matno = int(fields[0])?;
        let block = int(fields[1])?;
        let row = int(fields[2])?;
        let col = int(fields[3])?;
        let value = parse_float(fields[4]).ok_or_else(|| SdpaError::Malformed {
            line,
            reason: format!("`{}` is not a number", fields[4]),
        })?;
        if matno != 2 {
            continue;
        }
        let out_of_range = SdpaError::OutOfRange {
            line,
            block,
            row,
            col,
        };
        if block == 0 || row == 0 || col == 0 {
            return Err(out_of_range);
        }
        let Some(m) = primal.get_mut(block - 1) else {
            return Err(out_of_range);
        };
        if row > m.nrows() || col > m.ncols() {
            return Err(out_of_range);
        }
        m[(row - 1, col - 1)] = value;
        m[(col - 1, row - 1)] = value;
    }
    Ok(primal)
}

/// CSDP prints Fortran-style exponents (`1.0D-03`) on some builds.
fn parse_float(s: &str) -> Option<f64> {
    s.parse::<f64>()
        .ok()
        .or_else(|| s.replace(['D', 'd'], "e").parse::<f64>().ok())
}
