//! Decomposition strategy and product selectors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the global matrix is split across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Contiguous row slices; results are concatenated.
    #[serde(alias = "rows", alias = "1")]
    Row,
    /// Column slices; results are partial sums over the full output.
    #[serde(alias = "columns", alias = "2")]
    Column,
    /// Square blocks on a torus: Cannon's schedule for matrices, row-wise
    /// sums for vectors.
    #[serde(alias = "blocks", alias = "cannon", alias = "3")]
    Block,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Row, Strategy::Column, Strategy::Block];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Row => "row",
            Strategy::Column => "column",
            Strategy::Block => "block",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStrategyError(String);

impl fmt::Display for ParseStrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown strategy '{}' (expected row/1, column/2 or block/3)",
            self.0
        )
    }
}

impl std::error::Error for ParseStrategyError {}

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "row" | "rows" => Ok(Strategy::Row),
            "2" | "column" | "columns" | "col" => Ok(Strategy::Column),
            "3" | "block" | "blocks" | "cannon" => Ok(Strategy::Block),
            other => Err(ParseStrategyError(other.to_string())),
        }
    }
}

/// Which product is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// `y = A * x`
    MatVec,
    /// `C = A * B`
    MatMul,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::MatVec => f.write_str("matrix-vector"),
            Operation::MatMul => f.write_str("matrix-matrix"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOperationError(String);

impl fmt::Display for ParseOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown operation '{}' (expected matvec or matmul)",
            self.0
        )
    }
}

impl std::error::Error for ParseOperationError {}

impl FromStr for Operation {
    type Err = ParseOperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "matvec" | "mv" | "vector" => Ok(Operation::MatVec),
            "matmul" | "mm" | "matrix" => Ok(Operation::MatMul),
            other => Err(ParseOperationError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_codes() {
        assert_eq!("1".parse::<Strategy>().unwrap(), Strategy::Row);
        assert_eq!("2".parse::<Strategy>().unwrap(), Strategy::Column);
        assert_eq!("3".parse::<Strategy>().unwrap(), Strategy::Block);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Rows".parse::<Strategy>().unwrap(), Strategy::Row);
        assert_eq!("cannon".parse::<Strategy>().unwrap(), Strategy::Block);
        assert!("diagonal".parse::<Strategy>().is_err());
        assert_eq!("matmul".parse::<Operation>().unwrap(), Operation::MatMul);
    }

    #[test]
    fn test_unknown_operation() {
        let error = "transpose".parse::<Operation>().unwrap_err();
        assert_eq!(error, ParseOperationError("transpose".to_string()));
        assert!(error.to_string().contains("matvec or matmul"));
        assert_eq!(" MV ".parse::<Operation>().unwrap(), Operation::MatVec);
    }
}
