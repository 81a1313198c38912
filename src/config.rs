use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LossError;
use crate::types::{CtcStrategy, Reduction, TransducerStrategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LossConfig {
    pub reduction: Reduction,
    /// Replace infinite CTC losses (no valid alignment) by zero.
    pub zero_infinity: bool,
    pub ctc_strategy: CtcStrategy,
    pub transducer_strategy: TransducerStrategy,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            reduction: Reduction::Mean,
            zero_infinity: false,
            ctc_strategy: CtcStrategy::Batched,
            transducer_strategy: TransducerStrategy::Scan,
        }
    }
}

impl LossConfig {
    pub fn load(path: &Path) -> Result<Self, LossError> {
        let data =
            std::fs::read_to_string(path).map_err(|e| LossError::io("read loss config", e))?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, LossError> {
        serde_json::from_str(data).map_err(|e| LossError::json("parse loss config", e))
    }
}
