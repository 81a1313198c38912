use std::path::Path;

use crate::config::LossConfig;
use crate::error::LossError;
use crate::loss::defaults::{
    BatchedCtcScorer, ReferenceCtcScorer, ReferenceTransducerScorer, RowCtcScorer,
    ScanTransducerScorer,
};
use crate::loss::runtime::{CtcLoss, TransducerLoss};
use crate::loss::traits::{CtcScorer, TransducerScorer};
use crate::types::{CtcStrategy, TransducerStrategy};

pub struct CtcLossBuilder {
    config: LossConfig,
    scorer: Option<Box<dyn CtcScorer>>,
}

impl CtcLossBuilder {
    pub fn new(config: LossConfig) -> Self {
        Self {
            config,
            scorer: None,
        }
    }

    pub fn from_config_file(path: &Path) -> Result<Self, LossError> {
        Ok(Self::new(LossConfig::load(path)?))
    }

    /// Replaces the scorer selected by `ctc_strategy`.
    pub fn with_scorer(mut self, scorer: Box<dyn CtcScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn build(self) -> CtcLoss {
        let scorer = self
            .scorer
            .unwrap_or_else(|| default_ctc_scorer(self.config.ctc_strategy));
        tracing::info!(
            scorer = scorer.label(),
            reduction = ?self.config.reduction,
            zero_infinity = self.config.zero_infinity,
            "built ctc loss"
        );
        CtcLoss::from_parts(self.config, scorer)
    }
}

pub struct TransducerLossBuilder {
    config: LossConfig,
    scorer: Option<Box<dyn TransducerScorer>>,
}

impl TransducerLossBuilder {
    pub fn new(config: LossConfig) -> Self {
        Self {
            config,
            scorer: None,
        }
    }

    pub fn from_config_file(path: &Path) -> Result<Self, LossError> {
        Ok(Self::new(LossConfig::load(path)?))
    }

    pub fn with_scorer(mut self, scorer: Box<dyn TransducerScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn build(self) -> TransducerLoss {
        if self.config.zero_infinity {
            tracing::debug!("zero_infinity has no effect on transducer losses");
        }
        let scorer = self
            .scorer
            .unwrap_or_else(|| default_transducer_scorer(self.config.transducer_strategy));
        tracing::info!(
            scorer = scorer.label(),
            reduction = ?self.config.reduction,
            "built transducer loss"
        );
        TransducerLoss::from_parts(self.config, scorer)
    }
}

fn default_ctc_scorer(strategy: CtcStrategy) -> Box<dyn CtcScorer> {
    match strategy {
        CtcStrategy::Reference => Box::new(ReferenceCtcScorer),
        CtcStrategy::RowVectorized => Box::new(RowCtcScorer),
        CtcStrategy::Batched => Box::new(BatchedCtcScorer),
    }
}

fn default_transducer_scorer(strategy: TransducerStrategy) -> Box<dyn TransducerScorer> {
    match strategy {
        TransducerStrategy::Reference => Box::new(ReferenceTransducerScorer),
        TransducerStrategy::Scan => Box::new(ScanTransducerScorer),
    }
}
