pub mod config;
pub mod error;
pub mod lattice;
pub mod loss;
pub mod types;

pub use config::LossConfig;
pub use error::LossError;
pub use lattice::ctc::{
    ctc_forward_score, ctc_forward_score_batched, ctc_forward_score_reference, ctc_log_alpha,
    ctc_reference_log_alpha,
};
pub use lattice::expand::{expand_targets, ColumnRule, ExpandedBatch, ExpandedTargets};
pub use lattice::scan::{
    affine_fold, affine_scan, scan_associative, scan_sequential, AffineRecurrence, AffineStep,
};
pub use lattice::transducer::{
    joint_probs, transducer_forward_score, transducer_forward_score_batched,
    transducer_forward_score_from_joint, transducer_forward_score_reference,
    transducer_reference_from_joint,
};
pub use loss::builder::{CtcLossBuilder, TransducerLossBuilder};
pub use loss::runtime::{CtcLoss, TransducerLoss};
pub use loss::traits::{CtcScorer, TransducerScorer};
pub use types::{CtcBatch, CtcStrategy, Reduction, TransducerBatch, TransducerStrategy, BLANK_ID};
