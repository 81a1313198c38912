use std::collections::HashSet;
use std::env;
use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use candle_core::{DType, Device, Tensor, D};
use lattice_loss::lattice::logspace::log_add_exp_f64;
use lattice_loss::{
    ctc_forward_score, ctc_forward_score_batched, ctc_forward_score_reference, joint_probs,
    transducer_forward_score, transducer_forward_score_batched, transducer_forward_score_reference,
    LossError,
};
use libtest_mimic::{Arguments, Failed, Trial};
use rand::prelude::SliceRandom;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

const DEFAULT_SAMPLE_SIZE: usize = 12;
const DEFAULT_TOLERANCE: f64 = 1e-6;
const DEFAULT_SAMPLE_SEED: u64 = 42;
const SUITE_NAME: &str = "forward_scores_match_reference";
/// Largest number of paths a brute-force oracle is allowed to enumerate.
const BRUTE_FORCE_LIMIT: f64 = 250_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CaseKind {
    Ctc,
    Transducer,
}

#[derive(Debug, Deserialize)]
struct ForwardCase {
    id: String,
    kind: CaseKind,
    classes: usize,
    seed: u64,
    sequences: Vec<SequenceSpec>,
}

#[derive(Debug, Deserialize)]
struct SequenceSpec {
    frames: usize,
    targets: Vec<u32>,
    /// No alignment exists; the CTC loss must be `+inf`.
    #[serde(default)]
    infeasible: bool,
}

fn main() {
    let args = Arguments::from_args();

    let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let full_mode = env_flag("LATTICE_IT_FULL");
    let sample_seed = env_parse("LATTICE_IT_SEED", DEFAULT_SAMPLE_SEED);
    let tolerance = env_parse("LATTICE_IT_TOLERANCE", DEFAULT_TOLERANCE);

    let tests = match load_cases(&repo_root.join("test-data/forward/cases.json")) {
        Ok(cases) if cases.is_empty() => {
            vec![setup_failure("No cases found under test-data/forward.".to_string())]
        }
        Ok(cases) => case_trials(&args, cases, full_mode, sample_seed, tolerance),
        Err(err) => vec![setup_failure(err)],
    };
    libtest_mimic::run(&args, tests).exit();
}

fn setup_failure(message: String) -> Trial {
    Trial::test(format!("{SUITE_NAME}::setup"), move || Err(Failed::from(message)))
}

/// One trial per case. Cases outside the seeded sample are ignored unless
/// `LATTICE_IT_FULL` is set or the filter names them.
fn case_trials(
    args: &Arguments,
    cases: Vec<ForwardCase>,
    full_mode: bool,
    seed: u64,
    tolerance: f64,
) -> Vec<Trial> {
    let sampled = sampled_case_ids(&cases, full_mode, seed);
    cases
        .into_iter()
        .map(|case| {
            let name = format!("{SUITE_NAME}::case::{}", case.id);
            let ignored = !sampled.contains(&case.id) && !names_case(args, &name);
            Trial::test(name, move || run_case(&case, tolerance).map_err(Failed::from))
                .with_ignored_flag(ignored)
        })
        .collect()
}

fn run_case(case: &ForwardCase, tolerance: f64) -> Result<(), String> {
    match case.kind {
        CaseKind::Ctc => run_ctc_case(case, tolerance),
        CaseKind::Transducer => run_transducer_case(case, tolerance),
    }
}

fn run_ctc_case(case: &ForwardCase, tolerance: f64) -> Result<(), String> {
    let device = Device::Cpu;
    let classes = case.classes;
    let mut rng = StdRng::seed_from_u64(case.seed);
    let mut sequences = Vec::with_capacity(case.sequences.len());
    let mut isolated = Vec::with_capacity(case.sequences.len());

    for (n, spec) in case.sequences.iter().enumerate() {
        let label = format!("{}[{n}]", case.id);
        let logits = random_values(&mut rng, spec.frames * classes);
        let emissions = log_softmax(&logits, (spec.frames, classes))?;
        let targets = labels(&spec.targets)?;

        let reference = scalar(ctc_forward_score_reference(&emissions, &targets), &label)?;
        let rows = scalar(ctc_forward_score(&emissions, &targets), &label)?;
        check_close(&format!("{label}: row-vectorized vs reference"), rows, reference, tolerance)?;

        if spec.infeasible && reference != f64::INFINITY {
            return Err(format!("{label}: infeasible target scored {reference}, expected +inf"));
        }
        if !spec.infeasible && !reference.is_finite() {
            return Err(format!("{label}: feasible target scored {reference}"));
        }

        let host = emissions
            .to_vec2::<f64>()
            .map_err(|err| format!("{label}: read emissions: {err}"))?;
        if (classes as f64).powi(spec.frames as i32) <= BRUTE_FORCE_LIMIT {
            let oracle = ctc_brute_force(&host, &spec.targets);
            let what = format!("{label}: reference vs brute force");
            check_close(&what, reference, oracle, tolerance)?;
        }

        sequences.push(host);
        isolated.push(reference);
    }

    // padded batch: garbage frames and out-of-range padding labels
    let batch = case.sequences.len();
    let frames = case.sequences.iter().map(|s| s.frames).max().unwrap_or(0);
    let padded = case.sequences.iter().map(|s| s.targets.len()).max().unwrap_or(0);
    let mut emissions = vec![0.0f64; frames * batch * classes];
    for value in emissions.iter_mut() {
        *value = rng.gen_range(-30.0..5.0);
    }
    let mut targets = vec![classes as u32 + 3; batch * padded];
    for (n, (spec, host)) in case.sequences.iter().zip(&sequences).enumerate() {
        for (t, row) in host.iter().enumerate() {
            let at = (t * batch + n) * classes;
            emissions[at..at + classes].copy_from_slice(row);
        }
        targets[n * padded..n * padded + spec.targets.len()].copy_from_slice(&spec.targets);
    }
    let emissions = Tensor::from_vec(emissions, (frames, batch, classes), &device)
        .map_err(|err| format!("{}: batch emissions: {err}", case.id))?;
    let targets = Tensor::from_vec(targets, (batch, padded), &device)
        .map_err(|err| format!("{}: batch targets: {err}", case.id))?;
    let emission_lengths: Vec<usize> = case.sequences.iter().map(|s| s.frames).collect();
    let target_lengths: Vec<usize> = case.sequences.iter().map(|s| s.targets.len()).collect();

    let batched = scores(
        ctc_forward_score_batched(&emissions, &targets, &emission_lengths, &target_lengths),
        &case.id,
    )?;
    compare_batched(&case.id, &batched, &isolated, tolerance)
}

fn run_transducer_case(case: &ForwardCase, tolerance: f64) -> Result<(), String> {
    let device = Device::Cpu;
    let classes = case.classes;
    let mut rng = StdRng::seed_from_u64(case.seed);
    let batch = case.sequences.len();
    let frames = case.sequences.iter().map(|s| s.frames).max().unwrap_or(0);
    let positions = case.sequences.iter().map(|s| s.targets.len()).max().unwrap_or(0) + 1;

    let f_all = random_values(&mut rng, batch * frames * classes);
    let g_all = random_values(&mut rng, batch * positions * classes);
    let mut targets = vec![classes as u32 + 3; batch * (positions - 1)];
    let mut isolated = Vec::with_capacity(batch);

    for (n, spec) in case.sequences.iter().enumerate() {
        let label = format!("{}[{n}]", case.id);
        let f_start = n * frames * classes;
        let f = tensor(&f_all[f_start..f_start + spec.frames * classes], (spec.frames, classes))?;
        let g_start = n * positions * classes;
        let rows = spec.targets.len() + 1;
        let g = tensor(&g_all[g_start..g_start + rows * classes], (rows, classes))?;
        let sequence_targets = labels(&spec.targets)?;

        let reference = scalar(
            transducer_forward_score_reference(&f, &g, &sequence_targets),
            &label,
        )?;
        let scan = scalar(transducer_forward_score(&f, &g, &sequence_targets), &label)?;
        check_close(&format!("{label}: scan vs reference"), scan, reference, tolerance)?;
        if !(-1.0..=0.0).contains(&reference) {
            return Err(format!("{label}: score {reference} is not a negated probability"));
        }

        let moves = spec.frames - 1 + spec.targets.len();
        if (2f64).powi(moves as i32) <= BRUTE_FORCE_LIMIT {
            let joint = joint_probs(&f, &g)
                .map_err(|err| format!("{label}: joint: {err}"))?
                .to_vec3::<f64>()
                .map_err(|err| format!("{label}: read joint: {err}"))?;
            let oracle = transducer_brute_force(&joint, &spec.targets);
            let what = format!("{label}: reference vs brute force");
            check_close(&what, reference, oracle, tolerance)?;
        }

        let row = n * (positions - 1);
        targets[row..row + spec.targets.len()].copy_from_slice(&spec.targets);
        isolated.push(reference);
    }

    let f = tensor(&f_all, (batch, frames, classes))?;
    let g = tensor(&g_all, (batch, positions, classes))?;
    let targets = Tensor::from_vec(targets, (batch, positions - 1), &device)
        .map_err(|err| format!("{}: batch targets: {err}", case.id))?;
    let frame_lengths: Vec<usize> = case.sequences.iter().map(|s| s.frames).collect();
    let target_lengths: Vec<usize> = case.sequences.iter().map(|s| s.targets.len()).collect();

    let batched = scores(
        transducer_forward_score_batched(&f, &g, &targets, &frame_lengths, &target_lengths),
        &case.id,
    )?;
    compare_batched(&case.id, &batched, &isolated, tolerance)
}

fn compare_batched(
    id: &str,
    batched: &[f64],
    isolated: &[f64],
    tolerance: f64,
) -> Result<(), String> {
    if batched.len() != isolated.len() {
        return Err(format!(
            "{id}: batched output has {} scores for {} sequences",
            batched.len(),
            isolated.len()
        ));
    }
    for (n, (&got, &expected)) in batched.iter().zip(isolated).enumerate() {
        check_close(&format!("{id}[{n}]: batched vs isolated"), got, expected, tolerance)?;
    }
    Ok(())
}

fn check_close(what: &str, got: f64, expected: f64, tolerance: f64) -> Result<(), String> {
    let agree = if got.is_nan() || expected.is_nan() {
        got.is_nan() && expected.is_nan()
    } else if got.is_infinite() || expected.is_infinite() {
        got == expected
    } else {
        (got - expected).abs() <= tolerance * (1.0 + expected.abs())
    };
    if agree {
        Ok(())
    } else {
        Err(format!("{what}: {got} differs from {expected} (tolerance {tolerance})"))
    }
}

fn collapse(path: &[usize]) -> Vec<u32> {
    let mut out = Vec::new();
    let mut prev = None;
    for &class in path {
        if Some(class) != prev && class != 0 {
            out.push(class as u32);
        }
        prev = Some(class);
    }
    out
}

/// Negative log-sum over every frame labelling that collapses to `targets`.
fn ctc_brute_force(log_probs: &[Vec<f64>], targets: &[u32]) -> f64 {
    let frames = log_probs.len();
    let classes = log_probs[0].len();
    let mut path = vec![0usize; frames];
    let mut total = f64::NEG_INFINITY;
    loop {
        if collapse(&path) == targets {
            let score: f64 = path.iter().enumerate().map(|(t, &c)| log_probs[t][c]).sum();
            total = log_add_exp_f64(total, score);
        }
        let mut t = 0;
        loop {
            if t == frames {
                return -total;
            }
            path[t] += 1;
            if path[t] < classes {
                break;
            }
            path[t] = 0;
            t += 1;
        }
    }
}

/// Negative sum of every monotone path through the `T x U` lattice.
fn transducer_brute_force(joint: &[Vec<Vec<f64>>], targets: &[u32]) -> f64 {
    let emits = targets.len();
    let moves = joint.len() - 1 + emits;
    let mut total = 0.0;
    for mask in 0u64..(1u64 << moves) {
        if mask.count_ones() as usize != emits {
            continue;
        }
        let (mut t, mut u, mut p) = (0, 0, 1.0);
        for bit in 0..moves {
            if (mask >> bit) & 1 == 1 {
                p *= joint[t][u][targets[u] as usize];
                u += 1;
            } else {
                p *= joint[t][u][0];
                t += 1;
            }
        }
        total += p * joint[t][u][0];
    }
    -total
}

fn random_values(rng: &mut StdRng, len: usize) -> Vec<f64> {
    (0..len).map(|_| rng.gen_range(-2.0..2.0)).collect()
}

fn tensor(values: &[f64], dims: impl Into<candle_core::Shape>) -> Result<Tensor, String> {
    Tensor::from_slice(values, dims, &Device::Cpu).map_err(|err| format!("build tensor: {err}"))
}

fn log_softmax(values: &[f64], dims: (usize, usize)) -> Result<Tensor, String> {
    let logits = tensor(values, dims)?;
    candle_nn::ops::log_softmax(&logits, D::Minus1).map_err(|err| format!("log_softmax: {err}"))
}

fn labels(values: &[u32]) -> Result<Tensor, String> {
    Tensor::from_slice(values, values.len(), &Device::Cpu)
        .map_err(|err| format!("build targets: {err}"))
}

fn scalar(result: Result<Tensor, LossError>, label: &str) -> Result<f64, String> {
    result
        .map_err(|err| format!("{label}: {err}"))?
        .to_dtype(DType::F64)
        .and_then(|t| t.to_scalar::<f64>())
        .map_err(|err| format!("{label}: read score: {err}"))
}

fn scores(result: Result<Tensor, LossError>, id: &str) -> Result<Vec<f64>, String> {
    result
        .map_err(|err| format!("{id}: batched forward: {err}"))?
        .to_vec1::<f64>()
        .map_err(|err| format!("{id}: read batched scores: {err}"))
}

fn load_cases(path: &Path) -> Result<Vec<ForwardCase>, String> {
    if !path.exists() {
        return Err(format!(
            "Missing forward fixture JSON '{}'. Restore test-data/forward/cases.json.",
            path.display()
        ));
    }
    let file = File::open(path)
        .map_err(|err| format!("Failed to open fixture '{}': {err}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|err| format!("Failed to parse fixture '{}': {err}", path.display()))
}

fn sampled_case_ids(cases: &[ForwardCase], full_mode: bool, seed: u64) -> HashSet<String> {
    if full_mode || cases.len() <= DEFAULT_SAMPLE_SIZE {
        return cases.iter().map(|case| case.id.clone()).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    cases
        .choose_multiple(&mut rng, DEFAULT_SAMPLE_SIZE)
        .map(|case| case.id.clone())
        .collect()
}

/// A filter that points at a single case runs it even outside the sample.
fn names_case(args: &Arguments, test_name: &str) -> bool {
    args.filter.as_deref().is_some_and(|filter| {
        if args.exact {
            test_name == filter
        } else {
            filter.contains("case::") && test_name.contains(filter)
        }
    })
}

fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|value| {
        matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    let Ok(value) = env::var(name) else {
        return default;
    };
    value
        .trim()
        .parse()
        .unwrap_or_else(|err| panic!("Invalid value for {name}='{value}': {err}"))
}
