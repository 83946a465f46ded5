// ============================================================
// Layer 3 — Task Metrics
// ============================================================
// Turns a flat sequence of predictions and labels into the
// metric record for a task, with GLUE semantics:
//
//   cola                 → mcc
//   mrpc, qqp            → acc, f1, acc_and_f1
//   sts-b                → pearson, spearmanr, corr
//   everything else      → acc
//
// Predictions are already class indices (classification) or
// scalar scores (regression). Metrics are computed over the
// whole sequence at once: F1, MCC and correlation are not
// averageable per batch.
//
// Degenerate inputs (one class only, zero variance) produce 0
// instead of NaN, matching what sklearn reports for F1 and MCC.

use std::collections::BTreeSet;

use crate::domain::error::{DistillError, DistillResult};
use crate::domain::task::{GlueTask, MetricRecord};

pub fn compute_metrics(
    task:   GlueTask,
    preds:  &[f64],
    labels: &[f64],
) -> DistillResult<MetricRecord> {
    if preds.len() != labels.len() {
        return Err(DistillError::LengthMismatch {
            predictions: preds.len(),
            labels:      labels.len(),
        });
    }
    if preds.is_empty() {
        return Err(DistillError::DataExhausted(format!("{task} metric input")));
    }

    let mut record = MetricRecord::new();
    match task {
        GlueTask::Cola => {
            record.insert("mcc".into(), matthews_corrcoef(preds, labels));
        }
        GlueTask::Mrpc | GlueTask::Qqp => {
            let acc = accuracy(preds, labels);
            let f1  = f1_score(preds, labels);
            record.insert("acc".into(), acc);
            record.insert("f1".into(), f1);
            record.insert("acc_and_f1".into(), (acc + f1) / 2.0);
        }
        GlueTask::StsB => {
            let pearson  = pearson(preds, labels);
            let spearman = spearman(preds, labels);
            record.insert("pearson".into(), pearson);
            record.insert("spearmanr".into(), spearman);
            record.insert("corr".into(), (pearson + spearman) / 2.0);
        }
        GlueTask::Sst2 | GlueTask::Mnli | GlueTask::MnliMm
        | GlueTask::Qnli | GlueTask::Rte | GlueTask::Books => {
            record.insert("acc".into(), accuracy(preds, labels));
        }
    }
    Ok(record)
}

fn class_of(v: f64) -> i64 {
    v.round() as i64
}

pub fn accuracy(preds: &[f64], labels: &[f64]) -> f64 {
    let correct = preds
        .iter()
        .zip(labels)
        .filter(|(p, l)| class_of(**p) == class_of(**l))
        .count();
    correct as f64 / preds.len() as f64
}

/// Binary F1 with class 1 as the positive label.
pub fn f1_score(preds: &[f64], labels: &[f64]) -> f64 {
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for (p, l) in preds.iter().zip(labels) {
        match (class_of(*p) == 1, class_of(*l) == 1) {
            (true, true)  => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            _ => {}
        }
    }
    let denom = 2 * tp + fp + fn_;
    if denom == 0 { 0.0 } else { 2.0 * tp as f64 / denom as f64 }
}

/// Multiclass Matthews correlation over the confusion matrix.
pub fn matthews_corrcoef(preds: &[f64], labels: &[f64]) -> f64 {
    let classes: Vec<i64> = preds
        .iter()
        .chain(labels)
        .map(|v| class_of(*v))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let index = |c: i64| classes.iter().position(|k| *k == c).unwrap_or(0);

    let k = classes.len();
    let mut true_counts = vec![0.0f64; k];
    let mut pred_counts = vec![0.0f64; k];
    let mut correct     = 0.0f64;
    for (p, l) in preds.iter().zip(labels) {
        let (pi, li) = (index(class_of(*p)), index(class_of(*l)));
        pred_counts[pi] += 1.0;
        true_counts[li] += 1.0;
        if pi == li {
            correct += 1.0;
        }
    }

    let s   = preds.len() as f64;
    let tp: f64 = true_counts.iter().zip(&pred_counts).map(|(t, p)| t * p).sum();
    let pp: f64 = pred_counts.iter().map(|p| p * p).sum();
    let tt: f64 = true_counts.iter().map(|t| t * t).sum();

    let denom = ((s * s - pp) * (s * s - tt)).sqrt();
    if denom == 0.0 { 0.0 } else { (correct * s - tp) / denom }
}

pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let (mut cov, mut vx, mut vy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let (dx, dy) = (x - mx, y - my);
        cov += dx * dy;
        vx  += dx * dx;
        vy  += dy * dy;
    }
    let denom = (vx * vy).sqrt();
    if denom == 0.0 { 0.0 } else { cov / denom }
}

pub fn spearman(xs: &[f64], ys: &[f64]) -> f64 {
    pearson(&average_ranks(xs), &average_ranks(ys))
}

/// 1-based ranks, ties share the mean of the ranks they span.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}
