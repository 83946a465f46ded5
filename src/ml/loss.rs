// ============================================================
// Layer 5 — Task and Distillation Losses
// ============================================================
//   task_loss   cross-entropy (classification) or MSE (regression)
//   KdLoss      soft-label distillation blended with the task loss
//
// Classification:
//   soft = T² · KL(softmax(t/T) ‖ softmax(s/T))    batch mean
//   hard = CE(s, y)
//
// Regression:
//   soft = MSE(s, t)
//   hard = MSE(s, y)
//
//   total = α · soft + (1 - α) · hard

use burn::{
    nn::loss::{CrossEntropyLossConfig, MseLoss, Reduction},
    prelude::*,
    tensor::activation::{log_softmax, softmax},
};

use crate::domain::task::OutputMode;

/// Hard-label loss. `labels` holds class indices or target scores.
pub fn task_loss<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 1>, mode: OutputMode) -> Tensor<B, 1> {
    match mode {
        OutputMode::Classification => {
            let ce = CrossEntropyLossConfig::new().init(&logits.device());
            ce.forward(logits, labels.int())
        }
        OutputMode::Regression => {
            MseLoss::new().forward(logits, labels.unsqueeze_dim(1), Reduction::Mean)
        }
    }
}

#[derive(Debug, Clone)]
pub struct KdTerms<B: Backend> {
    pub total: Tensor<B, 1>,
    pub soft:  Tensor<B, 1>,
    pub hard:  Tensor<B, 1>,
}

#[derive(Debug, Clone, Copy)]
pub struct KdLoss {
    pub alpha:       f64,
    pub temperature: f64,
}

impl KdLoss {
    pub fn new(alpha: f64, temperature: f64) -> Self {
        Self { alpha, temperature }
    }

    pub fn forward<B: Backend>(
        &self,
        student: Tensor<B, 2>,
        teacher: Tensor<B, 2>,
        labels:  Tensor<B, 1>,
        mode:    OutputMode,
    ) -> KdTerms<B> {
        let soft = match mode {
            OutputMode::Classification => self.soft_kl(student.clone(), teacher),
            OutputMode::Regression => MseLoss::new().forward(student.clone(), teacher, Reduction::Mean),
        };
        let hard  = task_loss(student, labels, mode);
        let total = soft.clone().mul_scalar(self.alpha) + hard.clone().mul_scalar(1.0 - self.alpha);
        KdTerms { total, soft, hard }
    }

    fn soft_kl<B: Backend>(&self, student: Tensor<B, 2>, teacher: Tensor<B, 2>) -> Tensor<B, 1> {
        let [batch_size, _] = student.dims();
        let t = self.temperature;
        let log_p_student = log_softmax(student.div_scalar(t), 1);
        let log_p_teacher = log_softmax(teacher.clone().div_scalar(t), 1);
        let p_teacher     = softmax(teacher.div_scalar(t), 1);

        (p_teacher * (log_p_teacher - log_p_student))
            .sum()
            .div_scalar(batch_size as f64)
            .mul_scalar(t * t)
    }
}
