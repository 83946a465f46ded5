// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `eval`, and all
// their flags. Flag names follow the training config keys.

use clap::{Args, Subcommand};
use crate::application::train_use_case::TrainConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a student, optionally distilled from a teacher
    Train(TrainArgs),

    /// Evaluate the best checkpoint of a finished run
    Eval(EvalArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Task: cola, sst-2, mnli, mnli-mm, qnli, rte, books, mrpc, qqp, sts-b
    #[arg(long, default_value = "sst-2")]
    pub task: String,

    /// Directory with the task's train.tsv and dev file
    #[arg(long)]
    pub data_dir: String,

    /// tokenizer.json to use; defaults to the one in --teacher-model
    #[arg(long)]
    pub tokenizer: Option<String>,

    /// Directory to save checkpoints, config and metrics.csv
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    #[arg(long, default_value_t = 128)]
    pub max_seq_len: usize,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    /// Initial SGD learning rate
    #[arg(long, default_value_t = 0.025)]
    pub lr: f64,

    /// Floor of the cosine schedule
    #[arg(long, default_value_t = 0.001)]
    pub lr_min: f64,

    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    #[arg(long, default_value_t = 3e-4)]
    pub weight_decay: f64,

    /// Gradient norm ceiling
    #[arg(long, default_value_t = 5.0)]
    pub grad_clip: f64,

    /// Drop-path probability reached at the last epoch
    #[arg(long, default_value_t = 0.2)]
    pub drop_path_prob: f64,

    /// Log a progress line every N steps
    #[arg(long, default_value_t = 50)]
    pub print_freq: usize,

    #[arg(long, default_value_t = 2)]
    pub seed: u64,

    /// Checkpoint directory of the teacher (encoder_config.json, best weights, tokenizer.json)
    #[arg(long)]
    pub teacher_model: Option<String>,

    /// Teacher family: bert, roberta or gpt2
    #[arg(long, default_value = "bert")]
    pub teacher_type: String,

    /// Distil from the teacher's logits
    #[arg(long)]
    pub use_kd: bool,

    /// Match student and teacher layers with EMD (needs --use-kd)
    #[arg(long)]
    pub use_emd: bool,

    /// Match attention maps derived from the hidden states
    #[arg(long)]
    pub hidn2attn: bool,

    /// Let the transport plan reweight the layers after every step
    #[arg(long)]
    pub update_emd: bool,

    #[arg(long, default_value_t = 0.5)]
    pub kd_alpha: f64,

    #[arg(long, default_value_t = 1.0)]
    pub kd_temperature: f64,

    /// Add rate · EMD loss to the backpropagated loss
    #[arg(long)]
    pub emd_rate: Option<f64>,

    /// Keep the student's random token embeddings
    #[arg(long)]
    pub no_init_embeddings: bool,

    /// Number of student encoder layers
    #[arg(long, default_value_t = 4)]
    pub layers: usize,

    #[arg(long, default_value_t = 312)]
    pub d_model: usize,

    /// d_model must be divisible by num_heads
    #[arg(long, default_value_t = 12)]
    pub num_heads: usize,

    #[arg(long, default_value_t = 1200)]
    pub d_ff: usize,

    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    /// Expose per-head slices of each layer to the matcher
    #[arg(long)]
    pub per_head_reps: bool,

    /// Process rank; only rank 0 writes to disk
    #[arg(long, default_value_t = 0)]
    pub rank: usize,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            task:            a.task,
            data_dir:        a.data_dir,
            tokenizer:       a.tokenizer,
            checkpoint_dir:  a.checkpoint_dir,
            max_seq_len:     a.max_seq_len,
            batch_size:      a.batch_size,
            epochs:          a.epochs,
            lr:              a.lr,
            lr_min:          a.lr_min,
            momentum:        a.momentum,
            weight_decay:    a.weight_decay,
            grad_clip:       a.grad_clip,
            drop_path_prob:  a.drop_path_prob,
            print_freq:      a.print_freq,
            seed:            a.seed,
            teacher_model:   a.teacher_model,
            teacher_type:    a.teacher_type,
            use_kd:          a.use_kd,
            use_emd:         a.use_emd,
            hidn2attn:       a.hidn2attn,
            update_emd:      a.update_emd,
            kd_alpha:        a.kd_alpha,
            kd_temperature:  a.kd_temperature,
            emd_rate:        a.emd_rate,
            init_embeddings: !a.no_init_embeddings,
            layers:          a.layers,
            d_model:         a.d_model,
            num_heads:       a.num_heads,
            d_ff:            a.d_ff,
            dropout:         a.dropout,
            per_head_reps:   a.per_head_reps,
            rank:            a.rank,
            ..TrainConfig::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Checkpoint directory of the run to evaluate
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Read the dev split from here instead of the run's data_dir
    #[arg(long)]
    pub data_dir: Option<String>,

    #[arg(long)]
    pub batch_size: Option<usize>,
}
