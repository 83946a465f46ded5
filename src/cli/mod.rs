// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap and delegates every piece of work to Layer 2.
//
// Two commands are supported:
//   1. `train` — trains a student, with or without a teacher
//   2. `eval`  — re-scores the best checkpoint of a run

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvalArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "glue-distill",
    version = "0.1.0",
    about = "Distil a fine-tuned GLUE teacher into a small transformer student."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route the subcommand to its use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Eval(args)  => run_eval(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting {} training on data in: {}", args.task, args.data_dir);
    let checkpoint_dir = args.checkpoint_dir.clone();

    let summary = TrainUseCase::new(args.into()).execute()?;

    println!("\n{:>5} {:>10} {:>10} {:>10} {:>10}", "epoch", "lr", "train", "val", "val_loss");
    for row in &summary.history {
        println!(
            "{:>5} {:>10.6} {:>10.4} {:>10.4} {:>10.4}{}",
            row.epoch,
            row.lr,
            row.train_metric,
            row.val_metric,
            row.val_loss,
            if row.is_best { "  *" } else { "" },
        );
    }

    match summary.best_epoch {
        Some(epoch) => println!(
            "Training complete. Best metric {:.4} at epoch {} (checkpoints in '{}').",
            summary.best_metric, epoch, checkpoint_dir
        ),
        None => println!("Training complete. No epoch produced a usable validation metric."),
    }
    if summary.skipped_steps > 0 {
        println!("{} steps were skipped after numerical errors.", summary.skipped_steps);
    }
    Ok(())
}

fn run_eval(args: EvalArgs) -> Result<()> {
    use crate::application::eval_use_case::EvalUseCase;

    let use_case = EvalUseCase::new(args.checkpoint_dir, args.data_dir, args.batch_size);
    let (task, summary) = use_case.execute()?;

    println!("\n{} dev results ({} samples)", task, summary.samples);
    for (name, value) in &summary.record {
        println!("  {:<12} {:.4}", name, value);
    }
    println!("  {:<12} {:.4}", "loss", summary.loss);
    Ok(())
}
