//! Rank selection on a synthetic dataset with four planted communities
//!
//! Run with: cargo run --example rank_selection
//! Set `RUST_LOG=rescalk=debug` for per-trial progress.

use ndarray::Array2;
use rand::Rng;
use rescalk::perturb::trial_rng;
use rescalk::telemetry::init_tracing;
use rescalk::{RelationalDataset, Rescalk};

/// `n` entities in `blocks` communities, one relation per community pairing
fn synthetic(n: usize, blocks: usize, m: usize) -> rescalk::Result<RelationalDataset> {
    let mut rng = trial_rng(2024);
    let community = |i: usize| i * blocks / n;
    let relations = (0..m)
        .map(|shift| {
            Array2::from_shape_fn((n, n), |(i, j)| {
                let linked = (community(i) + shift) % blocks == community(j);
                let base = if linked { 1.0 } else { 0.02 };
                base * rng.gen_range(0.8..1.2)
            })
        })
        .collect();
    RelationalDataset::from_dense(relations)
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let dataset = synthetic(40, 4, 3)?;
    let save_path = std::env::temp_dir().join("rescalk_demo");
    std::fs::create_dir_all(&save_path)?;

    let model = Rescalk::builder()
        .n_perturbs(12)
        .n_iters(150)
        .epsilon(0.015)
        .n_jobs(-1)
        .save_path(&save_path)
        .get_plot_data(true)
        .predict_k(true)
        .sill_thresh(0.75)
        .verbose(true)
        .build()?;

    let Some(result) = model.fit(&dataset, &[1, 2, 3, 4, 5, 6], "synthetic", "four communities")? else {
        return Ok(());
    };

    println!("{:<4}{:>12}{:>12}{:>12}", "k", "sils_min", "sils_mean", "err_reg");
    for row in &result.rows {
        println!("{:<4}{:>12.3}{:>12.3}{:>12.4}", row.k, row.sils_min, row.sils_mean, row.err_reg);
    }
    println!("predicted k: {:?}", result.k_predict);
    println!("artifacts in {}", save_path.join(&result.experiment).display());
    Ok(())
}
