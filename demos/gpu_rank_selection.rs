//! Rank selection with trials resident on GPUs
//!
//! Each trial opens a session on adapter `seed mod n_jobs`; without a usable
//! adapter the run falls back to CPU workers with a warning.
//!
//! Run with: cargo run --example gpu_rank_selection --features gpu

use ndarray::Array2;
use rescalk::gpu::AdapterInventory;
use rescalk::telemetry::init_tracing;
use rescalk::{RelationalDataset, Rescalk};

fn main() -> anyhow::Result<()> {
    init_tracing();

    let inventory = AdapterInventory::detect();
    for (index, device) in inventory.devices().iter().enumerate() {
        println!("gpu:{index} {} ({:?}, {:?})", device.name, device.device_type, device.backend);
    }

    let n = 256;
    let community = |i: usize| i * 4 / n;
    let dataset = RelationalDataset::from_dense(
        (0..4)
            .map(|shift| {
                Array2::from_shape_fn((n, n), |(i, j)| {
                    if (community(i) + shift) % 4 == community(j) {
                        1.0
                    } else {
                        0.01
                    }
                })
            })
            .collect(),
    )?;

    let model = Rescalk::builder()
        .use_gpu(true)
        .n_jobs(-1)
        .n_perturbs(8)
        .n_iters(100)
        .save_output(false)
        .predict_k(true)
        .build()?;
    println!("effective settings: {:?}", model.settings());

    if let Some(result) = model.fit(&dataset, &[2, 3, 4, 5, 6], "gpu", "")? {
        for row in &result.rows {
            println!("k={} sils_min={:.3} err_reg={:.4}", row.k, row.sils_min, row.err_reg);
        }
        println!("predicted k: {:?}", result.k_predict);
    }
    Ok(())
}
