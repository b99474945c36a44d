//! Splitting the rank list across an in-process cluster of nodes
//!
//! Every node runs `fit` with identical arguments on its own thread. Each
//! takes a round-robin share of the ranks and node 0 merges the results.
//!
//! Run with: cargo run --example multi_node

use ndarray::Array2;
use rescalk::telemetry::init_tracing;
use rescalk::{Communicator, LocalCluster, RelationalDataset, Rescalk};
use std::sync::Arc;
use std::thread;

const NODES: usize = 3;

fn main() -> anyhow::Result<()> {
    init_tracing();

    let n = 30;
    let community = |i: usize| i * 3 / n;
    let dataset = RelationalDataset::from_dense(vec![
        Array2::from_shape_fn((n, n), |(i, j)| if community(i) == community(j) { 1.0 } else { 0.02 }),
        Array2::from_shape_fn((n, n), |(i, j)| {
            if (community(i) + 1) % 3 == community(j) {
                1.0
            } else {
                0.02
            }
        }),
    ])?;
    let ks: Vec<usize> = (1..=6).collect();

    let outcomes = thread::scope(|scope| {
        let handles: Vec<_> = LocalCluster::spawn(NODES)
            .into_iter()
            .map(|node| {
                let (dataset, ks) = (&dataset, &ks);
                scope.spawn(move || -> rescalk::Result<_> {
                    let transport: Arc<dyn Communicator> = Arc::new(node);
                    Rescalk::builder()
                        .n_perturbs(6)
                        .n_iters(100)
                        .n_nodes(NODES)
                        .transport(transport)
                        .save_output(false)
                        .predict_k(true)
                        .build()?
                        .fit(dataset, ks, "multi_node", "")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().map_err(|_| anyhow::anyhow!("node thread panicked")))
            .collect::<anyhow::Result<Vec<_>>>()
    })?;

    for outcome in outcomes {
        if let Some(result) = outcome? {
            for row in &result.rows {
                println!("k={} sils_min={:.3} err_reg={:.4}", row.k, row.sils_min, row.err_reg);
            }
            println!("predicted k: {:?}", result.k_predict);
        }
    }
    Ok(())
}
