use uring_setup::{mlock, Params, Ring};

fn main() {
    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .init();
    uring_setup::env_tunables::assert_no_unknown_env_vars();

    let ring = match Ring::new(128) {
        Ok(ring) => ring,
        Err(e) => {
            tracing::error!(error = %e, "io_uring is not available");
            std::process::exit(1);
        }
    };
    tracing::info!(
        sq_entries = ring.sq().ring_entries(),
        cq_entries = ring.cq().ring_entries(),
        features = format_args!("{:#x}", ring.features()),
        strategy = ?ring.strategy(),
        "ring set up"
    );
    ring.dontfork().unwrap();

    match ring.probe() {
        Some(probe) => {
            let supported = probe.ops().iter().filter(|op| op.supported).count();
            tracing::info!(last_op = probe.last_op(), supported, "probed opcodes");
        }
        None => tracing::info!("kernel does not support IORING_REGISTER_PROBE"),
    }
    ring.exit();

    for entries in [8, 128, 4096] {
        let bytes = mlock::mlock_size_params(entries, &Params::new()).unwrap();
        tracing::info!(entries, bytes, "memlock budget");
    }

    let metrics = uring_setup::metrics::global();
    tracing::info!(
        created = metrics.rings_created,
        destroyed = metrics.rings_destroyed,
        "done"
    );
}
