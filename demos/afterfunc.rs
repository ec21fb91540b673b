//! # Example: afterfunc
//!
//! Schedules a deferred callback that re-arms itself, printing the time elapsed
//! since start roughly once per second. The callback always runs on the group's
//! worker; only the waiting happens off-worker.
//!
//! ## Flow
//! ```text
//! after_func(1s, f) ──► AsyncCall ──► interceptor spawns sleep(1s)
//!                                          │
//!                     f() on worker ◄── AsyncReturn
//!                        └─► spawn: after_func(1s, f) again
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example afterfunc
//! ```

use std::time::{Duration, Instant};

use streamhub::Group;
use tracing_subscriber::EnvFilter;

fn interval(g: Group<()>, start: Instant) -> Box<dyn FnOnce() + Send> {
    Box::new(move || {
        println!("elapsed: {:?}", start.elapsed());
        // the callback runs on the worker; schedule the next round from a task
        tokio::spawn(async move {
            let next = interval(g.clone(), start);
            g.after_func(Duration::from_secs(1), next).await;
        });
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let g: Group<()> = Group::builder().with_name("afterfunc").build();
    g.after_func(Duration::from_secs(1), interval(g.clone(), Instant::now()))
        .await;

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    g.stop();
}
