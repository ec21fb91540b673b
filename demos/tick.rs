//! # Example: tick
//!
//! Prints the time elapsed since start every second and stops ticking after
//! five seconds, when the callback returns `false`.
//!
//! ## Run
//! ```bash
//! cargo run --example tick
//! ```

use std::time::{Duration, Instant};

use streamhub::Group;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let g: Group<()> = Group::builder().with_name("tick").build();
    let start = Instant::now();
    g.tick(Duration::from_secs(1), move || {
        let since = start.elapsed();
        if since > Duration::from_secs(5) {
            println!("done after {since:?}");
            return false;
        }
        println!("{since:?}");
        true
    })
    .await;

    tokio::time::sleep(Duration::from_millis(6_500)).await;
    g.stop();
}
