//! # Example: recovery
//!
//! Three groups run the same always-panicking processor over three values with
//! different recovery budgets:
//!
//! ```text
//! Recovery::from(0)   → 1 panic, worker stops
//! Recovery::from(1)   → 2 panics (one restart), worker stops
//! Recovery::from(-1)  → 3 panics, worker keeps serving
//! ```
//!
//! Worker events are printed as they arrive.
//!
//! ## Run
//! ```bash
//! RUST_BACKTRACE=1 cargo run --example recovery
//! ```

use std::time::Duration;

use streamhub::{EventKind, Group, ProcessError, ProcessorFn, ProcessorRef, Recovery, feed};
use tracing_subscriber::EnvFilter;

async fn recovery_n(n: i64) -> Result<Group<u32>, Box<dyn std::error::Error>> {
    let panicky: ProcessorRef<u32> = ProcessorFn::arc("panic", |v: u32| async move {
        println!("data: {v}");
        if v > 0 {
            panic!("something went wrong");
        }
        Ok::<_, ProcessError>(Some(v))
    });
    let g = Group::builder()
        .with_name(format!("recovery({n})"))
        .with_recovery(Recovery::from(n))
        .with_processor(panicky)
        .build();

    let mut events = g.subscribe();
    tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            if matches!(
                ev.kind,
                EventKind::WorkerRestarted | EventKind::WorkerExhausted | EventKind::WorkerAborted
            ) {
                println!("[{}] {:?} remaining={:?}", ev.hub.as_deref().unwrap_or("?"), ev.kind, ev.remaining);
            }
        }
    });

    let (tx, feed) = feed::channel::<u32>(4);
    g.attach(feed).await?;
    for i in 1..=3 {
        tx.send(i).await?;
    }
    Ok(g)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let groups = [recovery_n(0).await?, recovery_n(1).await?, recovery_n(-1).await?];

    tokio::time::sleep(Duration::from_millis(300)).await;
    for g in &groups {
        g.stop();
    }
    Ok(())
}
