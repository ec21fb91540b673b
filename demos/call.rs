//! # Example: call
//!
//! A processor of group `g1` calls a handler that runs on group `g2`'s worker
//! and waits for its result. Only `g1`'s worker waits; `g2` keeps serving.
//!
//! ## Flow
//! ```text
//! feed ─► g1 worker ─► "sighted" processor
//!                          └─► g2.call("target", v).await
//!                                  └─► AsyncEventCall ─► g2 worker ─► handler(v)
//!                                                                       │
//!                          ◄──────────────── oneshot slot ◄─────────────┘
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example call
//! ```

use std::time::{Duration, Instant};

use streamhub::{Group, Payload, ProcessError, ProcessorFn, ProcessorRef, Return, feed};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. g2 serves the "target" call; the handler simulates slow work
    let g2: Group<()> = Group::builder().with_name("g2").build();
    g2.listen_call("target", |arg: Payload| {
        let id = arg.downcast::<u32>().map(|v| *v).unwrap_or_default();
        println!("target {id} handled!");
        std::thread::sleep(Duration::from_secs(1));
        Return::with_value("ok")
    });

    // 2. g1 forwards value 2 to g2 and waits for the answer
    let remote = g2.clone();
    let sighted: ProcessorRef<u32> = ProcessorFn::arc("sighted", move |v: u32| {
        let remote = remote.clone();
        async move {
            println!("recv: {v}");
            if v == 2 {
                let started = Instant::now();
                let (ret, _) = remote.call("target", v).await;
                println!(
                    "call spent: {:?}, return: {:?}",
                    started.elapsed(),
                    ret.value_ref::<&str>()
                );
            }
            Ok::<_, ProcessError>(None)
        }
    });
    let g1 = Group::builder().with_name("g1").with_processor(sighted).build();

    // 3. feed three values into g1
    let (tx, feed) = feed::channel::<u32>(1);
    g1.attach(feed).await?;
    for i in 1..=3 {
        tx.send(i).await?;
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    g1.stop();
    g2.stop();
    Ok(())
}
