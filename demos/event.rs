//! # Example: event
//!
//! A processor of group `g1` emits an event that group `g2` handles on its own
//! worker. Emitting does not wait for the handler.
//!
//! ## Run
//! ```bash
//! cargo run --example event
//! ```

use std::time::Duration;

use streamhub::{Group, Payload, ProcessError, ProcessorFn, ProcessorRef, feed};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let g2: Group<()> = Group::builder().with_name("g2").build();
    g2.listen_event("target", |arg: Payload| {
        if let Ok(id) = arg.downcast::<u32>() {
            println!("target {id} handled!");
        }
    });

    let remote = g2.clone();
    let sighted: ProcessorRef<u32> = ProcessorFn::arc("sighted", move |v: u32| {
        let remote = remote.clone();
        async move {
            println!("recv: {v}");
            if v == 2 {
                remote.emit("target", v).await;
            }
            Ok::<_, ProcessError>(None)
        }
    });
    let g1 = Group::builder().with_name("g1").with_processor(sighted).build();

    let (tx, feed) = feed::channel::<u32>(1);
    g1.attach(feed).await?;
    for i in 1..=3 {
        tx.send(i).await?;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    g1.stop();
    g2.stop();
    Ok(())
}
