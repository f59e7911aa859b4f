use slotring::{CircularBuffer, OverflowPolicy};
use std::time::Duration;

/// This demo publishes ticks into a small circular buffer read by a fast and a slow cursor.
/// The slow cursor gets overrun and reports the items it lost. Nothing drains the shared read
/// cursor, so once the ring is full every write overwrites an item and the `TRACE` policy logs it
/// (run with `RUST_LOG=warn` to see them).

const CAPACITY_BITS: u32 = 4;
const NUM_TICKS: u64 = 256;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let ring = CircularBuffer::new(CAPACITY_BITS)?;
    ring.set_overflow_policy(OverflowPolicy::TRACE);

    let fast = ring.cursor();
    let slow = ring.cursor();

    std::thread::scope(|s| {
        s.spawn(|| {
            let mut received = 0;
            while received < NUM_TICKS {
                let tick = fast.read();
                received = *tick + 1;
            }
            println!("fast cursor: read {} lost {}", fast.read_count(), fast.lost_count());
        });

        s.spawn(|| {
            let mut received = 0;
            while received < NUM_TICKS {
                let tick = slow.read();
                received = *tick + 1;
                std::thread::sleep(Duration::from_millis(1));
            }
            println!("slow cursor: read {} lost {}", slow.read_count(), slow.lost_count());
        });

        for tick in 0..NUM_TICKS {
            ring.write(tick).unwrap();
            std::thread::sleep(Duration::from_micros(100));
        }
    });

    println!("{:?}", *ring);
    Ok(())
}
