use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use spiceflow::bus::{EventBus, InMemoryEventBus, SchemaRegistry, channel};
use spiceflow::events::WorkflowEvent;

const BATCH_SIZES: &[usize] = &[64, 256, 1024];

async fn publish_batch(bus: &InMemoryEventBus, batch: usize) {
    for i in 0..batch {
        bus.publish(
            channel::NODE_LIFECYCLE,
            WorkflowEvent::NodeStarted {
                run_id: "bench".to_string(),
                node_id: format!("node-{i}"),
                step: i as u64,
            },
            None,
        )
        .await
        .expect("publish");
    }
}

fn event_bus_throughput(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let registry = Arc::new(SchemaRegistry::standard());
    let mut group = c.benchmark_group("event_bus_publish");

    for &batch in BATCH_SIZES {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &size| {
            b.to_async(&runtime).iter(|| {
                let registry = registry.clone();
                async move {
                    let bus = InMemoryEventBus::new(registry);
                    publish_batch(&bus, size).await;
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, event_bus_throughput);
criterion_main!(benches);
