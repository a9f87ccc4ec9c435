use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use spiceflow::graph::{Graph, GraphValidator};
use spiceflow::node::{Node, NodeContext, NodeError, NodeResult};

const CHAIN_LENGTHS: &[usize] = &[16, 128, 1024];

struct BenchNode;

#[async_trait]
impl Node for BenchNode {
    async fn run(&self, _ctx: NodeContext) -> Result<NodeResult, NodeError> {
        Ok(NodeResult::new())
    }
}

fn chain_graph(len: usize) -> Graph {
    let mut builder = Graph::builder(format!("chain-{len}")).entry_point("n0");
    for i in 0..len {
        builder = builder.add_node(format!("n{i}"), BenchNode);
        if i > 0 {
            builder = builder.add_edge(format!("n{}", i - 1), format!("n{i}"));
        }
    }
    builder.build()
}

fn graph_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_validate");
    for &len in CHAIN_LENGTHS {
        let graph = chain_graph(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &graph, |b, graph| {
            b.iter(|| GraphValidator::validate(graph).expect("valid"));
        });
    }
    group.finish();
}

criterion_group!(benches, graph_validate);
criterion_main!(benches);
