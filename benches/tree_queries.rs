use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use org_directory::models::{Category, CategoryEdge, CategoryId};
use org_directory::tree::{build_forest, descendants_of};

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

/// Full three-level forest: `roots` level-1 nodes, `fan_out` children each at
/// levels two and three.
fn synthetic_forest(roots: usize, fan_out: usize) -> (Vec<Category>, Vec<CategoryEdge>) {
    let mut categories = Vec::new();
    let mut edges = Vec::new();
    let mut next_id = 0i32;

    for _ in 0..roots {
        next_id += 1;
        let root = CategoryId(next_id);
        categories.push(Category {
            id: root,
            name: format!("root-{}", root),
            level: 1,
        });

        for _ in 0..fan_out {
            next_id += 1;
            let mid = CategoryId(next_id);
            categories.push(Category {
                id: mid,
                name: format!("mid-{}", mid),
                level: 2,
            });
            edges.push(CategoryEdge {
                parent_id: root,
                child_id: mid,
            });

            for _ in 0..fan_out {
                next_id += 1;
                let leaf = CategoryId(next_id);
                categories.push(Category {
                    id: leaf,
                    name: format!("leaf-{}", leaf),
                    level: 3,
                });
                edges.push(CategoryEdge {
                    parent_id: mid,
                    child_id: leaf,
                });
            }
        }
    }

    (categories, edges)
}

fn bench_build_forest(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_forest");
    for (roots, fan_out) in [(10usize, 10usize), (50usize, 20usize)] {
        let (categories, edges) = synthetic_forest(roots, fan_out);

        group.throughput(Throughput::Elements(categories.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("forest", format!("{roots}r_{fan_out}f")),
            &(categories, edges),
            |b, (categories, edges)| {
                b.iter(|| black_box(build_forest(categories, edges, 3)));
            },
        );
    }
    group.finish();
}

fn bench_descendants_of(c: &mut Criterion) {
    let mut group = c.benchmark_group("descendants_of");
    for (roots, fan_out) in [(10usize, 10usize), (50usize, 20usize)] {
        let (categories, edges) = synthetic_forest(roots, fan_out);
        let root_ids: Vec<CategoryId> = categories
            .iter()
            .filter(|category| category.level == 1)
            .map(|category| category.id)
            .collect();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("closure", format!("{roots}r_{fan_out}f")),
            &(edges, root_ids),
            |b, (edges, root_ids)| {
                let mut seed = 42u64;
                b.iter(|| {
                    let root = root_ids[(lcg_next(&mut seed) as usize) % root_ids.len()];
                    black_box(descendants_of(root, edges));
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_build_forest, bench_descendants_of);
criterion_main!(benches);
