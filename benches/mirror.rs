//! Cache mirror benchmarks
//!
//! Measures a full re-link pass over cache trees of increasing size. Every
//! iteration after the first replaces existing symlinks, which is the common
//! case on container restarts.

use comfy_deploy::mirror_tree;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tempfile::TempDir;

const SUBDIRS: &[&str] = &["checkpoints", "loras", "vae", "clip", "diffusion_models"];

fn populated_cache(files: usize) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let cache = temp_dir.path().join("cache");
    for i in 0..files {
        let dir = cache.join(SUBDIRS[i % SUBDIRS.len()]);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("model-{}.safetensors", i)), b"w").unwrap();
    }
    temp_dir
}

fn bench_mirror(c: &mut Criterion) {
    let mut group = c.benchmark_group("mirror_tree");

    for files in [10, 100, 1000] {
        let temp_dir = populated_cache(files);
        let source = temp_dir.path().join("cache");
        let target = temp_dir.path().join("models");

        group.bench_with_input(BenchmarkId::new("files", files), &files, |b, _| {
            b.iter(|| mirror_tree(&source, &target).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_mirror);
criterion_main!(benches);
