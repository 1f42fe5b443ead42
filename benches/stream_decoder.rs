use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quill::core::stream_decoder::StreamDecoder;

fn make_body(n_chunks: usize, token: &str) -> Vec<u8> {
    let mut body = String::new();
    for i in 0..n_chunks {
        let delta = serde_json::json!({
            "id": format!("chunk-{i}"),
            "choices": [{ "index": 0, "delta": { "content": token } }]
        });
        body.push_str("data: ");
        body.push_str(&delta.to_string());
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

fn decode(body: &[u8], read_size: usize) -> usize {
    let mut decoder = StreamDecoder::new();
    let mut fragments = 0;
    for read in body.chunks(read_size) {
        fragments += decoder.feed(read).len();
    }
    fragments + decoder.finish().len()
}

fn bench_stream_decoder(c: &mut Criterion) {
    let token = "lorem ipsum dolor ✓ ";

    for &chunks in &[200usize, 2000usize] {
        let body = make_body(chunks, token);

        let mut group = c.benchmark_group(format!("stream_decoder_chunks{}", chunks));
        group.throughput(Throughput::Bytes(body.len() as u64));

        // Network reads rarely line up with event boundaries.
        for &read_size in &[7usize, 512usize, 16 * 1024] {
            group.bench_function(BenchmarkId::new("feed", read_size), |b| {
                b.iter(|| decode(&body, read_size))
            });
        }

        group.finish();
    }
}

criterion_group!(benches, bench_stream_decoder);
criterion_main!(benches);
