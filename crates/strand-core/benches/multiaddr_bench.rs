use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use strand_core::{Multiaddr, MuxFrame};

const ADDR: &str = "/ip4/192.168.1.20/tcp/4001/ipfs/QmcgpsyWgH8Y8ajJz1Cu72KnS5uo2Aa2LpzU7kinSupNKC";

fn bench_multiaddr_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("multiaddr_parse");

    let bytes = ADDR.parse::<Multiaddr>().unwrap().to_bytes();
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("from_text", |b| {
        b.iter(|| black_box(ADDR).parse::<Multiaddr>())
    });
    group.bench_function("from_bytes", |b| {
        b.iter(|| Multiaddr::from_bytes(black_box(&bytes)))
    });

    group.finish();
}

fn bench_multiaddr_encode(c: &mut Criterion) {
    let addr: Multiaddr = ADDR.parse().unwrap();

    let mut group = c.benchmark_group("multiaddr_encode");
    group.bench_function("to_text", |b| b.iter(|| black_box(&addr).to_string()));
    group.bench_function("to_bytes", |b| b.iter(|| black_box(&addr).to_bytes()));
    group.finish();
}

fn bench_mux_frame(c: &mut Criterion) {
    let sizes: Vec<(usize, &str)> = vec![
        (64, "64_bytes"),
        (1024, "1024_bytes"),
        (16 * 1024, "16384_bytes"),
    ];

    let mut group = c.benchmark_group("mux_frame_decode");
    for (size, name) in sizes {
        let encoded = MuxFrame::data(1, vec![0x42; size]).unwrap().encode();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(name, |b| {
            b.iter(|| MuxFrame::decode(black_box(&encoded), 16 * 1024))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_multiaddr_parse,
    bench_multiaddr_encode,
    bench_mux_frame
);
criterion_main!(benches);
