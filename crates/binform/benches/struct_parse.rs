use binform::{Endian, Schema, TypeDef};
use criterion::{criterion_group, criterion_main, Criterion};

fn gen_schema(field_count: usize) -> Schema {
    let mut def = TypeDef::new("struct").endian(Endian::Big);

    for i in 0..field_count {
        def = def.field(format!("f{}", i), TypeDef::new("uint16"));
    }

    Schema::compile(def).unwrap()
}

fn gen_packet(field_count: usize) -> Vec<u8> {
    // Deterministic but non-trivial pattern
    (0..field_count * 2).map(|i| (i * 31 % 256) as u8).collect()
}

fn bench_struct_parse(c: &mut Criterion) {
    for &field_count in &[1usize, 10, 50, 100] {
        let schema = gen_schema(field_count);
        let packet = gen_packet(field_count);

        c.bench_function(&format!("parse_{}_fields", field_count), |b| {
            b.iter(|| {
                let _ = schema.parse(&packet).unwrap();
            })
        });
    }
}

criterion_group!(benches, bench_struct_parse);
criterion_main!(benches);
