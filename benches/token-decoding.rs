use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use chunkstream::{
    ogg::{Page, PAGE_HEADER},
    token::{StringToken, TextEncoding, Token, F80_BE, FOURCC, GUID, U24_BE, U32_LE, U64_BE},
    tokenizer::{from_buffer, TokenizerExt},
};
use tokio::runtime::Runtime;

pub fn primitives(c: &mut Criterion) {
    let buf: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

    let mut group = c.benchmark_group("Primitive decode");

    group.bench_function("u24 BE", |b| {
        b.iter(|| {
            for i in (0..4093).step_by(3) {
                black_box(U24_BE.decode(&buf, i).unwrap());
            }
        })
    });
    group.bench_function("u32 LE", |b| {
        b.iter(|| {
            for i in (0..4092).step_by(4) {
                black_box(U32_LE.decode(&buf, i).unwrap());
            }
        })
    });
    group.bench_function("u64 BE", |b| {
        b.iter(|| {
            for i in (0..4088).step_by(8) {
                black_box(U64_BE.decode(&buf, i).unwrap());
            }
        })
    });
    group.bench_function("f80 BE", |b| {
        b.iter(|| {
            for i in (0..4086).step_by(10) {
                black_box(F80_BE.decode(&buf, i).unwrap());
            }
        })
    });
    group.bench_function("four-cc", |b| {
        b.iter(|| {
            for i in (0..4092).step_by(4) {
                black_box(FOURCC.decode(&buf, i).unwrap());
            }
        })
    });
    group.bench_function("GUID", |b| {
        b.iter(|| {
            for i in (0..4080).step_by(16) {
                black_box(GUID.decode(&buf, i).unwrap());
            }
        })
    });

    group.finish();
}

pub fn strings(c: &mut Criterion) {
    let text = "chunkstream ".repeat(64);
    let utf8 = text.as_bytes().to_vec();
    let utf16: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();

    let mut group = c.benchmark_group("String decode");

    for (name, encoding, bytes) in [
        ("Latin-1", TextEncoding::Latin1, &utf8),
        ("UTF-8", TextEncoding::Utf8, &utf8),
        ("UTF-16LE", TextEncoding::Utf16Le, &utf16),
        ("Windows-1252", TextEncoding::Windows1252, &utf8),
    ] {
        let token = StringToken::new(bytes.len(), encoding);
        group.bench_with_input(BenchmarkId::new(name, bytes.len()), bytes, |b, i| {
            b.iter(|| black_box(token.decode(i, 0).unwrap()))
        });
    }

    group.finish();
}

pub fn tokenizer_reads(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut pages = vec![];
    for seq in 0..64u32 {
        pages.extend(utils::ogg_page(0, u64::from(seq) * 960, 1, seq, &[&[0u8; 200]]));
    }

    let mut group = c.benchmark_group("Buffer tokenizer");

    group.bench_function("Ogg page headers", |b| {
        b.iter_batched(
            || from_buffer(pages.clone()),
            |mut tok| {
                rt.block_on(async {
                    for _ in 0..64 {
                        black_box(tok.peek_token(&PAGE_HEADER).await.unwrap());
                        black_box(Page::read(&mut tok).await.unwrap());
                    }
                })
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(decode, primitives, strings);
criterion_group!(tokenizer, tokenizer_reads);
criterion_main!(decode, tokenizer);
