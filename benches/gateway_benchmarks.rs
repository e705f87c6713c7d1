// ABOUTME: Benchmarks for the gateway's hot paths
// ABOUTME: submit_sm decoding, receipt construction and segmented message encoding

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use smsc_gateway::codec::{Encodable, Frame};
use smsc_gateway::datatypes::{DataCoding, SubmitSm};
use smsc_gateway::pdu::{
    Addressing, DeliveryReceipt, Segmentation, UdhVariant, build_submit_response,
    segment_message,
};
use std::io::Cursor;
use std::time::Duration;

fn sample_submit_sm() -> SubmitSm {
    SubmitSm::builder()
        .sequence_number(1)
        .source_addr("12345")
        .destination_addr("67890")
        .registered_delivery(1)
        .short_message("Hello World")
        .build()
        .expect("valid submit_sm")
}

fn bench_submit_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_path");
    group.measurement_time(Duration::from_secs(10));

    let bytes = sample_submit_sm().to_bytes().expect("encodable");
    group.bench_function("frame_check", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(&bytes[..]));
            Frame::check(&mut cursor)
        })
    });
    group.bench_function("submit_sm_decode", |b| {
        b.iter(|| Frame::parse(black_box(&bytes[..])))
    });
    group.bench_function("submit_sm_resp_encode", |b| {
        b.iter(|| build_submit_response(black_box(7), black_box(0x1234)).to_bytes())
    });

    group.finish();
}

fn bench_receipts(c: &mut Criterion) {
    let mut group = c.benchmark_group("delivery_receipt");
    group.measurement_time(Duration::from_secs(10));

    let submit_sm = sample_submit_sm();
    let submitted = chrono::Utc::now();
    group.bench_function("build", |b| {
        b.iter(|| {
            DeliveryReceipt::for_submission(black_box(&submit_sm), 42, submitted)
                .to_deliver_sm(black_box(9))
        })
    });
    group.bench_function("build_and_encode", |b| {
        b.iter(|| {
            DeliveryReceipt::for_submission(black_box(&submit_sm), 42, submitted)
                .to_deliver_sm(9)
                .map(|pdu| pdu.to_bytes())
        })
    });

    group.finish();
}

fn bench_segmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmentation");
    group.measurement_time(Duration::from_secs(10));

    let addressing = Addressing::new("123456789", "987654321");
    let body = vec![0x41u8; 1200];
    for strategy in [
        Segmentation::Sar,
        Segmentation::Udh(UdhVariant::EightBit),
        Segmentation::Udh(UdhVariant::SixteenBit),
        Segmentation::Payload,
    ] {
        group.bench_with_input(
            BenchmarkId::new("ten_parts", format!("{strategy:?}")),
            &strategy,
            |b, &strategy| {
                b.iter(|| {
                    segment_message(strategy, &addressing, 7, black_box(&body), 10, DataCoding::UCS2)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_submit_path, bench_receipts, bench_segmentation);
criterion_main!(benches);
