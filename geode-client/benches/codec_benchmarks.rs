//! Message encoding and reply decoding throughput benchmarks.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geode_client::core::protocol::{
    decode_reply, requests, ChunkCodec, EventIdSource, HeaderOptions, MessageCodec,
    MessageHeader, MessageType, Part, RawMessage, NO_TRANSACTION,
};
use geode_client::core::protocol::chunk::{ChunkHeader, ChunkedResponseHeader};
use geode_client::core::serialization::{ObjectDataOutput, Serializable};
use geode_client::core::CacheableValue;
use tokio_util::codec::{Decoder, Encoder};

fn object(value: &CacheableValue) -> Part {
    let mut out = ObjectDataOutput::new();
    value.serialize(&mut out).unwrap();
    Part::object(out.into_bytes())
}

fn frame(kind: MessageType, parts: &[Part]) -> BytesMut {
    let body_length = parts.iter().map(Part::wire_size).sum::<usize>() as i32;
    let mut buf = BytesMut::new();
    MessageHeader {
        message_type: kind.code(),
        body_length,
        num_parts: parts.len() as i32,
        transaction_id: NO_TRANSACTION,
        flags: 0,
    }
    .write_to(&mut buf);
    for part in parts {
        part.write_to(&mut buf);
    }
    buf
}

fn bench_request_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_encoding");
    let key = CacheableValue::String("AAPL".into());
    let value = CacheableValue::String("x".repeat(256));
    let events = EventIdSource::new();

    group.bench_function("get", |b| {
        b.iter(|| requests::get("/Portfolios", black_box(&key), None, HeaderOptions::default()))
    });
    group.bench_function("put", |b| {
        b.iter(|| {
            requests::put(
                "/Portfolios",
                black_box(&key),
                requests::PutPayload::Value(&value),
                None,
                &events.next_id(),
                HeaderOptions::default(),
            )
        })
    });

    for size in [10usize, 100, 1000] {
        let keys: Vec<CacheableValue> = (0..size as i32).map(CacheableValue::Int).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("get_all", size), &keys, |b, keys| {
            b.iter(|| requests::get_all("/Portfolios", keys, None, HeaderOptions::default()))
        });
    }

    group.finish();
}

fn bench_message_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_codec");
    let request = requests::get(
        "/Portfolios",
        &CacheableValue::String("AAPL".into()),
        None,
        HeaderOptions::default(),
    )
    .unwrap();

    group.bench_function("encode", |b| {
        let mut codec = MessageCodec::new();
        b.iter(|| {
            let mut dst = BytesMut::new();
            codec.encode(black_box(&request), &mut dst).unwrap();
            dst
        })
    });

    let reply = frame(
        MessageType::Response,
        &[object(&CacheableValue::String("x".repeat(256))), Part::int(0)],
    );
    group.throughput(Throughput::Bytes(reply.len() as u64));
    group.bench_function("decode_get_reply", |b| {
        let mut codec = MessageCodec::new();
        b.iter(|| {
            let mut src = reply.clone();
            let message = codec.decode(&mut src).unwrap().unwrap();
            decode_reply(MessageType::Request, black_box(&message)).unwrap()
        })
    });

    group.finish();
}

fn bench_raw_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("raw_message_parse");

    for parts in [2usize, 16, 128] {
        let body: Vec<Part> = (0..parts as i32).map(Part::int).collect();
        let bytes: Bytes = frame(MessageType::Response, &body).freeze();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(parts), &bytes, |b, bytes| {
            b.iter(|| RawMessage::parse(black_box(bytes.clone())).unwrap())
        });
    }

    group.finish();
}

fn bench_chunk_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_decoding");

    for chunks in [1usize, 10, 100] {
        let part = object(&CacheableValue::Int(7));
        let mut stream = BytesMut::new();
        for i in 0..chunks {
            let chunk = ChunkHeader {
                length: part.wire_size() as i32,
                flags: if i + 1 == chunks { 0x01 } else { 0 },
            };
            if i == 0 {
                ChunkedResponseHeader {
                    message_type: MessageType::Response.code(),
                    num_parts: 1,
                    transaction_id: NO_TRANSACTION,
                    chunk,
                }
                .write_to(&mut stream);
            } else {
                chunk.write_to(&mut stream);
            }
            part.write_to(&mut stream);
        }

        group.throughput(Throughput::Elements(chunks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunks), &stream, |b, stream| {
            b.iter(|| {
                let mut codec = ChunkCodec::new();
                let mut src = stream.clone();
                let mut seen = 0;
                while let Some(chunk) = codec.decode(&mut src).unwrap() {
                    seen += chunk.parts().unwrap().len();
                    if chunk.is_last() {
                        break;
                    }
                }
                seen
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_request_encoding,
    bench_message_codec,
    bench_raw_parse,
    bench_chunk_decoding,
);

criterion_main!(benches);
