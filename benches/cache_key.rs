//! Benchmarks for the request hot path
//!
//! This benchmark measures:
//! - Cache key derivation for growing conversations
//! - Request normalization (alias lookup, clamping, system prompt)
//! - Local cache tier lookups

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chat_gateway::cache::{CacheKey, CacheKeyBuilder, LocalCache};
use chat_gateway::normalize::{NormalizerConfig, RequestNormalizer};
use chat_gateway::types::{ChatMessage, ChatResponse, RawChatRequest};
use serde_json::json;
use std::time::Duration;

fn conversation(turns: usize) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system("You are a helpful assistant.")];
    for i in 0..turns {
        messages.push(ChatMessage::user(format!("question number {i} about caching")));
        messages.push(ChatMessage::assistant(format!("answer number {i}, fairly long text")));
    }
    messages
}

fn bench_cache_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_key");
    let builder = CacheKeyBuilder::new();

    for turns in [1usize, 8, 64] {
        let messages = conversation(turns);
        group.throughput(Throughput::Elements(messages.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(turns), &messages, |b, msgs| {
            b.iter(|| builder.build(black_box("Qwen/Qwen2.5-72B-Instruct"), black_box(msgs)))
        });
    }
    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let normalizer = RequestNormalizer::new(NormalizerConfig::default());
    let body = json!([
        { "role": "user", "content": "Hello" },
        { "role": "assistant", "content": "Hi, how can I help?" },
        { "role": "user", "content": "Explain LRU caches." }
    ]);

    c.bench_function("normalize_request", |b| {
        b.iter(|| {
            let raw = RawChatRequest::new(body.clone())
                .with_model("gemma2-27b-it")
                .with_temperature(1.7)
                .with_max_tokens(100_000.0);
            normalizer.normalize(black_box(raw))
        })
    });
}

fn bench_local_tier(c: &mut Criterion) {
    let cache = LocalCache::new(1000);
    let keys: Vec<CacheKey> = (0..1000)
        .map(|i| CacheKeyBuilder::new().build("m", &[ChatMessage::user(format!("q{i}"))]))
        .collect();
    for key in &keys {
        cache.insert(
            key.as_str(),
            ChatResponse::assistant("m", "cached", 1),
            Duration::from_secs(3600),
        );
    }

    c.bench_function("local_tier_hit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % keys.len();
            cache.get(black_box(keys[i].as_str()))
        })
    });
}

criterion_group!(benches, bench_cache_key, bench_normalize, bench_local_tier);
criterion_main!(benches);
