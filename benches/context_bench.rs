//! Benchmarks for the application context

use application_context::component::Component;
use application_context::event::payload_listener;
use application_context::{
    ApplicationContext, BeanDefinitionBuilder, BeanDefinitionRegistry, BeanFactory, BeanScope, Result,
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[allow(dead_code)]
struct SmallService {
    value: i32,
}

#[allow(dead_code)]
struct Repository {
    url: String,
}

impl Component for Repository {
    type Dependencies = ();

    fn create(_: ()) -> Result<Self> {
        Ok(Repository { url: "postgres://localhost".into() })
    }
}

#[allow(dead_code)]
struct UserService {
    repository: Arc<Repository>,
}

impl Component for UserService {
    type Dependencies = Arc<Repository>;

    fn create(repository: Arc<Repository>) -> Result<Self> {
        Ok(UserService { repository })
    }
}

struct Tick(u64);

fn small_definition(value: i32) -> application_context::BeanDefinition {
    BeanDefinitionBuilder::<SmallService>::new()
        .supplier(move |_| Ok(SmallService { value }))
        .build()
}

fn refreshed_context() -> ApplicationContext {
    let context = ApplicationContext::new();
    context.register::<Repository>().ok();
    context.register::<UserService>().ok();
    context.register_bean_definition("small", small_definition(42)).ok();
    context
        .register_bean_definition(
            "prototype",
            BeanDefinitionBuilder::<SmallService>::new()
                .scope(BeanScope::Prototype)
                .supplier(|_| Ok(SmallService { value: 1 }))
                .build(),
        )
        .ok();
    context.refresh().ok();
    context
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    group.bench_function("definition", |b| {
        b.iter(|| {
            let factory = BeanFactory::new();
            factory.register_bean_definition("small", small_definition(42)).ok();
            black_box(factory)
        })
    });

    group.bench_function("component", |b| {
        b.iter(|| {
            let context = ApplicationContext::new();
            context.register::<Repository>().ok();
            black_box(context)
        })
    });

    for count in [10, 100] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("definitions", count), &count, |b, &count| {
            b.iter(|| {
                let factory = BeanFactory::new();
                for i in 0..count {
                    factory
                        .register_bean_definition(&format!("bean{}", i), small_definition(i as i32))
                        .ok();
                }
                black_box(factory)
            })
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    let context = refreshed_context();

    group.bench_function("singleton_by_name", |b| {
        b.iter(|| black_box(context.get_bean::<SmallService>("small")))
    });

    group.bench_function("singleton_by_type", |b| {
        b.iter(|| black_box(context.get_bean_by_type::<UserService>()))
    });

    group.bench_function("prototype", |b| {
        b.iter(|| black_box(context.get_bean::<SmallService>("prototype")))
    });

    group.bench_function("missing", |b| {
        b.iter(|| black_box(context.get_bean::<SmallService>("missing")))
    });

    group.bench_function("contains_bean", |b| b.iter(|| black_box(context.contains_bean("small"))));

    group.finish();
}

fn bench_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("refresh");

    group.bench_function("refresh_close", |b| {
        b.iter(|| {
            let context = refreshed_context();
            context.close();
            black_box(context)
        })
    });

    for count in [10, 100] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("eager_singletons", count), &count, |b, &count| {
            b.iter(|| {
                let context = ApplicationContext::new();
                for i in 0..count {
                    context
                        .register_bean_definition(&format!("bean{}", i), small_definition(i as i32))
                        .ok();
                }
                context.refresh().ok();
                context.close();
                black_box(context)
            })
        });
    }

    group.finish();
}

fn bench_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("events");
    let context = refreshed_context();
    let received = Arc::new(AtomicU64::new(0));
    for _ in 0..4 {
        let received = Arc::clone(&received);
        context.add_application_listener(payload_listener(move |tick: &Tick| {
            received.fetch_add(tick.0, Ordering::Relaxed);
            Ok(())
        }));
    }

    group.throughput(Throughput::Elements(1));
    group.bench_function("publish_payload", |b| b.iter(|| black_box(context.publish(Tick(1)))));

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");
    let context = refreshed_context();

    for threads in [2, 4] {
        group.bench_with_input(BenchmarkId::new("lookup", threads), &threads, |b, &threads| {
            b.iter(|| {
                std::thread::scope(|s| {
                    for _ in 0..threads {
                        s.spawn(|| {
                            for _ in 0..100 {
                                black_box(context.get_bean_by_type::<UserService>().ok());
                            }
                        });
                    }
                })
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_registration,
    bench_lookup,
    bench_refresh,
    bench_events,
    bench_concurrent
);
criterion_main!(benches);
