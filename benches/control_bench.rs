// Benchmarks for the PID step and frame fan-out
// Run with: cargo bench

use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use pi_heater::frame::Frame;
use pi_heater::frame_bus::FrameBus;
use pi_heater::hub::{BroadcastHub, Subscriber};
use pi_heater::pid::PidController;
use std::hint::black_box;
use std::time::Duration;

fn frame() -> Frame {
    Frame {
        temperature: 148.25,
        target: 150.0,
        window_start: Utc::now(),
        window_duration_ms: 1000,
        fire_time_ms: 385,
    }
}

fn bench_pid_updates(c: &mut Criterion) {
    c.bench_function("pid 10k updates", |b| {
        b.iter(|| {
            let mut pid = PidController::new(40.0, 0.5, 2.0)
                .with_output_limits(0.0, 985.0)
                .unwrap();
            pid.set_target(150.0);
            let mut total = 0.0;
            for i in 0..10_000 {
                let measurement = 70.0 + (i % 100) as f64;
                total += pid.update_elapsed(black_box(measurement), Duration::from_secs(1));
            }
            total
        });
    });
}

fn bench_frame_serialize(c: &mut Criterion) {
    let frame = frame();
    c.bench_function("serialize frame", |b| {
        b.iter(|| black_box(&frame).to_json().unwrap());
    });
}

fn bench_hub_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bus = FrameBus::new();
    let (hub, mut queues) = rt.block_on(async {
        let hub = BroadcastHub::new(bus.subscribe()).spawn();
        let mut queues = Vec::new();
        for _ in 0..64 {
            let (subscriber, queue) = Subscriber::new(256);
            hub.register(subscriber).await.unwrap();
            queues.push(queue);
        }
        (hub, queues)
    });
    c.bench_function("broadcast frame to 64 subscribers", |b| {
        b.iter(|| {
            rt.block_on(async {
                bus.publish(frame());
                for queue in queues.iter_mut() {
                    queue.recv().await.unwrap();
                }
            });
        });
    });
    rt.block_on(hub.stop());
}

criterion_group!(benches, bench_pid_updates, bench_frame_serialize, bench_hub_fanout);
criterion_main!(benches);
