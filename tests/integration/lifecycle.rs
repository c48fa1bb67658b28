// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Router lifecycle, graceful shutdown, handles and backpressure

use crate::common::{self, eventually, harness, lines, Harness, Latch, MODES, TS};
use eventline::{
    Appender, AppenderError, Backpressure, Config, Destination, DestinationError,
    DestinationRef, FallbackConfig, MemoryAppender, NoopMonitor, Payload, ProducerMode, Router,
    RouterConfig, RouterError, RouterMode, RouterState, Severity, Template, Value, WaitConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_lifecycle_errors() {
    for mode in MODES {
        let registry = common::line_registry();
        registry.register(Destination::new("main")).unwrap();
        let router = Router::new(common::config(mode), registry, Arc::new(NoopMonitor)).unwrap();

        assert_eq!(router.state(), RouterState::Uninitialized);
        assert!(matches!(
            router.send(Severity::Info, TS, "s", "x", &[]),
            Err(RouterError::NotRunning)
        ));
        assert!(matches!(router.get(), Err(RouterError::NotRunning)));

        router.init().unwrap();
        assert_eq!(router.state(), RouterState::Running);
        assert!(matches!(router.init(), Err(RouterError::InvalidState(_))));
        assert!(matches!(
            router.send_to(9, Severity::Info, TS, "s", "x", &[]),
            Err(RouterError::DestinationNotFound(DestinationRef::Index(9)))
        ));
        assert!(matches!(
            router.send_named("nope", Severity::Info, TS, "s", "x", &[]),
            Err(RouterError::DestinationNotFound(DestinationRef::Name(_)))
        ));

        router.destroy();
        router.destroy();
        assert_eq!(router.state(), RouterState::Stopped);
        assert!(matches!(
            router.send(Severity::Info, TS, "s", "x", &[]),
            Err(RouterError::RouterClosed)
        ));
        assert!(matches!(router.get(), Err(RouterError::RouterClosed)));
        assert!(matches!(router.init(), Err(RouterError::InvalidState(_))));
        assert!(matches!(
            router.register_destination(Destination::new("late")),
            Err(RouterError::RouterClosed)
        ));
    }
}

#[test]
fn test_init_requires_default_destination() {
    for mode in MODES {
        let router = Router::new(
            common::config(mode),
            common::line_registry(),
            Arc::new(NoopMonitor),
        )
        .unwrap();
        assert!(matches!(
            router.init(),
            Err(RouterError::DestinationNotFound(DestinationRef::Index(0)))
        ));
        assert_eq!(router.state(), RouterState::Uninitialized);
    }
}

#[test]
fn test_invalid_config_is_rejected_before_start() {
    let config = RouterConfig {
        capacity: 100,
        ..common::config(RouterMode::Async)
    };
    let result = Router::new(config, common::line_registry(), Arc::new(NoopMonitor));
    assert!(matches!(result, Err(RouterError::Config(_))));
}

/// Records start/stop calls in a shared log; optionally refuses to start
struct Tracked {
    name: &'static str,
    fail_start: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl Appender for Tracked {
    fn name(&self) -> &str {
        self.name
    }

    fn start(&mut self) -> Result<(), AppenderError> {
        if self.fail_start {
            return Err(AppenderError::Rejected("no".into()));
        }
        self.log.lock().unwrap().push(format!("start {}", self.name));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AppenderError> {
        self.log.lock().unwrap().push(format!("stop {}", self.name));
        Ok(())
    }

    fn write(&mut self, _bytes: &[u8]) -> Result<(), AppenderError> {
        Ok(())
    }
}

#[test]
fn test_init_rolls_back_when_a_destination_fails_to_start() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let tracked = |name, fail_start| {
        Box::new(Tracked {
            name,
            fail_start,
            log: Arc::clone(&log),
        })
    };

    let registry = common::line_registry();
    registry
        .register(Destination::new("main").with_appender(tracked("a", false)))
        .unwrap();
    registry
        .register(
            Destination::new("second")
                .with_appender(tracked("b", false))
                .with_appender(tracked("c", true)),
        )
        .unwrap();

    let router = Router::new(
        common::config(RouterMode::Async),
        registry,
        Arc::new(NoopMonitor),
    )
    .unwrap();
    match router.init() {
        Err(RouterError::Destination(DestinationError::Start {
            destination,
            appender,
            ..
        })) => {
            assert_eq!(destination, "second");
            assert_eq!(appender, "c");
        }
        other => panic!("unexpected init result {:?}", other),
    }
    assert_eq!(router.state(), RouterState::Uninitialized);
    assert_eq!(
        *log.lock().unwrap(),
        ["start a", "start b", "stop b", "stop a"]
    );
}

#[test]
fn test_destroy_drains_every_published_event() {
    let Harness { router, output, .. } = harness(common::config(RouterMode::Async));

    for i in 0..1000u32 {
        router
            .send(Severity::Info, TS, "drain", "event {0}", &[i.into()])
            .unwrap();
    }
    router.destroy();

    let received = lines(&output);
    assert_eq!(received.len(), 1000);
    assert_eq!(received[0], "event 0");
    assert_eq!(received[999], "event 999");
    assert_eq!(router.in_flight(), 0);
}

#[test]
fn test_every_wait_strategy_delivers_and_shuts_down() {
    let strategies = [
        WaitConfig::Blocking,
        WaitConfig::BusySpin,
        WaitConfig::Yielding,
        WaitConfig::Sleeping { sleep_us: 50 },
        WaitConfig::PhasedBackoff {
            spin_timeout_us: 10,
            yield_timeout_us: 10,
            fallback: FallbackConfig::Block,
        },
        WaitConfig::PhasedBackoff {
            spin_timeout_us: 10,
            yield_timeout_us: 10,
            fallback: FallbackConfig::Sleep { sleep_us: 50 },
        },
        WaitConfig::TimeoutBlocking { timeout_us: 1000 },
    ];

    for wait in strategies {
        let config = RouterConfig {
            capacity: 8,
            wait,
            ..common::config(RouterMode::Async)
        };
        let Harness { router, output, .. } = harness(config);

        for i in 0..200u32 {
            router.send(Severity::Info, TS, "w", "{0}", &[i.into()]).unwrap();
        }
        // Let the consumer go idle so it parks or times out at least once
        thread::sleep(Duration::from_millis(20));
        router.send(Severity::Info, TS, "w", "last", &[]).unwrap();
        router.destroy();

        let received = lines(&output);
        assert_eq!(received.len(), 201, "{:?}", wait);
        assert_eq!(received.last().map(String::as_str), Some("last"));
    }
}

#[test]
fn test_two_outstanding_handles_at_capacity_two() {
    for (mode, producer) in [
        (RouterMode::Async, ProducerMode::Single),
        (RouterMode::Async, ProducerMode::Multi),
        (RouterMode::Sync, ProducerMode::Single),
        (RouterMode::Sync, ProducerMode::Multi),
    ] {
        let registry = common::line_registry();
        let latch = Latch::default();
        registry
            .register(Destination::new("main").with_appender(Box::new(latch.appender())))
            .unwrap();

        let config = RouterConfig {
            capacity: 2,
            wait: WaitConfig::Blocking,
            ..common::multi_producer_config(mode, producer)
        };
        let router = Arc::new(Router::new(config, registry, Arc::new(NoopMonitor)).unwrap());
        router.init().unwrap();

        // A publisher stuck behind the earlier handle would never report back
        let (tx, rx) = mpsc::channel();
        let publisher = {
            let router = Arc::clone(&router);
            thread::spawn(move || {
                let mut first = router.get().unwrap();
                let mut second = router.get().unwrap();
                second.set_event(Severity::Info, TS, "h", Template::Text("second"), &[]);
                first.set_event(Severity::Info, TS, "h", Template::Text("first {0}"), &[Value::U64(1)]);
                if mode == RouterMode::Async {
                    assert_eq!(first.sequence(), Some(0));
                    assert_eq!(second.sequence(), Some(1));
                }
                router.publish(second).unwrap();
                router.publish(first).unwrap();
                tx.send(()).unwrap();
            })
        };
        assert!(
            rx.recv_timeout(Duration::from_secs(10)).is_ok(),
            "{:?}/{:?} publishing out of order did not return",
            mode,
            producer
        );
        publisher.join().unwrap();

        for i in 0..100u32 {
            router.send(Severity::Info, TS, "h", "{0}", &[i.into()]).unwrap();
        }
        assert!(
            latch.wait_for(102, Duration::from_secs(10)),
            "{:?}/{:?} did not deliver in time",
            mode,
            producer
        );
        router.destroy();
    }
}

#[test]
fn test_handles_dropped_out_of_order_single_producer() {
    let Harness { router, output, .. } =
        harness(common::multi_producer_config(RouterMode::Async, ProducerMode::Single));

    let first = router.get().unwrap();
    let mut second = router.get().unwrap();
    second.set_event(Severity::Info, TS, "h", Template::Text("kept"), &[]);
    router.publish(second).unwrap();
    drop(first);

    router.send(Severity::Info, TS, "h", "after", &[]).unwrap();
    router.flush(0).unwrap();
    assert_eq!(lines(&output), ["kept", "after"]);
}

#[test]
fn test_dropped_handle_publishes_nothing() {
    for mode in MODES {
        let Harness {
            router,
            output,
            monitor,
        } = harness(common::config(mode));

        {
            let mut handle = router.get().unwrap();
            handle.set_event(Severity::Info, TS, "x", Template::Text("never"), &[]);
            assert_eq!(handle.payload(), Payload::Args);
        }
        router.send(Severity::Info, TS, "x", "after", &[]).unwrap();
        router.flush(0).unwrap();

        assert_eq!(lines(&output), ["after"], "mode {:?}", mode);
        assert!(monitor.is_empty());
    }
}

#[test]
fn test_destroy_waits_for_outstanding_handle() {
    for mode in MODES {
        let Harness { router, output, .. } = harness(common::config(mode));
        let (ready_tx, ready_rx) = mpsc::channel();
        let published = AtomicBool::new(false);

        thread::scope(|scope| {
            let router = &router;
            let published = &published;
            scope.spawn(move || {
                let mut handle = router.get().unwrap();
                ready_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(50));
                handle.set_rendered(Severity::Info, TS, "late", b"late\n");
                published.store(true, Ordering::SeqCst);
                handle.publish().unwrap();
            });

            ready_rx.recv().unwrap();
            router.destroy();
            assert!(published.load(Ordering::SeqCst));
        });

        assert_eq!(lines(&output), ["late"], "mode {:?}", mode);
    }
}

#[test]
fn test_drop_policy_when_destination_is_saturated() {
    let config = RouterConfig {
        backpressure: Backpressure::Drop,
        ..common::config(RouterMode::Async)
    };
    let registry = common::line_registry();
    let mem = MemoryAppender::new("mem");
    let output = mem.handle();
    registry
        .register(
            Destination::new("main")
                .with_capacity(1)
                .with_appender(Box::new(mem)),
        )
        .unwrap();
    let router = Router::new(config, registry, Arc::new(NoopMonitor)).unwrap();
    router.init().unwrap();

    let mut handle = router.get().unwrap();
    assert!(matches!(
        router.send(Severity::Info, TS, "d", "overflow", &[]),
        Err(RouterError::BufferOverflow)
    ));
    assert_eq!(router.dropped(), 1);

    handle.set_rendered(Severity::Info, TS, "d", b"held\n");
    handle.publish().unwrap();
    router.flush(0).unwrap();

    router.send(Severity::Info, TS, "d", "fits again", &[]).unwrap();
    router.destroy();
    assert_eq!(lines(&output), ["held", "fits again"]);
    assert_eq!(router.dropped(), 1);
}

#[test]
fn test_drop_policy_when_ring_is_full() {
    let config = RouterConfig {
        capacity: 2,
        backpressure: Backpressure::Drop,
        ..common::config(RouterMode::Async)
    };
    let Harness { router, output, .. } = harness(config);

    let first = router.get().unwrap();
    let second = router.get().unwrap();
    assert!(matches!(
        router.send(Severity::Info, TS, "d", "no room", &[]),
        Err(RouterError::BufferOverflow)
    ));
    assert_eq!(router.dropped(), 1);
    drop(first);
    drop(second);

    // Unpublished handles come back as empty slots
    assert!(eventually(Duration::from_secs(5), || router.in_flight() == 0));
    router.send(Severity::Info, TS, "d", "room again", &[]).unwrap();
    router.destroy();
    assert_eq!(lines(&output), ["room again"]);
}

#[test]
fn test_blocking_destination_bound_waits_for_consumer() {
    let registry = common::line_registry();
    let mem = MemoryAppender::new("mem");
    let output = mem.handle();
    registry
        .register(
            Destination::new("main")
                .with_capacity(2)
                .with_appender(Box::new(mem)),
        )
        .unwrap();
    let router = Router::new(
        common::config(RouterMode::Async),
        registry,
        Arc::new(NoopMonitor),
    )
    .unwrap();
    router.init().unwrap();

    for i in 0..300u32 {
        router.send(Severity::Info, TS, "b", "{0}", &[i.into()]).unwrap();
    }
    router.destroy();
    assert_eq!(lines(&output).len(), 300);
    assert_eq!(router.dropped(), 0);
}

#[test]
fn test_router_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("events.log");
    let path = dir.path().join("router.json5");
    std::fs::write(
        &path,
        format!(
            r#"{{
                // async with a sleeping consumer
                router: {{
                    mode: "async",
                    capacity: 32,
                    wait: {{ type: "sleeping", sleep_us: 20 }},
                    level: "debug",
                    layout: {{ prefix: false }},
                }},
                destinations: [
                    {{ name: "main", appenders: [{{ type: "file", path: {:?} }}] }},
                ],
                templates: ["job {{0}} finished in {{1}}ms"],
            }}"#,
            log.display().to_string()
        ),
    )
    .unwrap();

    let config = Config::load_from_file(&path).unwrap();
    let router = Router::from_config(&config, Arc::new(NoopMonitor)).unwrap();
    router.init().unwrap();

    let id = config.template_table().find("job {0} finished in {1}ms").unwrap();
    router
        .send(Severity::Debug, TS, "jobs", id, &[7u8.into(), 125u32.into()])
        .unwrap();
    router.send(Severity::Trace, TS, "jobs", "filtered", &[]).unwrap();
    router.destroy();

    assert_eq!(
        std::fs::read_to_string(&log).unwrap(),
        "[jobs] job 7 finished in 125ms\n"
    );
}
