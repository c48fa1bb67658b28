// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Delivery semantics shared by both router modes

use crate::common::{self, harness, lines, Harness, MODES, TS};
use eventline::{
    Destination, DestinationRegistry, EventWriter, Layout, MemoryAppender, MemoryHandle,
    NoopMonitor, ProducerMode, Router, RouterConfig, RouterMode, Severity, TemplateTable,
    TimestampFormat, Value,
};
use std::sync::Arc;
use std::thread;

#[test]
fn test_single_producer_order_is_preserved() {
    for mode in MODES {
        let Harness { router, output, .. } = harness(common::config(mode));

        for i in 0..500u32 {
            router
                .send(Severity::Info, TS, "seq", "n={0}", &[Value::from(i)])
                .unwrap();
        }
        router.flush(0).unwrap();

        let expected: Vec<String> = (0..500).map(|i| format!("n={}", i)).collect();
        assert_eq!(lines(&output), expected, "mode {:?}", mode);
    }
}

#[test]
fn test_template_property() {
    for mode in MODES {
        let Harness { router, output, .. } = harness(common::config(mode));
        router
            .send(Severity::Info, TS, "t", "this is a test {0}", &["test".into()])
            .unwrap();
        router.destroy();
        assert_eq!(output.to_string_lossy(), "this is a test test\n");
    }
}

/// Router writing the full layout (prefix, source, newline) into memory
fn full_layout_router(mode: RouterMode, templates: &Arc<TemplateTable>) -> (Router, MemoryHandle) {
    let layout = Layout {
        timestamp: TimestampFormat::Rfc3339,
        ..Layout::default()
    };
    let registry = Arc::new(DestinationRegistry::new(EventWriter::new(
        layout,
        Arc::clone(templates),
    )));
    let mem = MemoryAppender::new("mem");
    let output = mem.handle();
    registry
        .register(Destination::new("main").with_appender(Box::new(mem)))
        .unwrap();

    let router = Router::new(common::config(mode), registry, Arc::new(NoopMonitor)).unwrap();
    router.init().unwrap();
    (router, output)
}

fn publish_mixed(router: &Router, templates: &TemplateTable) {
    let login = templates.find("user {0} logged in from {1}").unwrap();
    for i in 0..20i64 {
        router
            .send(
                Severity::Notice,
                TS + i,
                "auth",
                login,
                &[Value::from("alice"), Value::from("10.0.0.1")],
            )
            .unwrap();
        router
            .send(
                Severity::Warning,
                TS + i,
                "disk",
                "{0}% used on {1} ({2}), {{quota}} {3}",
                &[i.into(), "/var".into(), true.into(), 2.5f64.into()],
            )
            .unwrap();

        let mut handle = router.get().unwrap();
        handle.set_rendered(Severity::Info, TS + i, "raw", b"pre-rendered line\n");
        router.publish(handle).unwrap();

        let mut handle = router.get().unwrap();
        handle.set_level(Severity::Error);
        handle.set_timestamp(TS + i);
        handle.set_source("buf");
        handle.rendered_mut().push_str("filled in place\n");
        handle.publish().unwrap();
    }
}

#[test]
fn test_sync_and_async_render_identical_bytes() {
    let templates = Arc::new(TemplateTable::from_templates([
        "user {0} logged in from {1}",
    ]));

    let (sync_router, sync_output) = full_layout_router(RouterMode::Sync, &templates);
    let (async_router, async_output) = full_layout_router(RouterMode::Async, &templates);

    publish_mixed(&sync_router, &templates);
    publish_mixed(&async_router, &templates);
    async_router.flush(0).unwrap();

    let sync_bytes = sync_output.contents();
    assert!(!sync_bytes.is_empty());
    assert_eq!(sync_bytes, async_output.contents());

    let text = sync_output.to_string_lossy();
    let first = text.lines().next().unwrap();
    assert!(first.starts_with("NOTICE    2023-11-14T22:13:20.000000000Z [auth] "));
    assert!(first.ends_with("user alice logged in from 10.0.0.1"));
    assert!(text.contains("0% used on /var (true), {quota} 2.5"));
}

#[test]
fn test_severity_filtering() {
    for mode in MODES {
        let registry = common::line_registry();
        let main = MemoryAppender::new("main");
        let main_out = main.handle();
        let audit = MemoryAppender::new("audit");
        let audit_out = audit.handle();
        registry
            .register(Destination::new("main").with_appender(Box::new(main)))
            .unwrap();
        let audit_index = registry
            .register(
                Destination::new("audit")
                    .with_min_level(Severity::Warning)
                    .with_appender(Box::new(audit)),
            )
            .unwrap();

        let config = RouterConfig {
            level: Severity::Info,
            ..common::config(mode)
        };
        let router = Router::new(config, registry, Arc::new(NoopMonitor)).unwrap();
        router.init().unwrap();

        router.send(Severity::Debug, TS, "s", "dropped", &[]).unwrap();
        router.send(Severity::Info, TS, "s", "kept", &[]).unwrap();
        router
            .send_to(audit_index, Severity::Notice, TS, "s", "below", &[])
            .unwrap();
        router
            .send_named("audit", Severity::Critical, TS, "s", "above", &[])
            .unwrap();

        router.set_level(Severity::Trace);
        router.send(Severity::Debug, TS, "s", "now visible", &[]).unwrap();

        // Filtered handles are discarded at publish
        let mut handle = router.get().unwrap();
        handle.set_rendered(Severity::Trace, TS, "s", b"trace\n");
        router.set_level(Severity::Error);
        handle.publish().unwrap();

        router.destroy();
        assert_eq!(lines(&main_out), ["kept", "now visible"], "mode {:?}", mode);
        assert_eq!(lines(&audit_out), ["above"], "mode {:?}", mode);
    }
}

#[test]
fn test_multi_producer_total_count() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 2_000;

    for (mode, producer) in [
        (RouterMode::Async, ProducerMode::Multi),
        (RouterMode::Async, ProducerMode::Single),
        (RouterMode::Sync, ProducerMode::Multi),
    ] {
        let Harness { router, output, .. } =
            harness(common::multi_producer_config(mode, producer));

        thread::scope(|scope| {
            for p in 0..PRODUCERS {
                let router = &router;
                scope.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        router
                            .send(Severity::Info, TS, "mp", "{0}:{1}", &[p.into(), i.into()])
                            .unwrap();
                    }
                });
            }
        });
        router.destroy();

        let received = lines(&output);
        assert_eq!(received.len(), PRODUCERS * PER_PRODUCER, "{:?}/{:?}", mode, producer);

        // Per-producer order survives interleaving
        for p in 0..PRODUCERS {
            let prefix = format!("{}:", p);
            let mine: Vec<usize> = received
                .iter()
                .filter_map(|line| line.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(mine, (0..PER_PRODUCER).collect::<Vec<_>>());
        }
    }
}

#[test]
fn test_several_consumers_split_destinations() {
    let registry = common::line_registry();
    let mut outputs = Vec::new();
    for name in ["d0", "d1", "d2", "d3"] {
        let mem = MemoryAppender::new(name);
        outputs.push(mem.handle());
        registry
            .register(Destination::new(name).with_appender(Box::new(mem)))
            .unwrap();
    }

    let config = RouterConfig {
        consumers: 2,
        ..common::config(RouterMode::Async)
    };
    let router = Router::new(config, registry, Arc::new(NoopMonitor)).unwrap();
    router.init().unwrap();

    for i in 0..400usize {
        router
            .send_to(i % 4, Severity::Info, TS, "c", "{0}", &[i.into()])
            .unwrap();
    }
    router.destroy();

    for (d, output) in outputs.iter().enumerate() {
        let expected: Vec<String> = (0..400).filter(|i| i % 4 == d).map(|i| i.to_string()).collect();
        assert_eq!(lines(output), expected);
    }
}

#[test]
fn test_flush_returns_captured_bytes() {
    for mode in MODES {
        let registry = common::line_registry();
        registry
            .register(Destination::new("main").with_capture(true))
            .unwrap();
        let router = Router::new(common::config(mode), registry, Arc::new(NoopMonitor)).unwrap();
        router.init().unwrap();

        router.send(Severity::Info, TS, "c", "one", &[]).unwrap();
        router.send(Severity::Info, TS, "c", "two {0}", &[2u8.into()]).unwrap();
        assert_eq!(router.flush(0).unwrap(), b"one\ntwo 2\n");
        assert!(router.flush(0).unwrap().is_empty());
    }
}

#[test]
fn test_flush_without_capture_drains_but_returns_nothing() {
    for mode in MODES {
        let Harness { router, output, .. } = harness(common::config(mode));

        router.send(Severity::Info, TS, "c", "delivered", &[]).unwrap();
        assert!(router.flush(0).unwrap().is_empty(), "mode {:?}", mode);
        assert_eq!(lines(&output), ["delivered"], "mode {:?}", mode);
    }
}
