// Demo of the eventline dispatch pipeline
//
// Run with: cargo run --example pipeline_demo

use eventline::{
    send_info, send_warning, timestamp_now, AppenderConfig, Config, ConsoleAppender, Destination,
    DestinationConfig, MemoryAppender, RecordingMonitor, Router, Severity, Value,
};
use std::sync::Arc;
use std::thread;

fn main() -> anyhow::Result<()> {
    println!("=== eventline pipeline demo ===\n");

    // The first destination is the default one (index 0)
    let mut config = Config::parse(
        r#"{
            router: { mode: "async", capacity: 256, level: "debug" },
            destinations: [
                { name: "console", appenders: [{ type: "console", stream: "stdout" }] },
            ],
            templates: ["worker {0} finished job {1} in {2}ms"],
        }"#,
    )?;
    config.validate()?;

    let monitor = Arc::new(RecordingMonitor::new());
    let router = Router::from_config(&config, monitor.clone())?;
    router.init()?;
    println!("1. Router running in {:?} mode\n", router.mode());

    println!("2. Macros and plain templates:");
    send_info!(router, "demo", "router started with {0} destination(s)", 1u8)?;
    send_warning!(router, "demo", "{0}% of the ring is {{reserved}}", 12.5f64)?;
    router.flush(0)?;

    println!("\n3. Registering a destination on the live router:");
    let memory = MemoryAppender::new("memory");
    let captured = memory.handle();
    let audit = router.register_destination(
        Destination::new("audit")
            .with_min_level(Severity::Notice)
            .with_appender(Box::new(memory))
            .with_appender(Box::new(ConsoleAppender::stderr())),
    )?;
    let addr = Value::from("10.0.0.1");
    router.send_to(audit, Severity::Notice, timestamp_now(), "auth", "login from {0}", &[addr])?;
    router.send_to(audit, Severity::Debug, timestamp_now(), "auth", "filtered out", &[])?;
    router.flush(audit)?;
    println!("   audit captured {} byte(s)", captured.len());

    println!("\n4. Several producers with a pre-registered template:");
    let finished = config
        .template_table()
        .find("worker {0} finished job {1} in {2}ms")
        .ok_or_else(|| anyhow::anyhow!("template missing"))?;
    thread::scope(|scope| {
        for worker in 0..3u32 {
            let router = &router;
            scope.spawn(move || {
                for job in 0..2u32 {
                    let args = [Value::from(worker), Value::from(job), Value::from(worker * 10 + job)];
                    let _ = router.send(Severity::Info, timestamp_now(), "pool", finished, &args);
                }
            });
        }
    });
    router.flush(0)?;

    println!("\n5. Filling an entry in place:");
    let mut handle = router.get()?;
    handle.set_rendered(Severity::Info, timestamp_now(), "raw", b"pre-rendered line, written as-is\n");
    handle.publish()?;

    // Adding a file destination from configuration
    let dir = std::env::temp_dir().join("eventline-demo");
    std::fs::create_dir_all(&dir)?;
    let mut file = DestinationConfig::new("file");
    file.appenders.push(AppenderConfig::File {
        name: None,
        path: dir.join("demo.log"),
    });
    config.destinations.push(file.clone());
    let file_index = router.register_destination_config(&file)?;
    router.send_to(file_index, Severity::Info, timestamp_now(), "demo", "to disk", &[])?;

    router.destroy();
    println!(
        "\n6. Router stopped; {} dropped, {} monitor report(s); file output in {}",
        router.dropped(),
        monitor.len(),
        dir.join("demo.log").display()
    );
    println!("\nFinal configuration:\n{}", config.to_json5());
    Ok(())
}
