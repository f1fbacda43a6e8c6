//! Per-process supervision scenarios, driven through the public API:
//! spawn/reap, restart policy and FATAL, graceful and forced stops,
//! health-driven restarts, and event ordering.

use std::sync::Arc;
use std::time::{Duration, Instant};

use procvisor::{
    Bus, BusTap, Event, EventKind, HealthCheckKind, Process, ProcessState, ProgramConfig,
};
use tokio_util::sync::CancellationToken;

fn program(name: &str, argv: &[&str]) -> ProgramConfig {
    let mut cfg = ProgramConfig::new(name, argv.iter().map(|s| s.to_string()).collect());
    cfg.startsecs = Duration::from_millis(200);
    cfg.stopwaitsecs = Duration::from_secs(5);
    cfg
}

async fn wait_for_state(proc: &Process, state: ProcessState, within: Duration) {
    let deadline = Instant::now() + within;
    loop {
        if proc.state() == state {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {state}, currently {}",
            proc.state()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn drain_events(tap: &mut BusTap) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(ev) = tap.try_next() {
        events.push(ev);
    }
    events
}

fn state_kinds(events: &[Event], process: &str) -> Vec<EventKind> {
    events
        .iter()
        .filter(|e| e.process.as_deref() == Some(process))
        .filter(|e| {
            !matches!(
                e.kind,
                EventKind::HealthcheckPassed | EventKind::HealthcheckFailed
            )
        })
        .map(|e| e.kind)
        .collect()
}

#[tokio::test]
async fn happy_path_start_reaches_running_with_pid() {
    let bus = Bus::new(256);
    let proc = Process::new(program("web", &["/bin/sleep", "3600"]), bus.clone());
    let token = CancellationToken::new();
    tokio::spawn(Arc::clone(&proc).run(token.clone()));

    proc.start().await.expect("start should converge");

    let status = proc.status();
    assert_eq!(status.state, ProcessState::Running);
    assert!(status.pid.is_some(), "RUNNING implies a live child");
    assert!(status.uptime.is_some(), "RUNNING implies started_at is set");

    proc.stop().await.unwrap();
    let status = proc.status();
    assert_eq!(status.state, ProcessState::Stopped);
    assert!(status.pid.is_none(), "terminal state implies no child");
    token.cancel();
}

#[tokio::test]
async fn quick_exit_exhausts_retries_and_goes_fatal() {
    let bus = Bus::new(256);
    let mut cfg = program("crasher", &["/bin/false"]);
    cfg.startsecs = Duration::from_secs(1);
    cfg.startretries = 3;
    cfg.autorestart = true;
    let mut rx = bus.tap();

    let proc = Process::new(cfg, bus.clone());
    let token = CancellationToken::new();
    tokio::spawn(Arc::clone(&proc).run(token.clone()));

    wait_for_state(&proc, ProcessState::Fatal, Duration::from_secs(15)).await;

    let events = drain_events(&mut rx);
    let kinds = state_kinds(&events, "crasher");
    assert_eq!(kinds.last(), Some(&EventKind::ProcessFatal));
    let backoffs = kinds
        .iter()
        .filter(|k| **k == EventKind::ProcessBackoff)
        .count();
    assert_eq!(backoffs, 3, "one BACKOFF per consumed retry: {kinds:?}");

    // FATAL is sticky: nothing but an explicit start leaves it.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(proc.state(), ProcessState::Fatal);

    // An explicit start resets the budget and tries again.
    let _ = proc.start().await;
    let saw_starting = drain_events(&mut rx)
        .iter()
        .any(|e| e.kind == EventKind::ProcessStarting);
    assert!(saw_starting, "explicit start from FATAL must attempt a spawn");
    token.cancel();
}

#[tokio::test]
async fn missing_executable_is_fatal_without_spawning() {
    let bus = Bus::new(256);
    let mut cfg = program("ghost", &["/nonexistent/definitely-missing"]);
    cfg.startretries = 2;
    let proc = Process::new(cfg, bus.clone());
    let token = CancellationToken::new();
    tokio::spawn(Arc::clone(&proc).run(token.clone()));

    wait_for_state(&proc, ProcessState::Fatal, Duration::from_secs(10)).await;
    assert!(proc.status().pid.is_none());
    token.cancel();
}

#[tokio::test]
async fn graceful_stop_reaps_child_and_orders_events() {
    let bus = Bus::new(256);
    let mut rx = bus.tap();
    let proc = Process::new(program("sleeper", &["/bin/sleep", "3600"]), bus.clone());
    let token = CancellationToken::new();
    tokio::spawn(Arc::clone(&proc).run(token.clone()));

    proc.start().await.unwrap();
    let pid = proc.status().pid.expect("running child has a pid");

    let began = Instant::now();
    proc.stop().await.unwrap();
    assert!(
        began.elapsed() < Duration::from_secs(2),
        "TERM should stop sleep well before stopwaitsecs"
    );
    assert_eq!(proc.state(), ProcessState::Stopped);

    // The whole process group must be gone.
    let gone = matches!(
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None),
        Err(nix::errno::Errno::ESRCH)
    );
    assert!(gone, "no process from the stopped group may remain");

    // Event order equals transition order.
    let kinds = state_kinds(&drain_events(&mut rx), "sleeper");
    let running = kinds.iter().position(|k| *k == EventKind::ProcessRunning);
    let stopping = kinds.iter().position(|k| *k == EventKind::ProcessStopping);
    let stopped = kinds.iter().rposition(|k| *k == EventKind::ProcessStopped);
    assert!(
        running.is_some() && stopping.is_some() && stopped.is_some(),
        "missing transitions: {kinds:?}"
    );
    assert!(running < stopping && stopping < stopped, "order was {kinds:?}");
    token.cancel();
}

#[tokio::test]
async fn trap_ignoring_child_is_killed_after_stopwaitsecs() {
    let bus = Bus::new(256);
    let mut cfg = program("stubborn", &["/bin/sh", "-c", r#"trap "" TERM; sleep 3600"#]);
    cfg.stopwaitsecs = Duration::from_millis(500);
    let proc = Process::new(cfg, bus.clone());
    let token = CancellationToken::new();
    tokio::spawn(Arc::clone(&proc).run(token.clone()));

    proc.start().await.unwrap();

    let began = Instant::now();
    proc.stop().await.unwrap();
    let took = began.elapsed();

    assert_eq!(proc.state(), ProcessState::Stopped);
    assert!(
        took >= Duration::from_millis(400),
        "escalation must wait out stopwaitsecs, took {took:?}"
    );
    assert!(
        took < Duration::from_secs(10),
        "SIGKILL must reap a trap-ignoring child, took {took:?}"
    );
    token.cancel();
}

#[tokio::test]
async fn restart_yields_a_new_pid() {
    let bus = Bus::new(256);
    let proc = Process::new(program("cycler", &["/bin/sleep", "3600"]), bus.clone());
    let token = CancellationToken::new();
    tokio::spawn(Arc::clone(&proc).run(token.clone()));

    proc.start().await.unwrap();
    let first = proc.status().pid.unwrap();

    // stop; start — back to RUNNING with a fresh child.
    proc.stop().await.unwrap();
    proc.start().await.unwrap();
    let second = proc.status().pid.unwrap();
    assert_ne!(first, second);

    // restart is the same observable round trip.
    proc.restart(false).await.unwrap();
    let third = proc.status().pid.unwrap();
    assert_ne!(second, third);

    // force restart uses SIGKILL semantics but converges the same way.
    proc.restart(true).await.unwrap();
    let fourth = proc.status().pid.unwrap();
    assert_ne!(third, fourth);
    assert_eq!(proc.state(), ProcessState::Running);

    proc.stop().await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn clean_exit_restarts_without_consuming_retries() {
    let bus = Bus::new(256);
    let mut rx = bus.tap();
    // Exits 0 after outliving startsecs; autorestart brings it back.
    let mut cfg = program("oneshot", &["/bin/sh", "-c", "sleep 0.4"]);
    cfg.startsecs = Duration::from_millis(100);
    cfg.autorestart = true;
    let proc = Process::new(cfg, bus.clone());
    let token = CancellationToken::new();
    tokio::spawn(Arc::clone(&proc).run(token.clone()));

    proc.start().await.unwrap();
    let first = proc.status().pid.unwrap();

    // Wait for the exit → backoff(0) → new RUNNING cycle.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = proc.status();
        if status.state == ProcessState::Running && status.pid != Some(first) {
            break;
        }
        assert!(Instant::now() < deadline, "no restart observed");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let kinds = state_kinds(&drain_events(&mut rx), "oneshot");
    assert!(kinds.contains(&EventKind::ProcessExited), "order was {kinds:?}");
    assert!(!kinds.contains(&EventKind::ProcessFatal), "order was {kinds:?}");

    proc.stop().await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn exit_with_autorestart_off_parks_in_stopped() {
    let bus = Bus::new(256);
    let mut cfg = program("once", &["/bin/sh", "-c", "sleep 0.3"]);
    cfg.startsecs = Duration::from_millis(100);
    cfg.autorestart = false;
    let proc = Process::new(cfg, bus.clone());
    let token = CancellationToken::new();
    tokio::spawn(Arc::clone(&proc).run(token.clone()));

    proc.start().await.unwrap();
    wait_for_state(&proc, ProcessState::Stopped, Duration::from_secs(5)).await;
    assert!(proc.status().pid.is_none());
    token.cancel();
}

#[tokio::test]
async fn failing_probe_restarts_the_child() {
    let bus = Bus::new(512);
    let mut rx = bus.tap();
    let mut cfg = program("probed", &["/bin/sleep", "3600"]);
    cfg.startsecs = Duration::from_millis(50);
    cfg.autorestart = true;
    cfg.healthcheck.kind = HealthCheckKind::Script;
    cfg.healthcheck.command = Some("false".to_string());
    cfg.healthcheck.start_period = Duration::from_millis(50);
    cfg.healthcheck.interval = Duration::from_millis(50);
    cfg.healthcheck.timeout = Duration::from_secs(2);
    cfg.healthcheck.retries = 2;

    let proc = Process::new(cfg, bus.clone());
    let token = CancellationToken::new();
    tokio::spawn(Arc::clone(&proc).run(token.clone()));

    proc.start().await.unwrap();
    let first = proc.status().pid.unwrap();

    // Consecutive failures force UNHEALTHY, then a full restart cycle.
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let status = proc.status();
        if status.state == ProcessState::Running && status.pid.is_some() && status.pid != Some(first)
        {
            break;
        }
        assert!(Instant::now() < deadline, "no health-driven restart observed");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let events = drain_events(&mut rx);
    let failures = events
        .iter()
        .filter(|e| e.kind == EventKind::HealthcheckFailed)
        .count();
    assert!(failures >= 2, "expected repeated HEALTHCHECK_FAILED events");

    let kinds = state_kinds(&events, "probed");
    let unhealthy = kinds.iter().position(|k| *k == EventKind::ProcessUnhealthy);
    let stopping = kinds.iter().position(|k| *k == EventKind::ProcessStopping);
    let exited = kinds.iter().position(|k| *k == EventKind::ProcessExited);
    assert!(
        unhealthy.is_some() && unhealthy < stopping && stopping < exited,
        "restart sequence out of order: {kinds:?}"
    );

    proc.stop().await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn unhealthy_without_autorestart_stays_put() {
    let bus = Bus::new(256);
    let mut cfg = program("limping", &["/bin/sleep", "3600"]);
    cfg.startsecs = Duration::from_millis(50);
    cfg.autorestart = false;
    cfg.healthcheck.kind = HealthCheckKind::Script;
    cfg.healthcheck.command = Some("false".to_string());
    cfg.healthcheck.start_period = Duration::from_millis(50);
    cfg.healthcheck.interval = Duration::from_millis(50);
    cfg.healthcheck.timeout = Duration::from_secs(2);
    cfg.healthcheck.retries = 2;

    let proc = Process::new(cfg, bus.clone());
    let token = CancellationToken::new();
    tokio::spawn(Arc::clone(&proc).run(token.clone()));

    proc.start().await.unwrap();
    let pid = proc.status().pid.unwrap();

    wait_for_state(&proc, ProcessState::Unhealthy, Duration::from_secs(10)).await;
    let status = proc.status();
    assert_eq!(status.pid, Some(pid), "no restart without autorestart");
    assert_eq!(status.healthy, Some(false));

    proc.stop().await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn passing_probe_marks_health_ok() {
    let bus = Bus::new(256);
    let mut cfg = program("healthy", &["/bin/sleep", "3600"]);
    cfg.startsecs = Duration::from_millis(50);
    cfg.healthcheck.kind = HealthCheckKind::Script;
    cfg.healthcheck.command = Some("true".to_string());
    cfg.healthcheck.start_period = Duration::from_millis(50);
    cfg.healthcheck.interval = Duration::from_millis(50);
    cfg.healthcheck.timeout = Duration::from_secs(2);

    let proc = Process::new(cfg, bus.clone());
    let token = CancellationToken::new();
    tokio::spawn(Arc::clone(&proc).run(token.clone()));

    proc.start().await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if proc.status().healthy == Some(true) {
            break;
        }
        assert!(Instant::now() < deadline, "no passing probe observed");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(proc.state(), ProcessState::Running);

    proc.stop().await.unwrap();
    assert_eq!(proc.status().healthy, None, "health resets with the child");
    token.cancel();
}

#[tokio::test]
async fn stop_is_idempotent_and_start_is_idempotent() {
    let bus = Bus::new(256);
    let proc = Process::new(program("idem", &["/bin/sleep", "3600"]), bus.clone());
    let token = CancellationToken::new();
    tokio::spawn(Arc::clone(&proc).run(token.clone()));

    proc.start().await.unwrap();
    let pid = proc.status().pid;
    proc.start().await.unwrap();
    assert_eq!(proc.status().pid, pid, "start on RUNNING must not recycle");

    proc.stop().await.unwrap();
    proc.stop().await.unwrap();
    assert_eq!(proc.state(), ProcessState::Stopped);
    token.cancel();
}
