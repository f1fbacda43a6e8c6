//! Control-plane tests against a full daemon: socket permissions,
//! command dispatch, protocol error codes, and group fan-out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use procvisor::rpc::frame;
use procvisor::{config, Controller, RuntimeError, Supervisor};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;

struct Daemon {
    supervisor: Arc<Supervisor>,
    handle: JoinHandle<Result<(), RuntimeError>>,
    socket: PathBuf,
    _dir: TempDir,
}

impl Daemon {
    async fn start(programs: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("ctl.sock");
        let conf_path = dir.path().join("procvisor.conf");
        let conf = format!(
            "[procvisor]\nsocket = {}\npidfile = {}\nshutdown_timeout = 10\n\n{}",
            socket.display(),
            dir.path().join("daemon.pid").display(),
            programs,
        );
        std::fs::write(&conf_path, conf).unwrap();

        let cfg = config::load(&conf_path).unwrap();
        let supervisor = Supervisor::new(cfg, &conf_path, Vec::new());
        let handle = {
            let sup = Arc::clone(&supervisor);
            tokio::spawn(async move { sup.run().await })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while !socket.exists() {
            assert!(Instant::now() < deadline, "control socket never appeared");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        Self {
            supervisor,
            handle,
            socket,
            _dir: dir,
        }
    }

    fn client(&self) -> Controller {
        Controller::new(&self.socket)
    }

    async fn shutdown(self) -> Result<(), RuntimeError> {
        self.supervisor.shutdown();
        self.handle.await.unwrap()
    }
}

async fn wait_for_status(client: &Controller, name: &str, state: &str, within: Duration) -> Value {
    let deadline = Instant::now() + within;
    loop {
        let response = client.status().await.unwrap();
        let found = response["processes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["name"] == name)
            .cloned();
        if let Some(entry) = &found {
            if entry["state"] == state {
                return entry.clone();
            }
        }
        assert!(
            Instant::now() < deadline,
            "'{name}' never reached {state}: {found:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn socket_is_owner_only() {
    let daemon = Daemon::start("").await;

    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(&daemon.socket).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600, "control socket must be mode 0600");

    let socket = daemon.socket.clone();
    daemon.shutdown().await.unwrap();
    assert!(!socket.exists(), "socket must be unlinked on shutdown");
}

#[tokio::test]
async fn autostarted_process_shows_running_with_pid() {
    let daemon = Daemon::start(
        "[program:web]\ncommand = /bin/sleep 3600\nstartsecs = 0\nstopwaitsecs = 5\n",
    )
    .await;
    let client = daemon.client();

    let entry = wait_for_status(&client, "web", "RUNNING", Duration::from_secs(5)).await;
    assert!(entry["pid"].as_u64().is_some());
    assert!(entry["uptime_seconds"].as_u64().is_some());
    assert!(entry["health"].is_null());

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn start_stop_round_trip_over_the_socket() {
    let daemon = Daemon::start(
        "[program:job]\ncommand = /bin/sleep 3600\nautostart = false\nstartsecs = 0\nstopwaitsecs = 5\n",
    )
    .await;
    let client = daemon.client();

    let entry = wait_for_status(&client, "job", "STOPPED", Duration::from_secs(5)).await;
    assert!(entry["pid"].is_null());

    let response = client.start("job").await.unwrap();
    assert_eq!(response["status"], "ok");
    let entry = wait_for_status(&client, "job", "RUNNING", Duration::from_secs(5)).await;
    let first_pid = entry["pid"].as_u64().unwrap();

    let response = client.restart("job", false).await.unwrap();
    assert_eq!(response["status"], "ok");
    let entry = wait_for_status(&client, "job", "RUNNING", Duration::from_secs(5)).await;
    assert_ne!(entry["pid"].as_u64().unwrap(), first_pid);

    let response = client.stop("job").await.unwrap();
    assert_eq!(response["status"], "ok");
    wait_for_status(&client, "job", "STOPPED", Duration::from_secs(5)).await;

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn numprocs_expands_into_named_instances() {
    let daemon = Daemon::start(
        "[program:pool]\ncommand = /bin/sleep 3600\nnumprocs = 3\nstartsecs = 0\nstopwaitsecs = 5\n",
    )
    .await;
    let client = daemon.client();

    for name in ["pool:00", "pool:01", "pool:02"] {
        wait_for_status(&client, name, "RUNNING", Duration::from_secs(5)).await;
    }
    let response = client.status().await.unwrap();
    assert_eq!(response["processes"].as_array().unwrap().len(), 3);

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn group_operations_fan_out_to_members() {
    let daemon = Daemon::start(
        "[program:a]\ncommand = /bin/sleep 3600\nstartsecs = 0\nstopwaitsecs = 5\n\n\
         [program:b]\ncommand = /bin/sleep 3600\nstartsecs = 0\nstopwaitsecs = 5\n\n\
         [group:backend]\nprograms = a, b\n",
    )
    .await;
    let client = daemon.client();

    wait_for_status(&client, "a", "RUNNING", Duration::from_secs(5)).await;
    wait_for_status(&client, "b", "RUNNING", Duration::from_secs(5)).await;

    let response = client.stop_group("backend").await.unwrap();
    assert_eq!(response["status"], "ok");
    wait_for_status(&client, "a", "STOPPED", Duration::from_secs(5)).await;
    wait_for_status(&client, "b", "STOPPED", Duration::from_secs(5)).await;

    let response = client.start_group("backend").await.unwrap();
    assert_eq!(response["status"], "ok");
    wait_for_status(&client, "a", "RUNNING", Duration::from_secs(5)).await;
    wait_for_status(&client, "b", "RUNNING", Duration::from_secs(5)).await;

    let response = client.start_group("nope").await.unwrap();
    assert_eq!(response["status"], "error");
    assert_eq!(response["code"], "INVALID_REQUEST");

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_process_name_is_a_client_error() {
    let daemon = Daemon::start("").await;
    let client = daemon.client();

    let response = client.start("ghost").await.unwrap();
    assert_eq!(response["status"], "error");
    assert_eq!(response["code"], "INVALID_REQUEST");
    assert!(response["message"].as_str().unwrap().contains("ghost"));

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn protocol_errors_use_their_codes_and_keep_the_connection() {
    let daemon = Daemon::start("").await;
    let mut stream = UnixStream::connect(&daemon.socket).await.unwrap();

    // Bad JSON → INVALID_JSON, connection survives.
    frame::write_frame(&mut stream, b"{not json").await.unwrap();
    let reply: Value =
        serde_json::from_slice(&frame::read_frame(&mut stream).await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["code"], "INVALID_JSON");

    // Not an object → INVALID_REQUEST.
    frame::write_frame(&mut stream, b"[1,2]").await.unwrap();
    let reply: Value =
        serde_json::from_slice(&frame::read_frame(&mut stream).await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["code"], "INVALID_REQUEST");

    // Unknown command → UNKNOWN_COMMAND.
    frame::write_frame(&mut stream, br#"{"command":"explode"}"#)
        .await
        .unwrap();
    let reply: Value =
        serde_json::from_slice(&frame::read_frame(&mut stream).await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["code"], "UNKNOWN_COMMAND");

    // The same connection still serves valid requests.
    frame::write_frame(&mut stream, br#"{"command":"status"}"#)
        .await
        .unwrap();
    let reply: Value =
        serde_json::from_slice(&frame::read_frame(&mut stream).await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["status"], "ok");

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn oversized_frame_aborts_only_its_connection() {
    let daemon = Daemon::start("").await;

    let mut stream = UnixStream::connect(&daemon.socket).await.unwrap();
    // Header declaring 2 MiB: rejected before the body is read.
    let len = ((2 * 1024 * 1024) as u32).to_be_bytes();
    tokio::io::AsyncWriteExt::write_all(&mut stream, &len)
        .await
        .unwrap();
    let reply = frame::read_frame(&mut stream).await.unwrap().unwrap();
    let reply: Value = serde_json::from_slice(&reply).unwrap();
    assert_eq!(reply["code"], "INVALID_REQUEST");
    // Server closed this connection afterwards.
    assert!(frame::read_frame(&mut stream).await.unwrap().is_none());

    // Fresh connections are unaffected.
    let client = daemon.client();
    assert_eq!(client.status().await.unwrap()["status"], "ok");

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn second_daemon_on_same_pidfile_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("daemon.pid");
    let conf_path = dir.path().join("procvisor.conf");
    let conf = format!(
        "[procvisor]\nsocket = {}\npidfile = {}\n",
        dir.path().join("a.sock").display(),
        pidfile.display(),
    );
    std::fs::write(&conf_path, &conf).unwrap();

    let cfg = config::load(&conf_path).unwrap();
    let first = Supervisor::new(cfg, &conf_path, Vec::new());
    let handle = {
        let sup = Arc::clone(&first);
        tokio::spawn(async move { sup.run().await })
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    while !dir.path().join("a.sock").exists() {
        assert!(Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Second instance against the same pidfile (different socket).
    let conf2_path = dir.path().join("procvisor2.conf");
    let conf2 = format!(
        "[procvisor]\nsocket = {}\npidfile = {}\n",
        dir.path().join("b.sock").display(),
        pidfile.display(),
    );
    std::fs::write(&conf2_path, &conf2).unwrap();
    let cfg2 = config::load(&conf2_path).unwrap();
    let second = Supervisor::new(cfg2, &conf2_path, Vec::new());
    match second.run().await {
        Err(RuntimeError::PidFileBusy { .. }) => {}
        other => panic!("expected PidFileBusy, got {other:?}"),
    }

    first.shutdown();
    handle.await.unwrap().unwrap();
}
