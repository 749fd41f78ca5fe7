use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use netmux::config::SshConfig;
use netmux::device::DeviceFamily;
use netmux::error::ConnectError;
use netmux::session::{Connector, SessionPool, ShellTransport, Target, TransportHandle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};
use tokio::sync::Notify;

/// In-memory stand-in for a fleet of Huawei-like switches.
#[derive(Default)]
struct FakeFleet {
    connects: AtomicUsize,
    refuse: AtomicBool,
    kill_switches: Mutex<Vec<Arc<Notify>>>,
    received: Arc<Mutex<Vec<String>>>,
}

struct FakeHandle {
    kill: Arc<Notify>,
}

#[async_trait]
impl TransportHandle for FakeHandle {
    async fn close(&self) {
        self.kill.notify_one();
    }
}

#[async_trait]
impl Connector for FakeFleet {
    async fn connect(
        &self,
        target: &Target,
        _config: &SshConfig,
    ) -> Result<ShellTransport, ConnectError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectError::Connection(format!(
                "{} connection refused",
                target.host
            )));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (client, device) = duplex(64 * 1024);
        let kill = Arc::new(Notify::new());
        self.kill_switches.lock().unwrap().push(kill.clone());
        tokio::spawn(fake_device(
            device,
            target.host.clone(),
            kill.clone(),
            self.received.clone(),
        ));

        let (reader, writer) = tokio::io::split(client);
        Ok(ShellTransport {
            reader: Box::new(reader),
            writer: Box::new(writer),
            handle: Box::new(FakeHandle { kill }),
        })
    }
}

impl FakeFleet {
    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Drops the device side of every open connection.
    fn kill_all(&self) {
        for kill in self.kill_switches.lock().unwrap().drain(..) {
            kill.notify_one();
        }
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

async fn fake_device(
    device: DuplexStream,
    hostname: String,
    kill: Arc<Notify>,
    received: Arc<Mutex<Vec<String>>>,
) {
    let prompt = format!("<{hostname}>");
    let (read, mut write) = tokio::io::split(device);
    let banner = format!("Info: The max number of VTY users is 5.\r\n{prompt}");
    if write.write_all(banner.as_bytes()).await.is_err() {
        return;
    }

    let mut lines = BufReader::new(read).lines();
    loop {
        let line = tokio::select! {
            _ = kill.notified() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => break,
            },
        };
        received.lock().unwrap().push(line.clone());

        match line.trim() {
            "" => {
                let _ = write.write_all(format!("\r\n{prompt}").as_bytes()).await;
            }
            "display version" => {
                let reply = format!(
                    "{line}\r\nHuawei Versatile Routing Platform Software\r\n{prompt}"
                );
                let _ = write.write_all(reply.as_bytes()).await;
            }
            "show version" => {
                let reply = format!("{line}\r\nError: Unrecognized command\r\n{prompt}");
                let _ = write.write_all(reply.as_bytes()).await;
            }
            "slow" => {
                let _ = write.write_all(b"slow\r\n").await;
                for tick in 0..40 {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    let _ = write.write_all(format!("tick {tick}\r\n").as_bytes()).await;
                }
                let _ = write.write_all(prompt.as_bytes()).await;
            }
            cmd if cmd.starts_with("screen-length") => {
                let _ = write.write_all(format!("{line}\r\n{prompt}").as_bytes()).await;
            }
            cmd => {
                let reply = format!("{prompt}{line}\r\noutput of {cmd}\r\n{prompt}");
                let _ = write.write_all(reply.as_bytes()).await;
            }
        }
    }
}

fn pool_with(fleet: &Arc<FakeFleet>, config: SshConfig) -> Arc<SessionPool> {
    let connector: Arc<dyn Connector> = fleet.clone();
    Arc::new(SessionPool::with_connector(config, connector).expect("valid config"))
}

fn huawei(host: &str) -> Target {
    Target::new("admin", "secret", host, 22).with_family(DeviceFamily::Huawei)
}

fn cmds(list: &[&str]) -> Vec<String> {
    list.iter().map(|c| c.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn run_returns_framed_output_of_first_command() {
    let fleet = Arc::new(FakeFleet::default());
    let pool = pool_with(&fleet, SshConfig::default());

    let output = pool
        .run(&huawei("sw1"), &cmds(&["display clock"]))
        .await
        .expect("run");

    assert_eq!(output, "<sw1>display clock\r\noutput of display clock\r\n");
    assert!(fleet.received().contains(&"screen-length 0 temporary".to_string()));
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_for_one_device_share_a_single_connection() {
    let fleet = Arc::new(FakeFleet::default());
    let pool = pool_with(&fleet, SshConfig::default());

    let mut handles = Vec::new();
    for i in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.run(&huawei("sw1"), &[format!("display interface {i}")])
                .await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let output = handle.await.expect("task").expect("run");
        assert!(output.contains(&format!("output of display interface {i}")));
    }

    assert_eq!(fleet.connects(), 1);
    assert_eq!(pool.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn different_devices_get_their_own_sessions() {
    let fleet = Arc::new(FakeFleet::default());
    let pool = pool_with(&fleet, SshConfig::default());

    let (sw1, sw2) = (huawei("sw1"), huawei("sw2"));
    let batch = cmds(&["display clock"]);
    let (a, b) = tokio::join!(pool.run(&sw1, &batch), pool.run(&sw2, &batch));
    assert!(a.expect("sw1").contains("<sw1>"));
    assert!(b.expect("sw2").contains("<sw2>"));
    assert_eq!(fleet.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn family_hints_do_not_split_sessions() {
    let fleet = Arc::new(FakeFleet::default());
    let pool = pool_with(&fleet, SshConfig::default());

    let declared = huawei("sw1");
    let undeclared = Target::new("admin", "secret", "sw1", 22);
    assert_eq!(declared.session_key(), undeclared.session_key());

    pool.run(&declared, &cmds(&["display clock"]))
        .await
        .expect("first run");
    pool.run(&undeclared, &cmds(&["display clock"]))
        .await
        .expect("second run");

    assert_eq!(fleet.connects(), 1);
    assert_eq!(
        pool.cached_family(&declared.session_key()).await,
        Some(DeviceFamily::Huawei)
    );
}

#[tokio::test(start_paused = true)]
async fn undeclared_family_is_detected_before_paging_is_disabled() {
    let fleet = Arc::new(FakeFleet::default());
    let pool = pool_with(&fleet, SshConfig::default());
    let target = Target::new("admin", "secret", "sw1", 22);

    pool.run(&target, &cmds(&["display clock"]))
        .await
        .expect("run");

    assert_eq!(
        pool.cached_family(&target.session_key()).await,
        Some(DeviceFamily::Huawei)
    );
    let received = fleet.received();
    let version = received
        .iter()
        .position(|l| l == "display version")
        .expect("version probe sent");
    let paging = received
        .iter()
        .position(|l| l == "screen-length 0 temporary")
        .expect("paging disabled");
    assert!(version < paging);
}

#[tokio::test(start_paused = true)]
async fn idle_sessions_are_evicted_and_recent_ones_survive() {
    let fleet = Arc::new(FakeFleet::default());
    let pool = pool_with(&fleet, SshConfig::default());
    let stale = huawei("sw1");
    let fresh = huawei("sw2");

    pool.run(&stale, &cmds(&["display clock"])).await.expect("sw1");
    pool.run(&fresh, &cmds(&["display clock"])).await.expect("sw2");

    tokio::time::advance(Duration::from_secs(6 * 60)).await;
    pool.run(&fresh, &cmds(&["display clock"])).await.expect("sw2 again");
    tokio::time::advance(Duration::from_secs(5 * 60)).await;

    let evicted = pool.sweep_idle().await;
    assert_eq!(evicted, vec![stale.session_key()]);
    assert!(!pool.contains(&stale.session_key()).await);
    assert!(pool.contains(&fresh.session_key()).await);

    // The evicted device gets a fresh connection on its next call.
    pool.run(&stale, &cmds(&["display clock"])).await.expect("sw1 again");
    assert_eq!(fleet.connects(), 3);
}

#[tokio::test(start_paused = true)]
async fn background_sweep_evicts_after_idle_timeout() {
    let fleet = Arc::new(FakeFleet::default());
    let pool = pool_with(&fleet, SshConfig::default());
    let target = huawei("sw1");
    let sweep = pool.spawn_idle_sweep();

    pool.run(&target, &cmds(&["display clock"])).await.expect("run");
    tokio::time::sleep(Duration::from_secs(9 * 60)).await;
    assert!(pool.contains(&target.session_key()).await);

    tokio::time::sleep(Duration::from_secs(2 * 60)).await;
    assert!(!pool.contains(&target.session_key()).await);

    sweep.abort();
}

#[tokio::test(start_paused = true)]
async fn sweep_skips_sessions_that_are_in_use() {
    let fleet = Arc::new(FakeFleet::default());
    let config = SshConfig {
        idle_timeout_secs: 1,
        ..SshConfig::default()
    };
    let pool = pool_with(&fleet, config);
    let target = huawei("sw1");

    let busy = {
        let pool = pool.clone();
        let target = target.clone();
        tokio::spawn(async move { pool.run(&target, &cmds(&["slow"])).await })
    };

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(pool.sweep_idle().await.is_empty());
    assert!(pool.contains(&target.session_key()).await);

    let output = busy.await.expect("task").expect("slow run");
    assert!(output.contains("tick 39"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(pool.sweep_idle().await, vec![target.session_key()]);
}

#[tokio::test(start_paused = true)]
async fn dead_session_is_replaced_on_next_call() {
    let fleet = Arc::new(FakeFleet::default());
    let pool = pool_with(&fleet, SshConfig::default());
    let target = huawei("sw1");

    pool.run(&target, &cmds(&["display clock"])).await.expect("first run");
    fleet.kill_all();

    let output = pool
        .run(&target, &cmds(&["display clock"]))
        .await
        .expect("run after transport loss");
    assert!(output.contains("output of display clock"));
    assert_eq!(fleet.connects(), 2);
    assert_eq!(pool.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_connection_is_not_cached() {
    let fleet = Arc::new(FakeFleet::default());
    fleet.refuse.store(true, Ordering::SeqCst);
    let pool = pool_with(&fleet, SshConfig::default());

    let err = pool
        .run(&huawei("sw1"), &cmds(&["display clock"]))
        .await
        .expect_err("connect should fail");
    assert!(matches!(err, ConnectError::Connection(_)));
    assert!(pool.is_empty().await);

    fleet.refuse.store(false, Ordering::SeqCst);
    pool.run(&huawei("sw1"), &cmds(&["display clock"]))
        .await
        .expect("retry succeeds");
    assert_eq!(fleet.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_batch_is_rejected() {
    let fleet = Arc::new(FakeFleet::default());
    let pool = pool_with(&fleet, SshConfig::default());

    let err = pool
        .run(&huawei("sw1"), &[])
        .await
        .expect_err("empty batch");
    assert!(matches!(err, ConnectError::EmptyCommandBatch));
    assert_eq!(fleet.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn close_all_empties_the_pool() {
    let fleet = Arc::new(FakeFleet::default());
    let pool = pool_with(&fleet, SshConfig::default());

    pool.run(&huawei("sw1"), &cmds(&["display clock"])).await.expect("sw1");
    pool.run(&huawei("sw2"), &cmds(&["display clock"])).await.expect("sw2");
    pool.close_all().await;

    assert!(pool.is_empty().await);
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let fleet: Arc<dyn Connector> = Arc::new(FakeFleet::default());
    let config = SshConfig {
        expects: Vec::new(),
        ..SshConfig::default()
    };
    assert!(matches!(
        SessionPool::with_connector(config, fleet),
        Err(ConnectError::Config(_))
    ));
}
