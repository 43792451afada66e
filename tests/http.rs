//! End-to-end: sensor task -> store -> http responder, over real sockets.

use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use sensor_node::config::NodeConfig;
use sensor_node::domain::SensorReading;
use sensor_node::httpd::HttpResponder;
use sensor_node::node;
use sensor_node::runtime::{RestartPolicy, Scheduler};
use sensor_node::store::{SharedStateStore, Snapshot};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const HEAD: &str = "HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n";

async fn fetch(addr: SocketAddr, request: &[u8]) -> Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(request).await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(String::from_utf8(response)?)
}

fn responder(store: &SharedStateStore, timeout: Option<Duration>) -> Result<(Scheduler, SocketAddr)> {
    let responder = HttpResponder::bind("127.0.0.1:0".parse()?, 16, store.clone(), timeout)?;
    let addr = responder.local_addr()?;
    let mut scheduler = Scheduler::new();
    scheduler.register(responder, RestartPolicy::NEVER);
    Ok((scheduler, addr))
}

#[tokio::test]
async fn get_root_serves_the_snapshot() -> Result<()> {
    // Arrange
    let store = SharedStateStore::new();
    store.set("dht", SensorReading::new().with("temp", 21.5).with("rel", 45.0));
    let (scheduler, addr) = responder(&store, None)?;

    // Act
    let response = scheduler.run_until(fetch(addr, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")).await?;

    // Assert
    let body = response.strip_prefix(HEAD).expect("status line and content type");
    assert_eq!(body, r#"{"dht":{"rel":45.0,"temp":21.5}}"#);
    Ok(())
}

#[tokio::test]
async fn empty_store_is_an_empty_object() -> Result<()> {
    let store = SharedStateStore::new();
    let (scheduler, addr) = responder(&store, None)?;

    let response = scheduler.run_until(fetch(addr, b"GET / HTTP/1.0\r\n\r\n")).await?;

    assert_eq!(response, format!("{HEAD}{{}}"));
    Ok(())
}

#[tokio::test]
async fn other_requests_are_closed_without_a_response() -> Result<()> {
    let store = SharedStateStore::new();
    store.set("dht", SensorReading::new().with("temp", 21.5));
    let (scheduler, addr) = responder(&store, None)?;

    let responses = scheduler
        .run_until(async {
            Ok::<_, anyhow::Error>(vec![
                fetch(addr, b"GET /other HTTP/1.0\r\n\r\n").await?,
                fetch(addr, b"POST / HTTP/1.0\r\n\r\n").await?,
                fetch(addr, b"HEAD / HTTP/1.0\r\n\r\n").await?,
            ])
        })
        .await?;

    assert!(responses.iter().all(String::is_empty), "{responses:?}");
    Ok(())
}

#[tokio::test]
async fn bare_request_line_is_answered() -> Result<()> {
    // Arrange: no headers and no blank line, and no per-connection timeout
    let store = SharedStateStore::new();
    store.set("dht", SensorReading::new().with("temp", 21.5));
    let (scheduler, addr) = responder(&store, None)?;

    // Act
    let response = scheduler
        .run_until(tokio::time::timeout(Duration::from_secs(2), fetch(addr, b"GET / HTTP/1.0\r\n")))
        .await??;

    // Assert
    assert_eq!(response, format!("{HEAD}{{\"dht\":{{\"temp\":21.5}}}}"));
    Ok(())
}

#[tokio::test]
async fn silent_client_is_dropped_after_the_timeout() -> Result<()> {
    let store = SharedStateStore::new();
    let (scheduler, addr) = responder(&store, Some(Duration::from_millis(100)))?;

    let response = scheduler
        .run_until(tokio::time::timeout(Duration::from_secs(5), fetch(addr, b"")))
        .await??;

    assert!(response.is_empty());
    Ok(())
}

#[tokio::test]
async fn a_stalled_connection_does_not_block_others() -> Result<()> {
    let store = SharedStateStore::new();
    let (scheduler, addr) = responder(&store, None)?;

    let response = scheduler
        .run_until(async {
            // half a request line, never finished
            let mut stalled = TcpStream::connect(addr).await?;
            stalled.write_all(b"GET / HT").await?;
            let response = fetch(addr, b"GET / HTTP/1.0\r\n\r\n").await?;
            drop(stalled);
            Ok::<_, anyhow::Error>(response)
        })
        .await?;

    assert!(response.starts_with(HEAD));
    Ok(())
}

#[tokio::test]
async fn readings_flow_from_sysfs_to_http() -> Result<()> {
    // Arrange: a fake one-wire bus with one thermometer
    let w1 = tempfile::tempdir()?;
    let rom = w1.path().join("28-0316a2795bff");
    fs::create_dir_all(&rom)?;
    fs::write(rom.join("temperature"), "21562\n")?;

    let config: NodeConfig = serde_json::from_value(serde_json::json!({
        "sensors": {"outside": {"type": "ds18x20", "pin": 4}},
        "httpd": {"listen_address": "127.0.0.1", "port": 0},
        "paths": {"w1_devices": w1.path(), "iio_devices": w1.path()}
    }))?;
    let store = SharedStateStore::new();
    let node = node::assemble(&config, &store)?;
    let addr = node.http_addr.expect("httpd configured");

    // Act: poll until the first conversion has landed
    let snapshot = node
        .scheduler
        .run_until(async {
            for _ in 0..50 {
                let response = fetch(addr, b"GET / HTTP/1.0\r\n\r\n").await?;
                let body = response.strip_prefix(HEAD).unwrap_or_default();
                let snapshot: Snapshot = serde_json::from_str(body)?;
                if !snapshot.is_empty() {
                    return Ok::<_, anyhow::Error>(snapshot);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            anyhow::bail!("no reading after 5s")
        })
        .await?;

    // Assert
    assert_eq!(snapshot.get("outside").and_then(|r| r.get("temp")), Some(21.562));
    Ok(())
}
