//! TCP subscriber front-end over a real loopback socket.

use press_daq::hub::server::SubscriberServer;
use press_daq::hub::BroadcastHub;
use press_daq::reading::{Reading, SensorKind};
use press_daq::source::StopSignal;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(5);

async fn start_server(hub: &BroadcastHub) -> (std::net::SocketAddr, StopSignal) {
    let server = SubscriberServer::bind("127.0.0.1:0", hub.clone())
        .await
        .expect("bind loopback");
    let addr = server.local_addr().expect("local addr");
    let stop = StopSignal::new();
    tokio::spawn(server.run(stop.clone()));
    (addr, stop)
}

async fn wait_for_count(hub: &BroadcastHub, count: usize) {
    timeout(STEP, async {
        while hub.subscriber_count() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber count reached");
}

async fn next_json(lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>) -> Value {
    let line = timeout(STEP, lines.next_line())
        .await
        .expect("line before timeout")
        .expect("read line")
        .expect("connection open");
    serde_json::from_str(&line).expect("valid json line")
}

#[tokio::test]
async fn test_filtered_subscription_over_tcp() {
    let hub = BroadcastHub::new(Duration::ZERO, Duration::from_secs(30));
    let (addr, stop) = start_server(&hub).await;

    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read, mut write) = stream.into_split();
    write.write_all(b"press-a\n").await.expect("send filter");
    let mut lines = BufReader::new(read).lines();

    let ack = next_json(&mut lines).await;
    assert_eq!(ack["status"], "connected");
    assert_eq!(ack["filter"], "press-a");
    wait_for_count(&hub, 1).await;

    assert_eq!(
        hub.publish(&Reading::now("press-b", SensorKind::Pressure, 1.0))
            .await,
        0
    );
    assert_eq!(
        hub.publish(&Reading::now("press-a", SensorKind::Pressure, 2.0))
            .await,
        1
    );

    let msg = next_json(&mut lines).await;
    assert_eq!(msg["event"], "ingest");
    assert_eq!(msg["reading"]["device_id"], "press-a");
    assert_eq!(msg["reading"]["value"], 2.0);

    drop(write);
    drop(lines);
    wait_for_count(&hub, 0).await;
    stop.trigger();
}

#[tokio::test]
async fn test_blank_filter_subscribes_to_all() {
    let hub = BroadcastHub::new(Duration::ZERO, Duration::from_secs(30));
    let (addr, stop) = start_server(&hub).await;

    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read, mut write) = stream.into_split();
    write.write_all(b"\n").await.expect("send filter");
    let mut lines = BufReader::new(read).lines();

    let ack = next_json(&mut lines).await;
    assert_eq!(ack["filter"], "all");
    wait_for_count(&hub, 1).await;

    // chatter after the filter line is ignored
    write.write_all(b"ping\n").await.expect("send chatter");
    hub.publish(&Reading::now("anything", SensorKind::Distance, 7.5))
        .await;
    let msg = next_json(&mut lines).await;
    assert_eq!(msg["reading"]["sensor"], "distance");

    stop.trigger();
}
