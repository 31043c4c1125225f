mod common;

use common::{TestServer, plaintext_client, produce_req, service};
use commitlog_tonic_core::proto::{ConsumeRequest, GetServersRequest};
use std::time::Duration;
use tokio_stream::StreamExt;
use tonic::{Code, Request};

#[tokio::test]
async fn produce_then_consume() {
    let server = TestServer::start(service(None), None).await;
    let mut client = plaintext_client(server.addr).await;

    let first = client.produce(produce_req("hello")).await.unwrap().into_inner();
    let second = client.produce(produce_req("world")).await.unwrap().into_inner();
    assert_eq!((first.offset, second.offset), (0, 1));

    let record = client
        .consume(ConsumeRequest { offset: 1 })
        .await
        .unwrap()
        .into_inner()
        .record
        .unwrap();
    assert_eq!(record.value, "world");
    assert_eq!(record.offset, 1);

    let status = client
        .consume(ConsumeRequest { offset: 2 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::OutOfRange);

    server.stop().await;
}

#[tokio::test]
async fn plaintext_callers_are_anonymous() {
    let server = TestServer::start(service(Some("p, , *, consume")), None).await;
    let mut client = plaintext_client(server.addr).await;

    let status = client.produce(produce_req("x")).await.unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
    assert_eq!(status.message(), " not permitted to produce to *");

    // Consume is granted to the anonymous subject; the log is empty.
    let status = client
        .consume(ConsumeRequest { offset: 0 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::OutOfRange);

    server.stop().await;
}

#[tokio::test]
async fn get_servers_is_not_policy_checked() {
    let server = TestServer::start(service(Some("")), None).await;
    let mut client = plaintext_client(server.addr).await;

    let servers = client
        .get_servers(GetServersRequest {})
        .await
        .unwrap()
        .into_inner()
        .servers;
    let ids: Vec<_> = servers.iter().map(|s| (s.id.as_str(), s.is_leader)).collect();
    assert_eq!(ids, vec![("node-0", true), ("node-1", false)]);

    server.stop().await;
}

#[tokio::test]
async fn produce_stream_answers_each_request_in_order() {
    let server = TestServer::start(service(None), None).await;
    let mut client = plaintext_client(server.addr).await;

    let requests = tokio_stream::iter(["a", "b", "c", "d"].map(produce_req));
    let offsets: Vec<u64> = client
        .produce_stream(requests)
        .await
        .unwrap()
        .into_inner()
        .map(|resp| resp.unwrap().offset)
        .collect()
        .await;
    assert_eq!(offsets, vec![0, 1, 2, 3]);

    server.stop().await;
}

#[tokio::test]
async fn consume_stream_tails_new_records() {
    let server = TestServer::start(service(None), None).await;
    let mut client = plaintext_client(server.addr).await;
    client.produce(produce_req("before")).await.unwrap();

    let mut stream = client
        .consume_stream(ConsumeRequest { offset: 0 })
        .await
        .unwrap()
        .into_inner();

    let first = stream.next().await.unwrap().unwrap().record.unwrap();
    assert_eq!(first.value, "before");

    // Nothing new yet: the stream waits instead of ending.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .is_err()
    );

    client.produce(produce_req("after")).await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("tailed record")
        .unwrap()
        .unwrap()
        .record
        .unwrap();
    assert_eq!((second.offset, second.value.as_ref()), (1, b"after".as_ref()));

    drop(stream);
    server.stop().await;
}

#[tokio::test]
async fn consume_stream_ends_at_deadline() {
    let server = TestServer::start(service(None), None).await;
    let mut client = plaintext_client(server.addr).await;

    let mut request = Request::new(ConsumeRequest { offset: 0 });
    request.set_timeout(Duration::from_millis(200));
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        match client.consume_stream(request).await {
            Ok(response) => {
                let mut stream = response.into_inner();
                while let Some(item) = stream.next().await {
                    if let Err(status) = item {
                        return Some(status.code());
                    }
                }
                None
            }
            Err(status) => Some(status.code()),
        }
    })
    .await
    .expect("stream outlived its deadline");
    assert!(
        matches!(ended, None | Some(Code::Cancelled | Code::DeadlineExceeded)),
        "{ended:?}"
    );

    server.stop().await;
}

#[tokio::test]
async fn shutdown_closes_open_streams() {
    let server = TestServer::start(service(None), None).await;
    let mut client = plaintext_client(server.addr).await;

    let mut stream = client
        .consume_stream(ConsumeRequest { offset: 0 })
        .await
        .unwrap()
        .into_inner();

    server.stop().await;

    let end = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stream stayed open after shutdown");
    assert!(
        end.is_none_or(|item| item.is_err()),
        "no record was produced"
    );
}
