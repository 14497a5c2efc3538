//! Definition lookup against a scripted HTTP Exchange.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;

use moorline::config::HttpConfig;
use moorline::core::NodeIdentity;
use moorline::exchange::{ExchangeError, HttpExchangeClient, NodeAuth};

// --- scripted HTTP stub ----------------------------------------------------

/// Serve the scripted responses one connection each, returning the raw
/// request heads+bodies that were seen.
fn serve(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let base = format!("http://{}/", listener.local_addr().expect("addr"));
    let handle = std::thread::spawn(move || {
        let mut seen = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().expect("accept");
            seen.push(read_request(&mut stream));
            let response = format!(
                "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).expect("write");
        }
        seen
    });
    (base, handle)
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).expect("read head");
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head).to_string();
    let content_length = head.lines().find_map(|line| {
        line.to_ascii_lowercase()
            .strip_prefix("content-length:")
            .and_then(|v| v.trim().parse::<usize>().ok())
    });
    match content_length {
        Some(n) if n > 0 => {
            let mut body = vec![0u8; n];
            stream.read_exact(&mut body).expect("read body");
            format!("{head}{}", String::from_utf8_lossy(&body))
        }
        _ => head,
    }
}

fn client(base: &str) -> HttpExchangeClient {
    HttpExchangeClient::new(
        base,
        &HttpConfig {
            connect_timeout_secs: 2,
            read_timeout_secs: 2,
            retry_count: 0,
            retry_interval_secs: 1,
        },
    )
}

fn auth() -> NodeAuth {
    NodeAuth::new(NodeIdentity::new("acme", "n1"), "tok")
}

fn workload_json(version: &str, api_specs: &str) -> String {
    format!(
        r#"{{
            "owner": "acme/admin",
            "workloadUrl": "https://workloads.example.com/gps",
            "version": "{version}",
            "arch": "amd64",
            "apiSpec": {api_specs},
            "workloads": [{{"deployment":"{{}}","deployment_signature":"sig","torrent":""}}]
        }}"#
    )
}

fn all_workloads_json() -> String {
    format!(
        r#"{{"workloads":{{
            "acme/gps_1.0.0": {},
            "acme/gps_1.2.0": {},
            "acme/gps_2.0.0": {}
        }},"lastIndex":0}}"#,
        workload_json("1.0.0", "[]"),
        workload_json("1.2.0", "[]"),
        workload_json("2.0.0", "[]"),
    )
}

// --- workload lookup -------------------------------------------------------

#[test]
fn range_lookup_returns_highest_in_range() {
    let (base, server) = serve(vec![(200, all_workloads_json())]);
    let workload = client(&base)
        .get_workload(
            &auth(),
            "acme",
            "https://workloads.example.com/gps",
            "[1.0.0,2.0.0)",
            "amd64",
        )
        .expect("lookup")
        .expect("a workload in range");
    assert_eq!(workload.version, "1.2.0");

    // Ranges are filtered locally: the search query carries no version.
    let seen = server.join().expect("server");
    assert!(seen[0].contains("workloadUrl=https://workloads.example.com/gps"));
    assert!(!seen[0].contains("version="));
}

#[test]
fn exact_lookup_expects_exactly_one_record() {
    let one = format!(
        r#"{{"workloads":{{"acme/gps_1.2.0": {}}},"lastIndex":0}}"#,
        workload_json("1.2.0", "[]")
    );
    let (base, server) = serve(vec![(200, one)]);
    let workload = client(&base)
        .get_workload(
            &auth(),
            "acme",
            "https://workloads.example.com/gps",
            "1.2.0",
            "amd64",
        )
        .expect("lookup")
        .expect("the exact workload");
    assert_eq!(workload.version, "1.2.0");

    let seen = server.join().expect("server");
    assert!(seen[0].contains("version=1.2.0"));
}

#[test]
fn exact_lookup_with_no_match_is_a_wrong_count_error() {
    let (base, server) = serve(vec![(200, r#"{"workloads":{},"lastIndex":0}"#.into())]);
    let err = client(&base)
        .get_workload(
            &auth(),
            "acme",
            "https://workloads.example.com/gps",
            "1.5.0",
            "amd64",
        )
        .expect_err("nothing stored under 1.5.0");
    match err {
        ExchangeError::WrongCount { got, .. } => assert_eq!(got, 0),
        other => panic!("unexpected error: {other}"),
    }
    server.join().expect("server");
}

#[test]
fn range_lookup_with_no_match_is_none() {
    let (base, server) = serve(vec![(200, all_workloads_json())]);
    let found = client(&base)
        .get_workload(
            &auth(),
            "acme",
            "https://workloads.example.com/gps",
            "[3.0.0,4.0.0)",
            "amd64",
        )
        .expect("lookup");
    assert!(found.is_none());
    server.join().expect("server");
}

#[test]
fn invalid_version_is_rejected_before_any_request() {
    // No server: the call must fail without touching the network.
    let err = client("http://127.0.0.1:1/")
        .get_workload(
            &auth(),
            "acme",
            "https://workloads.example.com/gps",
            "one.two",
            "amd64",
        )
        .expect_err("invalid version");
    assert!(matches!(err, ExchangeError::Core(_)));
}

// --- workload resolution ---------------------------------------------------

#[test]
fn resolve_workload_checks_every_api_spec_dependency() {
    let spec = r#"[{"specRef":"https://ms.example.com/gps","org":"acme","version":"1.0.0","arch":"amd64"}]"#;
    let workloads = format!(
        r#"{{"workloads":{{"acme/gps_1.2.0": {}}},"lastIndex":0}}"#,
        workload_json("1.2.0", spec)
    );
    let microservices = r#"{"microservices":{
        "acme/msgps_1.4.0": {"specRef":"https://ms.example.com/gps","version":"1.4.0","arch":"amd64","sharable":"single"}
    },"lastIndex":0}"#;
    let (base, server) = serve(vec![(200, workloads), (200, microservices.into())]);

    let specs = client(&base)
        .resolve_workload(
            &auth(),
            "acme",
            "https://workloads.example.com/gps",
            "1.2.0",
            "amd64",
        )
        .expect("resolve");
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].spec_ref, "https://ms.example.com/gps");

    let seen = server.join().expect("server");
    assert_eq!(seen.len(), 2);
    // The dependency's bare version was widened to a range, so the search
    // carries no version filter.
    assert!(seen[1].contains("specRef=https://ms.example.com/gps"));
    assert!(!seen[1].contains("version="));
}

#[test]
fn resolve_workload_fails_on_a_missing_dependency() {
    let spec = r#"[{"specRef":"https://ms.example.com/gps","org":"acme","version":"[2.0.0,3.0.0)","arch":"amd64"}]"#;
    let workloads = format!(
        r#"{{"workloads":{{"acme/gps_1.2.0": {}}},"lastIndex":0}}"#,
        workload_json("1.2.0", spec)
    );
    // Only a 1.4.0 microservice exists; the workload wants [2.0.0,3.0.0).
    let microservices = r#"{"microservices":{
        "acme/msgps_1.4.0": {"specRef":"https://ms.example.com/gps","version":"1.4.0","arch":"amd64","sharable":"single"}
    },"lastIndex":0}"#;
    let (base, server) = serve(vec![(200, workloads), (200, microservices.into())]);

    let err = client(&base)
        .resolve_workload(
            &auth(),
            "acme",
            "https://workloads.example.com/gps",
            "1.2.0",
            "amd64",
        )
        .expect_err("unresolved dependency");
    match err {
        ExchangeError::UnresolvedDependency { spec_ref, range, .. } => {
            assert_eq!(spec_ref, "https://ms.example.com/gps");
            assert_eq!(range, "[2.0.0,3.0.0)");
        }
        other => panic!("unexpected error: {other}"),
    }
    server.join().expect("server");
}

#[test]
fn resolve_workload_requires_one_deployment_entry() {
    let no_deployments = r#"{"workloads":{"acme/gps_1.2.0":{
        "workloadUrl":"https://workloads.example.com/gps",
        "version":"1.2.0","arch":"amd64","apiSpec":[],"workloads":[]
    }},"lastIndex":0}"#;
    let (base, server) = serve(vec![(200, no_deployments.into())]);
    let err = client(&base)
        .resolve_workload(
            &auth(),
            "acme",
            "https://workloads.example.com/gps",
            "1.2.0",
            "amd64",
        )
        .expect_err("no deployment entry");
    assert!(matches!(err, ExchangeError::WrongCount { got: 0, .. }));
    server.join().expect("server");
}

// --- microservice lookup ---------------------------------------------------

#[test]
fn microservice_range_lookup_filters_locally() {
    let microservices = r#"{"microservices":{
        "acme/ms_0.9.0": {"specRef":"https://ms.example.com/gps","version":"0.9.0","arch":"amd64"},
        "acme/ms_1.4.0": {"specRef":"https://ms.example.com/gps","version":"1.4.0","arch":"amd64"},
        "acme/ms_2.1.0": {"specRef":"https://ms.example.com/gps","version":"2.1.0","arch":"amd64"}
    },"lastIndex":0}"#;
    let (base, server) = serve(vec![(200, microservices.into())]);
    let found = client(&base)
        .get_microservice(
            &auth(),
            "acme",
            "https://ms.example.com/gps",
            "[1.0.0,2.0.0)",
            "amd64",
        )
        .expect("lookup")
        .expect("in range");
    assert_eq!(found.version, "1.4.0");
    server.join().expect("server");
}

// --- organizations and blockchain clients ----------------------------------

#[test]
fn organization_lookup_maps_absence_to_not_found() {
    let (base, server) = serve(vec![
        (200, r#"{"orgs":{"acme":{"label":"Acme Corp"}},"lastIndex":0}"#.into()),
        (404, String::new()),
    ]);
    let exchange = client(&base);
    let org = exchange.get_organization(&auth(), "acme").expect("org");
    assert_eq!(org.label, "Acme Corp");

    let err = exchange
        .get_organization(&auth(), "ghosts")
        .expect_err("absent org");
    assert!(matches!(err, ExchangeError::NotFound { .. }));
    server.join().expect("server");
}

#[test]
fn blockchain_details_pass_through_verbatim() {
    let details = r#"{\"chains\":[{\"arch\":\"amd64\"}]}"#;
    let body = format!(
        r#"{{"blockchains":{{"mainnet":{{"description":"d","definedBy":"acme","details":"{details}","lastUpdated":"now"}}}},"lastIndex":0}}"#
    );
    let (base, server) = serve(vec![(200, body)]);
    let details = client(&base)
        .get_blockchain_client(&auth(), "acme", "mainnet", "ethereum")
        .expect("blockchain");
    assert_eq!(details, r#"{"chains":[{"arch":"amd64"}]}"#);

    let seen = server.join().expect("server");
    assert!(seen[0].contains("GET /orgs/acme/bctypes/ethereum/blockchains/mainnet"));
}
