use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use gip_console::api::{ControlPlane, HttpControlPlane};
use gip_console::error::ErrorKind;
use gip_console::model::{AgentStatus, BuildStatus, NewBuild, NewProject, StatusFilter};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
struct Seen {
    method: String,
    path: String,
    body: String,
}

struct Canned {
    status: u16,
    body: Vec<u8>,
    headers: Vec<(&'static str, String)>,
}

fn json(status: u16, body: &str) -> Canned {
    Canned {
        status,
        body: body.as_bytes().to_vec(),
        headers: vec![("Content-Type", "application/json".into())],
    }
}

struct Fixture {
    base: String,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Fixture {
    fn client(&self) -> HttpControlPlane {
        HttpControlPlane::new(&self.base, "/v1", Duration::from_secs(5)).expect("client")
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().expect("seen lock").clone()
    }
}

fn read_request(stream: &mut TcpStream) -> Option<Seen> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut first = String::new();
    reader.read_line(&mut first).ok()?;
    let mut parts = first.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut len = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            if k.eq_ignore_ascii_case("content-length") {
                len = v.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).ok()?;
    Some(Seen {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn write_response(stream: &mut TcpStream, resp: Canned) {
    let mut head = format!(
        "HTTP/1.1 {} Fixture\r\nContent-Length: {}\r\nConnection: close\r\n",
        resp.status,
        resp.body.len()
    );
    for (k, v) in &resp.headers {
        head.push_str(&format!("{k}: {v}\r\n"));
    }
    head.push_str("\r\n");
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&resp.body);
    let _ = stream.flush();
}

/// In-process HTTP/1.1 server answering from `route`.
fn serve(route: impl Fn(&Seen) -> Canned + Send + 'static) -> Fixture {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind free port");
    let addr = listener.local_addr().expect("local addr");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else {
                continue;
            };
            let Some(req) = read_request(&mut stream) else {
                continue;
            };
            log.lock().expect("seen lock").push(req.clone());
            write_response(&mut stream, route(&req));
        }
    });
    Fixture {
        base: format!("http://{addr}"),
        seen,
    }
}

const BUILD_42_PENDING: &str = r#"{
    "id": 42, "project_id": 7, "branch": "main", "status": "pending",
    "created_at": "2024-05-01T10:00:00Z",
    "started_at": "0001-01-01T00:00:00Z",
    "ended_at": {"Time": "0001-01-01T00:00:00Z", "Valid": false},
    "log_output": ""
}"#;

#[test]
fn create_project_then_list_it() {
    let fx = serve(|req| match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/v1/api/projects") => json(201, r#"{"id":7,"name":"demo"}"#),
        ("GET", "/v1/api/projects") => json(
            200,
            r#"{"projects":[{"id":7,"name":"demo","repo_url":"https://x/y.git","branch":"main","subdir":""}]}"#,
        ),
        _ => json(404, r#"{"error":"no route"}"#),
    });
    let api = fx.client();
    let created = api
        .create_project(&NewProject {
            name: "demo".into(),
            repo_url: "https://x/y.git".into(),
            branch: "main".into(),
            subdir: None,
        })
        .expect("create project");
    assert_eq!(created.id, 7);

    let projects = api.list_projects().expect("list projects");
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].id, 7);
    assert_eq!(projects[0].subdir, None);

    let seen = fx.seen();
    let sent: serde_json::Value = serde_json::from_str(&seen[0].body).expect("json body");
    assert_eq!(
        sent,
        serde_json::json!({"name": "demo", "repo_url": "https://x/y.git", "branch": "main"})
    );
}

#[test]
fn trigger_build_and_fetch_it() {
    let fx = serve(|req| match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/v1/api/builds/") => json(201, r#"{"build_id":42,"status":"pending"}"#),
        ("GET", "/v1/api/builds/42") => json(200, BUILD_42_PENDING),
        ("GET", "/v1/api/builds/project/7") => json(200, "null"),
        _ => json(404, r#"{"error":"no route"}"#),
    });
    let api = fx.client();
    let created = api
        .create_build(&NewBuild {
            project_id: 7,
            branch: "main".into(),
        })
        .expect("trigger build");
    assert_eq!(created.id, 42);
    assert_eq!(created.status, BuildStatus::Pending);

    let build = api.get_build(42).expect("get build");
    assert!(build.status.is_in_progress());
    assert_eq!(build.started_at, None);
    assert_eq!(build.ended_at, None);
    assert_eq!(build.log_output, None);

    assert!(api.project_builds(7).expect("history").is_empty());
    let sent: serde_json::Value = serde_json::from_str(&fx.seen()[0].body).expect("json body");
    assert_eq!(sent, serde_json::json!({"project_id": 7, "branch": "main"}));
}

#[test]
fn non_2xx_is_a_failure_with_the_server_message() {
    let fx = serve(|req| match req.path.as_str() {
        "/v1/api/agents/9" => json(404, r#"{"error":"Agent not found"}"#),
        _ => Canned {
            status: 500,
            body: b"upstream exploded".to_vec(),
            headers: Vec::new(),
        },
    });
    let api = fx.client();
    let err = api.get_agent(9).expect_err("missing agent");
    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(err.to_string(), "server error (404): Agent not found");

    let err = api.delete_agent(1).expect_err("server failure");
    assert_eq!(err.to_string(), "server error (500)");
}

#[test]
fn agents_filter_and_updates() {
    let fx = serve(|req| match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/v1/api/agents?status=DRAINING") => json(
            200,
            r#"{"agents":[{"id":3,"name":"runner-3","status":"DRAINING","labels":null,
                "created_at":"2024-05-01T10:00:00Z","last_seen_at":"2024-05-01T10:05:00Z"}]}"#,
        ),
        ("GET", "/v1/api/agents") => json(200, r#"{"agents":null}"#),
        ("PUT", "/v1/api/agents/3/status") | ("PUT", "/v1/api/agents/3/labels") => json(
            200,
            r#"{"id":3,"name":"runner-3","status":"ONLINE","labels":{"arch":"arm64"},
                "created_at":"2024-05-01T10:00:00Z"}"#,
        ),
        ("DELETE", "/v1/api/agents/3") => Canned {
            status: 204,
            body: Vec::new(),
            headers: Vec::new(),
        },
        _ => json(404, r#"{"error":"no route"}"#),
    });
    let api = fx.client();

    let draining = api.list_agents(StatusFilter::Draining).expect("filtered list");
    assert_eq!(draining.len(), 1);
    assert_eq!(draining[0].status, AgentStatus::Draining);
    assert!(draining[0].labels.is_empty());
    assert!(api.list_agents(StatusFilter::All).expect("full list").is_empty());

    let agent = api
        .set_agent_status(3, &AgentStatus::Online)
        .expect("set status");
    assert_eq!(agent.status, AgentStatus::Online);
    assert_eq!(agent.last_seen_at, None);

    let labels = BTreeMap::from([("arch".to_string(), "arm64".to_string())]);
    let agent = api.set_agent_labels(3, &labels).expect("set labels");
    assert_eq!(agent.labels, labels);

    api.delete_agent(3).expect("delete");

    let seen = fx.seen();
    let bodies: Vec<serde_json::Value> = seen
        .iter()
        .filter(|s| s.method == "PUT")
        .map(|s| serde_json::from_str(&s.body).expect("json body"))
        .collect();
    assert_eq!(
        bodies,
        vec![
            serde_json::json!({"status": "ONLINE"}),
            serde_json::json!({"labels": {"arch": "arm64"}}),
        ]
    );
}

#[test]
fn artifact_is_streamed_to_disk() {
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let served = payload.clone();
    let fx = serve(move |req| match req.path.as_str() {
        "/v1/api/builds/42/download" => Canned {
            status: 200,
            body: served.clone(),
            headers: vec![
                ("Content-Type", "application/octet-stream".into()),
                (
                    "Content-Disposition",
                    r#"attachment; filename="demo-linux-amd64""#.into(),
                ),
            ],
        },
        "/v1/api/builds/43/download" => Canned {
            status: 200,
            body: b"plain".to_vec(),
            headers: Vec::new(),
        },
        _ => json(404, r#"{"error":"Artifact not found"}"#),
    });
    let api = fx.client();
    let dir = tempfile::tempdir().expect("tempdir");

    let dl = api.download_artifact(42, dir.path()).expect("download");
    assert_eq!(dl.path, dir.path().join("demo-linux-amd64"));
    assert_eq!(dl.bytes, payload.len() as u64);
    assert_eq!(dl.sha256, hex::encode(Sha256::digest(&payload)));
    assert_eq!(fs::read(&dl.path).expect("read artifact"), payload);

    let dl = api.download_artifact(43, dir.path()).expect("download");
    assert_eq!(dl.path, dir.path().join("build-43"));

    let err = api.download_artifact(44, dir.path()).expect_err("missing artifact");
    assert_eq!(err.to_string(), "server error (404): Artifact not found");
    assert!(!dir.path().join("build-44").exists());
}

#[test]
fn empty_prefix_uses_bare_api_paths() {
    let fx = serve(|req| match req.path.as_str() {
        "/api/projects" => json(200, r#"{"projects":[]}"#),
        _ => json(404, r#"{"error":"no route"}"#),
    });
    let api = HttpControlPlane::new(&fx.base, "", Duration::from_secs(5)).expect("client");
    assert!(api.list_projects().expect("list").is_empty());
}

#[test]
fn unreachable_server_is_a_network_error() {
    let port = TcpListener::bind("127.0.0.1:0")
        .expect("bind free port")
        .local_addr()
        .expect("local addr")
        .port();
    let api = HttpControlPlane::new(
        &format!("http://127.0.0.1:{port}"),
        "/v1",
        Duration::from_secs(2),
    )
    .expect("client");
    let err = api.list_projects().expect_err("nothing listening");
    assert_eq!(err.kind(), ErrorKind::Network);
}
