//! Integration tests for the code assistance service.
//!
//! These drive the server through its call interface the way the socket
//! transport does, plus one end-to-end run over a real socket.

use std::cell::Cell;
use std::path::Path;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use codeassist::backend::{Backend, BackendDescriptor};
use codeassist::bus::{Bus, Call, ObjectTable, Reply};
use codeassist::capabilities::{Capability, Interface};
use codeassist::dispatch::INTROSPECTABLE;
use codeassist::document::Document;
use codeassist::error::{Fault, HandlerError};
use codeassist::languages::{css, json};
use codeassist::options::Options;
use codeassist::reaper::NameOwnerChanged;
use codeassist::server::{Server, ServerConfig};
use codeassist::transport::Transport;

const SERVICE: &str = "org.gnome.CodeAssist.v1.Service";
const PROJECT: &str = "org.gnome.CodeAssist.v1.Project";
const DIAGNOSTICS: &str = "org.gnome.CodeAssist.v1.Diagnostics";

thread_local! {
    static DISPOSED: Cell<usize> = const { Cell::new(0) };
}

fn disposed() -> usize {
    DISPOSED.with(Cell::get)
}

/// Accepts everything and counts disposals.
struct Counting;

impl Backend for Counting {
    fn parse(&mut self, _doc: &mut Document, _options: &Options) -> Result<(), HandlerError> {
        Ok(())
    }

    fn dispose(&mut self, _doc: &Document) {
        DISPOSED.with(|d| d.set(d.get() + 1));
    }
}

fn counting() -> Box<dyn Backend> {
    Box::new(Counting)
}

static COUNTING: BackendDescriptor = BackendDescriptor {
    language: "counting",
    capabilities: &[Capability::Diagnostics],
    create: counting,
};

static BARE: BackendDescriptor = BackendDescriptor {
    language: "bare",
    capabilities: &[],
    create: counting,
};

static PROJECT_ONLY: BackendDescriptor = BackendDescriptor {
    language: "projectonly",
    capabilities: &[Capability::Project],
    create: counting,
};

struct Failing;

impl Backend for Failing {
    fn parse(&mut self, _doc: &mut Document, _options: &Options) -> Result<(), HandlerError> {
        Err(HandlerError::failed("Unreadable", "cannot read the buffer"))
    }
}

fn failing() -> Box<dyn Backend> {
    Box::new(Failing)
}

static FAILING: BackendDescriptor = BackendDescriptor {
    language: "failing",
    capabilities: &[Capability::Diagnostics],
    create: failing,
};

struct Panicking;

impl Backend for Panicking {
    fn parse(&mut self, _doc: &mut Document, _options: &Options) -> Result<(), HandlerError> {
        panic!("backend exploded");
    }
}

fn panicking() -> Box<dyn Backend> {
    Box::new(Panicking)
}

static PANICKING: BackendDescriptor = BackendDescriptor {
    language: "panicking",
    capabilities: &[Capability::Diagnostics],
    create: panicking,
};

fn server(descriptor: &'static BackendDescriptor, base: &Path) -> Server {
    DISPOSED.with(|d| d.set(0));
    Server::new(descriptor, Box::new(ObjectTable::new()), ServerConfig::new(base)).unwrap()
}

fn parse_with(server: &mut Server, sender: &str, path: &str, options: Value) -> Reply {
    let service = server.service_path();
    server.dispatch(Call::new(
        sender,
        service,
        SERVICE,
        "Parse",
        vec![json!(path), json!(""), json!([0, 0]), options],
    ))
}

fn parse(server: &mut Server, sender: &str, path: &str) -> Reply {
    parse_with(server, sender, path, json!({}))
}

fn dispose(server: &mut Server, sender: &str, path: &str) -> Reply {
    let service = server.service_path();
    server.dispatch(Call::new(sender, service, SERVICE, "Dispose", vec![json!(path)]))
}

fn identity(reply: Reply) -> String {
    let body = reply.unwrap();
    assert_eq!(body.len(), 1);
    body[0].as_str().unwrap().to_string()
}

fn diagnostics(server: &mut Server, remote: &str) -> Vec<Value> {
    let body = server
        .dispatch(Call::new(":1.1", remote, DIAGNOSTICS, "Diagnostics", vec![]))
        .unwrap();
    body[0].as_array().unwrap().clone()
}

fn fault(reply: Reply) -> Fault {
    reply.unwrap_err()
}

// Lifecycle

#[test]
fn test_syntax_error_then_fix_keeps_identity() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("x.css");
    std::fs::write(&file, "a {\n  color: red;\n").unwrap();
    let path = file.to_str().unwrap();

    let mut server = server(&css::DESCRIPTOR, dir.path());
    let first = identity(parse(&mut server, ":1.1", path));

    let found = diagnostics(&mut server, &first);
    assert_eq!(found.len(), 1);
    let diag = found[0].as_array().unwrap();
    assert_eq!(diag[0], json!(4));
    assert_eq!(diag[2].as_array().unwrap().len(), 1);
    assert!(!diag[3].as_str().unwrap().is_empty());

    std::fs::write(&file, "a {\n  color: red;\n}\n").unwrap();
    let second = identity(parse(&mut server, ":1.1", path));

    assert_eq!(first, second);
    assert!(diagnostics(&mut server, &second).is_empty());
}

#[test]
fn test_fixtures_parse_as_expected() {
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let mut server = server(&css::DESCRIPTOR, &fixtures);

    let valid = identity(parse(&mut server, ":1.1", "valid.css"));
    assert!(diagnostics(&mut server, &valid).is_empty());

    let invalid = identity(parse(&mut server, ":1.1", "invalid_syntax.css"));
    let found = diagnostics(&mut server, &invalid);
    assert_eq!(found.len(), 1, "got {found:?}");
    assert_eq!(found[0][0], json!(4));
}

#[test]
fn test_parse_is_idempotent() {
    let mut server = server(&COUNTING, Path::new("/work"));

    let first = identity(parse(&mut server, ":1.1", "a.txt"));
    let second = identity(parse(&mut server, ":1.1", "a.txt"));

    assert_eq!(first, second);
    let session = server.registry().session(":1.1").unwrap();
    assert_eq!(session.documents().len(), 1);
}

#[test]
fn test_path_spellings_share_a_document() {
    let mut server = server(&COUNTING, Path::new("/work"));

    let a = identity(parse(&mut server, ":1.1", "./a/../a/x.css"));
    let b = identity(parse(&mut server, ":1.1", "a/x.css"));
    let c = identity(parse(&mut server, ":1.1", "/work/a/x.css"));

    assert_eq!(a, b);
    assert_eq!(b, c);
}

#[test]
fn test_sessions_are_isolated_per_caller() {
    let mut server = server(&COUNTING, Path::new("/work"));

    let a = identity(parse(&mut server, ":1.1", "x.css"));
    let b = identity(parse(&mut server, ":1.2", "x.css"));

    assert_ne!(a, b);
    assert_eq!(server.registry().len(), 2);
}

#[test]
fn test_diagnostics_are_replaced_not_appended() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.json"), "{\"a\": }").unwrap();

    let mut server = server(&json::DESCRIPTOR, dir.path());
    let remote = identity(parse(&mut server, ":1.1", "broken.json"));
    assert_eq!(diagnostics(&mut server, &remote).len(), 1);

    identity(parse(&mut server, ":1.1", "broken.json"));
    assert_eq!(diagnostics(&mut server, &remote).len(), 1);
}

#[test]
fn test_dispose_is_idempotent_and_cascades() {
    let mut server = server(&COUNTING, Path::new("/work"));
    let a = identity(parse(&mut server, ":1.1", "a.css"));
    let b = identity(parse(&mut server, ":1.1", "b.css"));
    assert!(a.starts_with("/org/gnome/CodeAssist/v1/counting/0/documents/"));

    assert_eq!(dispose(&mut server, ":1.1", "a.css"), Ok(vec![]));
    assert_eq!(dispose(&mut server, ":1.1", "./a.css"), Ok(vec![]));
    assert_eq!(disposed(), 1);
    assert!(server.bus().interfaces(&a).is_empty());
    assert!(!server.bus().interfaces(&b).is_empty());
    assert!(server.registry().contains(":1.1"));

    dispose(&mut server, ":1.1", "b.css").unwrap();
    assert_eq!(disposed(), 2);
    assert!(!server.registry().contains(":1.1"));

    // A returning caller gets a fresh session.
    let again = identity(parse(&mut server, ":1.1", "a.css"));
    assert!(again.starts_with("/org/gnome/CodeAssist/v1/counting/1/documents/"));
}

#[test]
fn test_dispose_from_unknown_caller_is_a_no_op() {
    let mut server = server(&COUNTING, Path::new("/work"));
    identity(parse(&mut server, ":1.1", "a.css"));

    assert_eq!(dispose(&mut server, ":1.5", "a.css"), Ok(vec![]));
    assert!(!server.registry().contains(":1.5"));
    assert_eq!(server.registry().len(), 1);
    assert_eq!(disposed(), 0);
}

#[test]
fn test_owner_loss_disposes_every_document_once() {
    let mut server = server(&COUNTING, Path::new("/work"));
    let remotes: Vec<String> = ["a.css", "b.css", "c.css"]
        .iter()
        .map(|p| identity(parse(&mut server, ":1.3", p)))
        .collect();
    identity(parse(&mut server, ":1.4", "a.css"));

    assert!(server.owner_changed(&NameOwnerChanged::vanished(":1.3")));
    assert_eq!(disposed(), 3);
    for remote in &remotes {
        assert!(server.bus().interfaces(remote).is_empty());
    }
    assert!(server.registry().contains(":1.4"));

    assert!(!server.owner_changed(&NameOwnerChanged::vanished(":1.3")));
    assert_eq!(disposed(), 3);
}

#[test]
fn test_owner_loss_without_documents_is_harmless() {
    let mut server = server(&COUNTING, Path::new("/work"));
    assert!(!server.owner_changed(&NameOwnerChanged::vanished(":1.8")));
    assert!(server.registry().is_empty());
}

#[test]
fn test_empty_hook_fires_when_last_client_leaves() {
    let mut server = server(&COUNTING, Path::new("/work"));
    let fired = std::rc::Rc::new(Cell::new(0));
    let counter = fired.clone();
    server.on_empty(move || counter.set(counter.get() + 1));

    identity(parse(&mut server, ":1.1", "a.css"));
    identity(parse(&mut server, ":1.2", "a.css"));
    server.owner_changed(&NameOwnerChanged::vanished(":1.1"));
    assert_eq!(fired.get(), 0);

    dispose(&mut server, ":1.2", "a.css").unwrap();
    assert_eq!(fired.get(), 1);
}

// Capabilities

#[test]
fn test_document_interfaces_follow_capabilities() {
    let mut server = server(&BARE, Path::new("/work"));
    let remote = identity(parse(&mut server, ":1.1", "a.txt"));

    assert_eq!(server.bus().interfaces(&remote), vec![Interface::Document]);
    let err = fault(server.dispatch(Call::new(
        ":1.1",
        remote.as_str(),
        DIAGNOSTICS,
        "Diagnostics",
        vec![],
    )));
    assert_eq!(err.name, "org.freedesktop.DBus.Error.UnknownInterface");

    let xml = server
        .dispatch(Call::new(":1.1", remote.as_str(), INTROSPECTABLE, "Introspect", vec![]))
        .unwrap();
    let xml = xml[0].as_str().unwrap();
    assert!(xml.contains("org.gnome.CodeAssist.v1.Document"));
    assert!(!xml.contains(DIAGNOSTICS));
}

#[test]
fn test_project_requires_diagnostics() {
    let mut server = server(&PROJECT_ONLY, Path::new("/work"));
    let service = server.service_path();

    assert_eq!(server.bus().interfaces(&service), vec![Interface::Service]);
    let err = fault(server.dispatch(Call::new(
        ":1.1",
        service.as_str(),
        PROJECT,
        "ParseAll",
        vec![json!("a"), json!([]), json!([0, 0]), json!({})],
    )));
    assert_eq!(err.name, "org.freedesktop.DBus.Error.UnknownInterface");
    assert!(server.registry().is_empty());
}

#[test]
fn test_placeholder_document_is_introspectable() {
    let mut server = server(&css::DESCRIPTOR, Path::new("/work"));
    let placeholder = format!("{}/document", server.service_path());

    assert!(diagnostics(&mut server, &placeholder).is_empty());
    let xml = server
        .dispatch(Call::new(":1.1", placeholder.as_str(), INTROSPECTABLE, "Introspect", vec![]))
        .unwrap();
    assert!(xml[0].as_str().unwrap().contains("<method name=\"Diagnostics\">"));
    assert!(server.registry().is_empty());
}

#[test]
fn test_unknown_objects_and_methods() {
    let mut server = server(&css::DESCRIPTOR, Path::new("/work"));
    let service = server.service_path();

    let err = fault(server.dispatch(Call::new(
        ":1.1",
        "/org/gnome/CodeAssist/v1/css/9/documents/9",
        DIAGNOSTICS,
        "Diagnostics",
        vec![],
    )));
    assert_eq!(err.name, "org.freedesktop.DBus.Error.UnknownObject");

    let err = fault(server.dispatch(Call::new(":1.1", service.as_str(), SERVICE, "Reformat", vec![])));
    assert_eq!(err.name, "org.freedesktop.DBus.Error.UnknownMethod");
}

// Faults

#[test]
fn test_handler_failures_are_namespaced() {
    let mut server = server(&FAILING, Path::new("/work"));
    let err = fault(parse(&mut server, ":1.1", "a.txt"));

    assert_eq!(err.name, "org.gnome.CodeAssist.v1.failing.Error.Unreadable");
    assert_eq!(err.message, "cannot read the buffer");
    assert!(err.location.is_some());

    // The document stays open with no diagnostics.
    let session = server.registry().session(":1.1").unwrap();
    let doc = session.documents().iter().next().unwrap();
    assert!(doc.diagnostics.is_empty());
}

#[test]
fn test_backend_panic_becomes_a_fault() {
    let mut server = server(&PANICKING, Path::new("/work"));

    let err = fault(parse(&mut server, ":1.1", "a.txt"));
    assert_eq!(err.name, "org.gnome.CodeAssist.v1.panicking.Error.Panic");
    assert!(err.message.contains("backend exploded"));

    // The service keeps going.
    assert_eq!(dispose(&mut server, ":1.1", "a.txt"), Ok(vec![]));
    assert!(server.registry().is_empty());
}

#[test]
fn test_missing_file_fault_is_named_after_the_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(&css::DESCRIPTOR, dir.path());

    let err = fault(parse(&mut server, ":1.1", "missing.css"));
    assert_eq!(err.name, "org.gnome.CodeAssist.v1.css.Error.NotFound");
}

#[test]
fn test_invalid_options_fail_the_call() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.json"), "// comment\n{}").unwrap();
    let mut server = server(&json::DESCRIPTOR, dir.path());

    let err = fault(parse_with(&mut server, ":1.1", "a.json", json!({"bogus": true})));
    assert_eq!(err.name, "org.gnome.CodeAssist.v1.json.Error.InvalidOptions");

    let remote = identity(parse_with(
        &mut server,
        ":1.1",
        "a.json",
        json!({"allowComments": true}),
    ));
    assert!(diagnostics(&mut server, &remote).is_empty());
}

#[test]
fn test_malformed_arguments_touch_no_state() {
    let mut server = server(&COUNTING, Path::new("/work"));
    let service = server.service_path();

    let err = fault(server.dispatch(Call::new(
        ":1.1",
        service.as_str(),
        SERVICE,
        "Parse",
        vec![json!(1)],
    )));
    assert_eq!(err.name, "org.freedesktop.DBus.Error.InvalidArgs");

    let err = fault(parse(&mut server, ":1.1", ""));
    assert_eq!(err.name, "org.freedesktop.DBus.Error.InvalidArgs");

    assert!(server.registry().is_empty());
}

// Project mode

#[test]
fn test_parse_all_reports_members_under_the_root() {
    let dir = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("theme")).unwrap();
    std::fs::write(dir.path().join("main.css"), "body { margin: 0 }\n.unused {}\n").unwrap();
    std::fs::write(dir.path().join("theme/dark.css"), "a { color: #000\n").unwrap();
    std::fs::write(outside.path().join("other.css"), "a {}").unwrap();

    let mut server = server(&css::DESCRIPTOR, dir.path());
    let service = server.service_path();
    let other = outside.path().join("other.css");
    let reply = server
        .dispatch(Call::new(
            ":1.1",
            service.as_str(),
            PROJECT,
            "ParseAll",
            vec![
                json!("main.css"),
                json!([["theme/dark.css", ""], [other.to_str().unwrap(), ""]]),
                json!([0, 0]),
                json!({}),
            ],
        ))
        .unwrap();

    let parsed = reply[0].as_array().unwrap();
    let clients: Vec<&str> = parsed.iter().map(|p| p[0].as_str().unwrap()).collect();
    assert_eq!(clients, vec!["main.css", "theme/dark.css"]);

    let main = parsed[0][1].as_str().unwrap().to_string();
    let dark = parsed[1][1].as_str().unwrap().to_string();
    let main_diagnostics = diagnostics(&mut server, &main);
    assert_eq!(main_diagnostics.len(), 1);
    assert_eq!(main_diagnostics[0][0], json!(2));
    assert_eq!(main_diagnostics[0][1].as_array().unwrap().len(), 1);

    let dark_diagnostics = diagnostics(&mut server, &dark);
    assert_eq!(dark_diagnostics.len(), 1);
    assert_eq!(dark_diagnostics[0][0], json!(4));

    // Every member is an open document, reported or not.
    assert_eq!(server.registry().session(":1.1").unwrap().documents().len(), 3);
}

#[test]
fn test_unreadable_member_does_not_abort_the_project() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.css"), "body { margin: 0 }\n").unwrap();
    std::fs::write(dir.path().join("b.css"), "a {\n").unwrap();

    let mut server = server(&css::DESCRIPTOR, dir.path());
    let service = server.service_path();
    let reply = server
        .dispatch(Call::new(
            ":1.1",
            service.as_str(),
            PROJECT,
            "ParseAll",
            vec![
                json!("main.css"),
                json!([["gone.css", ""], ["b.css", ""]]),
                json!([0, 0]),
                json!({}),
            ],
        ))
        .unwrap();

    let parsed = reply[0].as_array().unwrap();
    let clients: Vec<&str> = parsed.iter().map(|p| p[0].as_str().unwrap()).collect();
    assert_eq!(clients, vec!["main.css", "gone.css", "b.css"]);

    let gone = parsed[1][1].as_str().unwrap().to_string();
    let gone_diagnostics = diagnostics(&mut server, &gone);
    assert_eq!(gone_diagnostics.len(), 1);
    assert_eq!(gone_diagnostics[0][0], json!(4));

    let b = parsed[2][1].as_str().unwrap().to_string();
    assert_eq!(diagnostics(&mut server, &b)[0][0], json!(4));
}

#[test]
fn test_unreadable_project_root_fails_the_call() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(&css::DESCRIPTOR, dir.path());
    let service = server.service_path();

    let err = fault(server.dispatch(Call::new(
        ":1.1",
        service.as_str(),
        PROJECT,
        "ParseAll",
        vec![json!("main.css"), json!([]), json!([0, 0]), json!({})],
    )));
    assert_eq!(err.name, "org.gnome.CodeAssist.v1.css.Error.NotFound");
}

// Socket transport

async fn request(
    lines: &mut tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
    write: &mut tokio::net::unix::OwnedWriteHalf,
    id: u64,
    method: &str,
    params: Value,
) -> Value {
    let message = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
    let mut out = serde_json::to_vec(&message).unwrap();
    out.push(b'\n');
    write.write_all(&out).await.unwrap();

    let line = lines.next_line().await.unwrap().unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn test_socket_round_trip_and_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x.css"), "a {").unwrap();
    let socket = dir.path().join("css.sock");

    let mut server = server(&css::DESCRIPTOR, dir.path());
    let (quit_tx, mut quit_rx) = tokio::sync::watch::channel(false);
    server.on_empty(move || {
        let _ = quit_tx.send(true);
    });

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = Transport::bind(&socket, events_tx).unwrap();

    let client = async {
        let stream = UnixStream::connect(&socket).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let hello = request(&mut lines, &mut write, 1, "org.freedesktop.DBus.Hello", json!(null)).await;
        assert_eq!(hello["result"], json!(":1.1"));

        let parsed = request(
            &mut lines,
            &mut write,
            2,
            "org.gnome.CodeAssist.v1.Service.Parse",
            json!({"path": "/org/gnome/CodeAssist/v1/css", "args": ["x.css", "", [0, 0], {}]}),
        )
        .await;
        let remote = parsed["result"][0].as_str().unwrap().to_string();

        let found = request(
            &mut lines,
            &mut write,
            3,
            "org.gnome.CodeAssist.v1.Diagnostics.Diagnostics",
            json!({"path": remote}),
        )
        .await;
        assert_eq!(found["result"][0].as_array().unwrap().len(), 1);

        let missing = request(
            &mut lines,
            &mut write,
            4,
            "org.gnome.CodeAssist.v1.Service.Reformat",
            json!({"path": "/org/gnome/CodeAssist/v1/css"}),
        )
        .await;
        assert_eq!(missing["error"]["code"], json!(-32601));
        assert_eq!(
            missing["error"]["data"]["name"],
            json!("org.freedesktop.DBus.Error.UnknownMethod")
        );

        // Hanging up releases the session.
        drop(write);
        drop(lines);
        quit_rx.wait_for(|quit| *quit).await.unwrap();
    };

    tokio::select! {
        _ = server.run(events_rx) => panic!("event stream ended early"),
        _ = client => {}
    }

    assert!(server.registry().is_empty());
    transport.close().await;
    assert!(!socket.exists());
}
