//! Request dispatch.
//!
//! Every inbound call goes through the same steps: route it to an exported
//! interface, decode its arguments, resolve the caller's session and
//! document, run the backend, and check the reply against the method's
//! declared output signature.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::bus::{Call, Reply};
use crate::capabilities::Interface;
use crate::diagnostics::{diagnostics_to_value, SourceLocation};
use crate::error::{Failure, Fault, ProtocolError};
use crate::options::Options;
use crate::server::Server;
use crate::session::Session;
use crate::signature::Signature;

pub const INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Parse,
    Dispose,
    ParseAll,
    Diagnostics,
}

#[derive(Debug, Clone, Copy)]
pub struct Arg {
    pub name: &'static str,
    pub signature: &'static str,
}

const fn arg(name: &'static str, signature: &'static str) -> Arg {
    Arg { name, signature }
}

/// A remote method and its declared argument shapes.
#[derive(Debug)]
pub struct Method {
    pub kind: MethodKind,
    pub interface: Interface,
    pub member: &'static str,
    pub inputs: &'static [Arg],
    pub outputs: &'static [Arg],
}

impl Method {
    pub fn out_signature(&self) -> String {
        self.outputs.iter().map(|a| a.signature).collect()
    }
}

pub static METHODS: &[Method] = &[
    Method {
        kind: MethodKind::Parse,
        interface: Interface::Service,
        member: "Parse",
        inputs: &[
            arg("path", "s"),
            arg("dataPath", "s"),
            arg("cursor", "(xx)"),
            arg("options", "a{sv}"),
        ],
        outputs: &[arg("documentPath", "o")],
    },
    Method {
        kind: MethodKind::Dispose,
        interface: Interface::Service,
        member: "Dispose",
        inputs: &[arg("path", "s")],
        outputs: &[],
    },
    Method {
        kind: MethodKind::ParseAll,
        interface: Interface::Project,
        member: "ParseAll",
        inputs: &[
            arg("path", "s"),
            arg("documents", "a(ss)"),
            arg("cursor", "(xx)"),
            arg("options", "a{sv}"),
        ],
        outputs: &[arg("documents", "a(so)")],
    },
    Method {
        kind: MethodKind::Diagnostics,
        interface: Interface::Diagnostics,
        member: "Diagnostics",
        inputs: &[],
        outputs: &[arg("diagnostics", "a(ua((x(xx)(xx))s)a(x(xx)(xx))s)")],
    },
];

/// Methods declared on `interface`, in table order.
pub fn methods_of(interface: Interface) -> impl Iterator<Item = &'static Method> {
    METHODS.iter().filter(move |m| m.interface == interface)
}

impl Server {
    /// Handle one inbound call.
    ///
    /// # Arguments
    ///
    /// * `call` - The call as delivered by the bus, tagged with its sender.
    ///
    /// # Returns
    ///
    /// The reply body, already checked against the method's output
    /// signature, or the fault to send back instead.
    pub fn dispatch(&mut self, call: Call) -> Reply {
        log::debug!(
            "{} -> {} {}.{}",
            call.sender,
            call.path,
            call.interface,
            call.member
        );

        if call.interface == INTROSPECTABLE {
            return self.introspect(&call);
        }

        let method = self.route(&call).map_err(|e| Fault::protocol(&e))?;
        let Call {
            sender, path, args, ..
        } = &call;

        let body = match method.kind {
            MethodKind::Parse => self.parse(sender, args.clone()),
            MethodKind::Dispose => self.dispose(sender, args.clone()),
            MethodKind::ParseAll => self.parse_all(sender, args.clone()),
            MethodKind::Diagnostics => self.diagnostics(path),
        };

        match body {
            Ok(body) => marshal(self.language(), &call, method, body),
            Err(fault) => {
                log::warn!("Call {}.{} failed: {}", call.interface, call.member, fault);
                Err(fault)
            }
        }
    }

    /// Find the method a call addresses among the interfaces exported at its
    /// path. Interfaces that were not negotiated are never exported, so their
    /// methods cannot be reached.
    fn route(&self, call: &Call) -> Result<&'static Method, ProtocolError> {
        let exported = self.bus.interfaces(&call.path);
        if exported.is_empty() {
            return Err(ProtocolError::UnknownObject(call.path.clone()));
        }

        let interface = Interface::from_name(&call.interface)
            .filter(|i| exported.contains(i))
            .ok_or_else(|| ProtocolError::UnknownInterface {
                path: call.path.clone(),
                interface: call.interface.clone(),
            })?;

        methods_of(interface)
            .find(|m| m.member == call.member)
            .ok_or_else(|| ProtocolError::UnknownMethod {
                interface: call.interface.clone(),
                member: call.member.clone(),
            })
    }

    fn parse(&mut self, sender: &str, args: Vec<Value>) -> Result<Vec<Value>, Fault> {
        let (path, data_path, cursor, options): (String, String, (i64, i64), Map<String, Value>) =
            decode("Parse", args)?;
        require_path(&path)?;

        let canonical = self
            .registry
            .ensure_document(self.bus.as_mut(), sender, &path, &data_path, cursor.into())
            .map_err(|e| Fault::transport(&e))?;

        let language = self.language();
        self.session_mut(sender)?
            .parse(&canonical, &Options::from(options))
            .map_err(|e| Fault::handler(language, e))?;

        let remote = self.remote_path(sender, &canonical)?;
        Ok(vec![Value::String(remote)])
    }

    fn dispose(&mut self, sender: &str, args: Vec<Value>) -> Result<Vec<Value>, Fault> {
        let (path,): (String,) = decode("Dispose", args)?;
        self.registry
            .dispose_document(self.bus.as_mut(), sender, &path);
        Ok(Vec::new())
    }

    fn parse_all(&mut self, sender: &str, args: Vec<Value>) -> Result<Vec<Value>, Fault> {
        let (path, documents, cursor, options): (
            String,
            Vec<(String, String)>,
            (i64, i64),
            Map<String, Value>,
        ) = decode("ParseAll", args)?;
        require_path(&path)?;
        for (member, _) in &documents {
            require_path(member)?;
        }

        let root = self
            .registry
            .ensure_document(self.bus.as_mut(), sender, &path, "", cursor.into())
            .map_err(|e| Fault::transport(&e))?;

        let mut members = Vec::with_capacity(documents.len());
        for (client_path, data_path) in &documents {
            let canonical = self
                .registry
                .ensure_document(
                    self.bus.as_mut(),
                    sender,
                    client_path,
                    data_path,
                    SourceLocation::default(),
                )
                .map_err(|e| Fault::transport(&e))?;
            members.push((canonical, client_path.as_str()));
        }

        let member_paths: Vec<PathBuf> = members.iter().map(|(p, _)| p.clone()).collect();
        let language = self.language();
        let parsed = self
            .session_mut(sender)?
            .parse_project(&root, &member_paths, &Options::from(options))
            .map_err(|e| Fault::handler(language, e))?;

        let mut reply = Vec::with_capacity(parsed.len());
        for canonical in parsed {
            let Some(doc) = self
                .registry
                .session(sender)
                .and_then(|s| s.document(&canonical))
            else {
                return Err(Fault::handler(
                    language,
                    Failure::new(
                        "UnknownDocument",
                        format!("backend reported {} which is not open", canonical.display()),
                    ),
                ));
            };

            // Answer with the spelling the client used in this call.
            let client_path = members
                .iter()
                .find(|(p, _)| *p == canonical)
                .map_or(doc.client_path.as_str(), |(_, spelling)| *spelling);
            reply.push(Value::Array(vec![
                Value::String(client_path.to_string()),
                Value::String(doc.remote_path.clone()),
            ]));
        }

        Ok(vec![Value::Array(reply)])
    }

    fn diagnostics(&self, path: &str) -> Result<Vec<Value>, Fault> {
        if path == self.registry.layout().placeholder_path() {
            return Ok(vec![Value::Array(Vec::new())]);
        }

        let doc = self
            .registry
            .find_remote(path)
            .ok_or_else(|| Fault::protocol(&ProtocolError::UnknownObject(path.to_string())))?;
        Ok(vec![diagnostics_to_value(&doc.diagnostics)])
    }

    fn introspect(&self, call: &Call) -> Reply {
        if call.member != "Introspect" {
            return Err(Fault::protocol(&ProtocolError::UnknownMethod {
                interface: call.interface.clone(),
                member: call.member.clone(),
            }));
        }

        let interfaces = self.bus.interfaces(&call.path);
        if interfaces.is_empty() {
            return Err(Fault::protocol(&ProtocolError::UnknownObject(
                call.path.clone(),
            )));
        }
        Ok(vec![Value::String(introspection_xml(&interfaces))])
    }

    fn session_mut(&mut self, sender: &str) -> Result<&mut Session, Fault> {
        self.registry
            .session_mut(sender)
            .ok_or_else(|| Fault::new("org.freedesktop.DBus.Error.Failed", "session vanished"))
    }

    fn remote_path(&self, sender: &str, canonical: &Path) -> Result<String, Fault> {
        self.registry
            .session(sender)
            .and_then(|s| s.document(canonical))
            .map(|doc| doc.remote_path.clone())
            .ok_or_else(|| {
                Fault::protocol(&ProtocolError::UnknownObject(
                    canonical.display().to_string(),
                ))
            })
    }
}

fn decode<T: DeserializeOwned>(member: &'static str, args: Vec<Value>) -> Result<T, Fault> {
    serde_json::from_value(Value::Array(args))
        .map_err(|source| Fault::protocol(&ProtocolError::InvalidArgs { member, source }))
}

fn require_path(path: &str) -> Result<(), Fault> {
    if path.is_empty() {
        Err(Fault::protocol(&ProtocolError::EmptyPath))
    } else {
        Ok(())
    }
}

/// Check a reply body against `method`'s output signature.
///
/// # Arguments
///
/// * `language` - Language of the service, used to name the fault.
/// * `call` - The call being answered; named in the fault message.
/// * `method` - The method the call was routed to.
/// * `body` - The reply values produced by the handler.
///
/// # Returns
///
/// `body` unchanged when it fits, otherwise a `ValueError` fault.
pub fn marshal(language: &str, call: &Call, method: &Method, body: Vec<Value>) -> Reply {
    let signature = method.out_signature();
    let checked = Signature::parse(&signature).and_then(|sig| sig.check(&body));

    match checked {
        Ok(()) => Ok(body),
        Err(err) => {
            let context = format!(
                "{}({}.{}) -> {}",
                call.path, call.interface, call.member, signature
            );
            log::warn!("Cannot encode reply of {}: {}", context, err);
            Err(Fault::marshal(language, &context, &err))
        }
    }
}

/// Describe the given interfaces in D-Bus introspection XML.
///
/// Interfaces without methods are listed as empty elements.
pub fn introspection_xml(interfaces: &[Interface]) -> String {
    let mut xml = String::from("<node>\n");
    for interface in interfaces {
        let mut methods = methods_of(*interface).peekable();
        if methods.peek().is_none() {
            xml.push_str(&format!("  <interface name=\"{}\"/>\n", interface.name()));
            continue;
        }

        xml.push_str(&format!("  <interface name=\"{}\">\n", interface.name()));
        for method in methods {
            xml.push_str(&format!("    <method name=\"{}\">\n", method.member));
            let args = method
                .inputs
                .iter()
                .map(|a| ("in", a))
                .chain(method.outputs.iter().map(|a| ("out", a)));
            for (direction, arg) in args {
                xml.push_str(&format!(
                    "      <arg direction=\"{}\" type=\"{}\" name=\"{}\"/>\n",
                    direction, arg.signature, arg.name
                ));
            }
            xml.push_str("    </method>\n");
        }
        xml.push_str("  </interface>\n");
    }
    xml.push_str("</node>\n");
    xml
}
