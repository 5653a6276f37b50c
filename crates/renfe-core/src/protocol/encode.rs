//! Request batch encoding
//!
//! A batch is a newline-separated list of `key=value` lines. Each call `n`
//! contributes `c{n}-scriptName`, `c{n}-methodName`, `c{n}-id`, one
//! `c{n}-e{k}` line per nested element and one `c{n}-param{i}` line per
//! parameter. The upstream server is strict about line order, which
//! differs between `__System` calls and ordinary plain calls.

use std::fmt::Write as _;

/// Page the remote calls are issued from
pub const ENLACES_PAGE: &str = "/vol/buscarTrenEnlaces.do";

/// Typed call parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Str(String),
    Number(f64),
    Bool(bool),
    Null,
    /// Reference to an element declared earlier in the same call
    Reference(String),
    Array(Vec<Param>),
    /// Members in declaration order
    Object(Vec<(String, Param)>),
}

impl Param {
    pub fn str(value: impl Into<String>) -> Self {
        Param::Str(value.into())
    }
}

/// One remote method invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub script: String,
    pub method: String,
    pub params: Vec<Param>,
}

impl RemoteCall {
    pub fn new(script: impl Into<String>, method: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            script: script.into(),
            method: method.into(),
            params,
        }
    }
}

/// Line layout of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// `__System` calls: `windowName` is the last line
    System,
    /// Ordinary calls: `windowName` follows `callCount`
    Plain,
}

/// A request body carrying one or more remote calls
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub kind: BatchKind,
    pub batch_id: u32,
    /// Page path, percent-encoded on output
    pub page: String,
    pub script_session_id: String,
    pub calls: Vec<RemoteCall>,
}

impl Batch {
    /// Render the batch body
    pub fn encode(&self) -> String {
        let mut out = String::new();
        line(&mut out, "callCount", &self.calls.len().to_string());
        if self.kind == BatchKind::Plain {
            line(&mut out, "windowName", "");
        }
        for (n, call) in self.calls.iter().enumerate() {
            encode_call(&mut out, n, call);
        }
        line(&mut out, "batchId", &self.batch_id.to_string());
        line(&mut out, "instanceId", "0");
        line(&mut out, "page", &urlencoding::encode(&self.page));
        line(&mut out, "scriptSessionId", &self.script_session_id);
        if self.kind == BatchKind::System {
            line(&mut out, "windowName", "");
        }
        out
    }
}

fn line(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "{}={}", key, value);
}

fn encode_call(out: &mut String, n: usize, call: &RemoteCall) {
    line(out, &format!("c{}-scriptName", n), &call.script);
    line(out, &format!("c{}-methodName", n), &call.method);
    line(out, &format!("c{}-id", n), &n.to_string());

    let mut elements = ElementWriter {
        call: n,
        next: 1,
        lines: String::new(),
    };
    let params: Vec<String> = call
        .params
        .iter()
        .map(|p| elements.outer(p))
        .collect();
    out.push_str(&elements.lines);
    for (i, encoded) in params.iter().enumerate() {
        line(out, &format!("c{}-param{}", n, i), encoded);
    }
}

/// Flattens nested parameters into numbered element lines
struct ElementWriter {
    call: usize,
    next: usize,
    lines: String,
}

impl ElementWriter {
    /// Encode a top-level parameter value
    fn outer(&mut self, param: &Param) -> String {
        match param {
            Param::Array(items) => {
                let refs: Vec<String> = items.iter().map(|item| self.element(item)).collect();
                format!("array:[{}]", refs.join(","))
            }
            Param::Object(members) => {
                let refs: Vec<String> = members
                    .iter()
                    .map(|(key, value)| format!("{}:{}", key, self.element(value)))
                    .collect();
                format!("Object_Object:{{{}}}", refs.join(", "))
            }
            scalar => scalar_value(scalar),
        }
    }

    /// Declare `param` as an element line and return a reference to it
    fn element(&mut self, param: &Param) -> String {
        if let Param::Reference(name) = param {
            return format!("reference:{}", name);
        }
        let value = self.outer(param);
        let name = format!("c{}-e{}", self.call, self.next);
        self.next += 1;
        line(&mut self.lines, &name, &value);
        format!("reference:{}", name)
    }
}

fn scalar_value(param: &Param) -> String {
    match param {
        Param::Str(s) => format!("string:{}", urlencoding::encode(s)),
        Param::Number(n) => format!("number:{}", n),
        Param::Bool(b) => format!("boolean:{}", b),
        Param::Null => "null:null".to_string(),
        Param::Reference(name) => format!("reference:{}", name),
        Param::Array(_) | Param::Object(_) => unreachable!("handled by ElementWriter::outer"),
    }
}

fn enlaces_page(search_id: Option<&str>) -> String {
    match search_id {
        Some(id) => format!("{}?c={}", ENLACES_PAGE, id),
        None => ENLACES_PAGE.to_string(),
    }
}

/// `__System.generateId`, optionally scoped to a search id
pub fn generate_id(batch_id: u32, search_id: Option<&str>) -> Batch {
    Batch {
        kind: BatchKind::System,
        batch_id,
        page: enlaces_page(search_id),
        script_session_id: String::new(),
        calls: vec![RemoteCall::new("__System", "generateId", Vec::new())],
    }
}

/// `buyEnlacesManager.actualizaObjetosSesion`, registering the search id
pub fn update_session_objects(batch_id: u32, search_id: &str, script_session_id: &str) -> Batch {
    Batch {
        kind: BatchKind::Plain,
        batch_id,
        page: enlaces_page(Some(search_id)),
        script_session_id: script_session_id.to_string(),
        calls: vec![RemoteCall::new(
            "buyEnlacesManager",
            "actualizaObjetosSesion",
            vec![Param::Array(vec![Param::str(search_id), Param::str("")])],
        )],
    }
}

/// `trainEnlacesManager.getTrainsList` for a one-way trip.
///
/// `departure` is formatted `DD/MM/YYYY`.
pub fn trains_list(batch_id: u32, search_id: &str, script_session_id: &str, departure: &str) -> Batch {
    let criteria = vec![
        ("atendo", Param::str("false")),
        ("sinEnlace", Param::str("false")),
        ("plazaH", Param::str("false")),
        ("tipoFranjaI", Param::str("")),
        ("tipoFranjaV", Param::str("")),
        ("horaFranjaIda", Param::str("")),
        ("horaFranjaVuelta", Param::str("")),
        ("fechaSalida", Param::str(departure)),
        ("fechaVuelta", Param::str("")),
        ("adultos", Param::str("1")),
        ("ninos", Param::str("0")),
        ("ninosMenores", Param::str("0")),
        ("trayecto", Param::str("I")),
        ("idaVuelta", Param::str("")),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    Batch {
        kind: BatchKind::Plain,
        batch_id,
        page: enlaces_page(Some(search_id)),
        script_session_id: script_session_id.to_string(),
        calls: vec![RemoteCall::new(
            "trainEnlacesManager",
            "getTrainsList",
            vec![Param::Object(criteria)],
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_without_search() {
        let body = generate_id(0, None).encode();
        assert_eq!(
            body,
            "callCount=1\n\
             c0-scriptName=__System\n\
             c0-methodName=generateId\n\
             c0-id=0\n\
             batchId=0\n\
             instanceId=0\n\
             page=%2Fvol%2FbuscarTrenEnlaces.do\n\
             scriptSessionId=\n\
             windowName=\n"
        );
    }

    #[test]
    fn test_generate_id_with_search() {
        let body = generate_id(1, Some("_Ab3x")).encode();
        assert!(body.contains("batchId=1\n"));
        assert!(body.contains("page=%2Fvol%2FbuscarTrenEnlaces.do%3Fc%3D_Ab3x\n"));
        assert!(body.ends_with("scriptSessionId=\nwindowName=\n"));
    }

    #[test]
    fn test_update_session_objects() {
        let body = update_session_objects(2, "_Ab3x", "TOKEN/abc-def").encode();
        assert_eq!(
            body,
            "callCount=1\n\
             windowName=\n\
             c0-scriptName=buyEnlacesManager\n\
             c0-methodName=actualizaObjetosSesion\n\
             c0-id=0\n\
             c0-e1=string:_Ab3x\n\
             c0-e2=string:\n\
             c0-param0=array:[reference:c0-e1,reference:c0-e2]\n\
             batchId=2\n\
             instanceId=0\n\
             page=%2Fvol%2FbuscarTrenEnlaces.do%3Fc%3D_Ab3x\n\
             scriptSessionId=TOKEN/abc-def\n"
        );
    }

    #[test]
    fn test_trains_list_object_param() {
        let body = trains_list(3, "_Ab3x", "TOKEN/abc-def", "01/12/2025").encode();
        assert!(body.contains("c0-e8=string:01%2F12%2F2025\n"));
        assert!(body.contains("c0-e13=string:I\n"));
        assert!(body.contains(
            "c0-param0=Object_Object:{atendo:reference:c0-e1, sinEnlace:reference:c0-e2, "
        ));
        assert!(body.contains("idaVuelta:reference:c0-e14}\n"));
        assert!(!body.contains("c0-e15"));
    }

    #[test]
    fn test_scalar_params() {
        let batch = Batch {
            kind: BatchKind::Plain,
            batch_id: 0,
            page: "/p".to_string(),
            script_session_id: "s".to_string(),
            calls: vec![RemoteCall::new(
                "m",
                "f",
                vec![
                    Param::Number(3.0),
                    Param::Bool(true),
                    Param::Null,
                    Param::str("a b&c"),
                ],
            )],
        };
        let body = batch.encode();
        assert!(body.contains("c0-param0=number:3\n"));
        assert!(body.contains("c0-param1=boolean:true\n"));
        assert!(body.contains("c0-param2=null:null\n"));
        assert!(body.contains("c0-param3=string:a%20b%26c\n"));
    }

    #[test]
    fn test_nested_elements_are_declared_before_use() {
        let batch = Batch {
            kind: BatchKind::Plain,
            batch_id: 0,
            page: "/p".to_string(),
            script_session_id: String::new(),
            calls: vec![RemoteCall::new(
                "m",
                "f",
                vec![Param::Array(vec![Param::Array(vec![Param::str("x")])])],
            )],
        };
        let body = batch.encode();
        let inner = body.find("c0-e1=string:x").unwrap();
        let outer = body.find("c0-e2=array:[reference:c0-e1]").unwrap();
        assert!(inner < outer);
        assert!(body.contains("c0-param0=array:[reference:c0-e2]\n"));
    }

    #[test]
    fn test_multiple_calls() {
        let batch = Batch {
            kind: BatchKind::Plain,
            batch_id: 5,
            page: "/p".to_string(),
            script_session_id: String::new(),
            calls: vec![
                RemoteCall::new("a", "one", vec![]),
                RemoteCall::new("b", "two", vec![Param::str("v")]),
            ],
        };
        let body = batch.encode();
        assert!(body.starts_with("callCount=2\n"));
        assert!(body.contains("c1-scriptName=b\nc1-methodName=two\nc1-id=1\nc1-param0=string:v\n"));
    }
}
