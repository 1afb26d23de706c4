//! The `file` package: read a whole file as a source, write payloads to a
//! file as a sink.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use actuator_types::{ActuatorError, Result, Value};

use crate::builtins::{sink, source};
use crate::chain::Source;
use crate::component::Component;
use crate::flow::FlowContext;
use crate::params::{ParamKind, ParamSchema, Params};
use crate::registry::Package;
use crate::sink::Sink;

pub fn package() -> Package {
    let mut pkg = Package::new("file");
    pkg.sources.register_default("read", source::<FileSource>);
    pkg.sinks.register_default("write", sink::<FileSink>);
    pkg
}

/// Contents of `path` on every pull: a string, or with `binary` a list of
/// byte values.
#[derive(Debug, Default)]
pub struct FileSource {
    path: PathBuf,
    binary: bool,
}

impl Component for FileSource {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("path", ParamKind::Str)
            .optional("binary", ParamKind::Bool, false)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.path = PathBuf::from(params.str("path")?);
        self.binary = params.bool("binary")?;
        Ok(())
    }
}

impl Source for FileSource {
    fn value(&mut self) -> Result<Value> {
        if self.binary {
            let bytes = std::fs::read(&self.path)?;
            Ok(Value::Array(bytes.into_iter().map(Value::from).collect()))
        } else {
            Ok(Value::String(std::fs::read_to_string(&self.path)?))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum WriteMode {
    #[default]
    Truncate,
    Append,
}

/// Writes each payload to `path`: strings as-is, anything else as JSON.
/// `mode` is `"w"` to replace the file per payload or `"a"` to append.
#[derive(Debug, Default)]
pub struct FileSink {
    path: PathBuf,
    mode: WriteMode,
}

impl Component for FileSink {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("path", ParamKind::Str)
            .optional("mode", ParamKind::Str, "w")
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.path = PathBuf::from(params.str("path")?);
        self.mode = match params.str("mode")?.as_str() {
            "w" => WriteMode::Truncate,
            "a" => WriteMode::Append,
            other => {
                return Err(ActuatorError::ConfigurationError(format!(
                    "file: mode must be \"w\" or \"a\", got '{other}'"
                )))
            }
        };
        Ok(())
    }
}

impl Sink for FileSink {
    fn perform(&mut self, payload: Value) -> Result<()> {
        let text = match payload {
            Value::String(s) => s,
            other => serde_json::to_string(&other)?,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.mode == WriteMode::Append)
            .truncate(self.mode == WriteMode::Truncate)
            .open(&self.path)?;
        file.write_all(text.as_bytes())?;
        tracing::trace!(path = %self.path.display(), bytes = text.len(), "Wrote payload");
        Ok(())
    }
}
