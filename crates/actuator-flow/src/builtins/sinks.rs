//! Built-in sinks.

use std::io::Write;

use actuator_types::{Result, Value};

use crate::component::{Component, Deferred, Lifecycle};
use crate::sink::Sink;

/// `print`, the sink a flow gets when it names none.
pub fn print() -> Lifecycle<dyn Sink> {
    Lifecycle::new("print", Box::new(PrintSink), Deferred::default())
}

pub fn none() -> Lifecycle<dyn Sink> {
    Lifecycle::new("none", Box::new(NoneSink), Deferred::default())
}

/// Discards every payload.
#[derive(Debug, Default)]
pub struct NoneSink;

impl Component for NoneSink {}

impl Sink for NoneSink {
    fn perform(&mut self, _payload: Value) -> Result<()> {
        Ok(())
    }
}

/// Writes strings as-is and anything else as pretty JSON, one payload per line.
#[derive(Debug, Default)]
pub struct PrintSink;

impl Component for PrintSink {}

impl Sink for PrintSink {
    fn perform(&mut self, payload: Value) -> Result<()> {
        let mut out = std::io::stdout().lock();
        match payload {
            Value::String(s) => writeln!(out, "{s}")?,
            other => writeln!(out, "{}", serde_json::to_string_pretty(&other)?)?,
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    pub(crate) struct CaptureSink(Arc<Mutex<Vec<Value>>>);

    impl Component for CaptureSink {}

    impl Sink for CaptureSink {
        fn perform(&mut self, payload: Value) -> Result<()> {
            self.0.lock().unwrap().push(payload);
            Ok(())
        }
    }

    /// A sink recording every payload it receives.
    pub(crate) fn capture() -> (Lifecycle<dyn Sink>, Arc<Mutex<Vec<Value>>>) {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink: Lifecycle<dyn Sink> =
            Lifecycle::new("capture", Box::new(CaptureSink(captured.clone())), Deferred::default());
        (sink, captured)
    }
}
