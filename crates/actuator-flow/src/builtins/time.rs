//! The `time` package: wall-clock sources.

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, NaiveTime, Utc};

use actuator_types::{ActuatorError, Result, Value};

use crate::builtins::source;
use crate::chain::Source;
use crate::component::Component;
use crate::flow::FlowContext;
use crate::params::{ParamKind, ParamSchema, Params};
use crate::registry::Package;

pub fn package() -> Package {
    let mut pkg = Package::new("time");
    pkg.sources
        .register_default("now", source::<Now>)
        .register("epoch", source::<Epoch>)
        .register("during", source::<During>);
    pkg
}

/// Local time of day, formatted with a strftime `format`.
#[derive(Debug, Default)]
pub struct Now {
    format: String,
}

impl Component for Now {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().optional("format", ParamKind::Str, "%H:%M:%S")
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        let format = params.str("format")?;
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            return Err(ActuatorError::ConfigurationError(format!(
                "time: invalid format '{format}'"
            )));
        }
        self.format = format;
        Ok(())
    }
}

impl Source for Now {
    fn value(&mut self) -> Result<Value> {
        Ok(Value::String(Local::now().format(&self.format).to_string()))
    }
}

/// Seconds since the Unix epoch, with sub-second precision.
#[derive(Debug, Default)]
pub struct Epoch;

impl Component for Epoch {}

impl Source for Epoch {
    fn value(&mut self) -> Result<Value> {
        let now = Utc::now();
        let secs = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6;
        Ok(Value::from(secs))
    }
}

/// Whether the local time of day is within `[start, end)`. A window whose
/// end is before its start runs past midnight.
#[derive(Debug, Default)]
pub struct During {
    start: NaiveTime,
    end: NaiveTime,
}

fn parse_time(name: &str, s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M"))
        .map_err(|e| ActuatorError::ConfigurationError(format!("time.during: {name} '{s}': {e}")))
}

fn within(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> bool {
    if end < start {
        start <= now || now < end
    } else {
        start <= now && now < end
    }
}

impl Component for During {
    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("start", ParamKind::Str)
            .required("end", ParamKind::Str)
    }

    fn initialise(&mut self, params: Params, _ctx: &FlowContext) -> Result<()> {
        self.start = parse_time("start", &params.str("start")?)?;
        self.end = parse_time("end", &params.str("end")?)?;
        Ok(())
    }
}

impl Source for During {
    fn value(&mut self) -> Result<Value> {
        Ok(Value::Bool(within(self.start, self.end, Local::now().time())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Deferred, Lifecycle};
    use crate::flow::testing::context;
    use actuator_blueprint::Param;
    use actuator_types::Scope;

    fn t(s: &str) -> NaiveTime {
        parse_time("t", s).unwrap()
    }

    #[test]
    fn window_within_a_day() {
        assert!(within(t("09:00"), t("17:00"), t("09:00")));
        assert!(within(t("09:00"), t("17:00"), t("12:30:15")));
        assert!(!within(t("09:00"), t("17:00"), t("17:00")));
        assert!(!within(t("09:00"), t("17:00"), t("08:59:59")));
    }

    #[test]
    fn window_past_midnight() {
        assert!(within(t("22:00"), t("06:00"), t("23:00")));
        assert!(within(t("22:00"), t("06:00"), t("05:59")));
        assert!(!within(t("22:00"), t("06:00"), t("12:00")));
    }

    #[test]
    fn bad_time_is_configuration_error() {
        assert!(matches!(
            parse_time("start", "noon"),
            Err(ActuatorError::ConfigurationError(_))
        ));
    }

    #[test]
    fn now_uses_format() {
        let mut src: Lifecycle<dyn Source> = Lifecycle::new(
            "time",
            Box::new(Now::default()),
            Deferred::new(vec![Param::literal("%Y")]),
        );
        src.set_context(context("f", Scope::root())).unwrap();
        src.setup().unwrap();
        let year = src.pull().unwrap();
        assert_eq!(year.as_str().map(str::len), Some(4));
    }

    #[test]
    fn now_rejects_bad_format() {
        let mut src: Lifecycle<dyn Source> = Lifecycle::new(
            "time",
            Box::new(Now::default()),
            Deferred::new(vec![Param::literal("%Q")]),
        );
        src.set_context(context("f", Scope::root())).unwrap();
        assert!(src.setup().is_err());
    }

    #[test]
    fn epoch_is_recent() {
        let secs = Epoch.value().unwrap().as_f64().unwrap();
        assert!(secs > 1_600_000_000.0);
    }
}
