//! Trigger evaluation: decides, once per loop iteration, whether a sample
//! should be taken now.

use crate::config::LoggerConfig;
use crate::error::LoggerError;
use crate::reader::TagReader;
use crate::tag::TagValue;
use std::str::FromStr;
use std::time::Duration;
use strum_macros::Display;
use tracing::{debug, trace};

/// Comparison applied by the `compare` trigger as `value <op> cutoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CompareOp {
    #[strum(to_string = "grt")]
    Greater,
    #[strum(to_string = "geq")]
    GreaterOrEqual,
    #[strum(to_string = "les")]
    Less,
    #[strum(to_string = "leq")]
    LessOrEqual,
    #[strum(to_string = "neq")]
    NotEqual,
    #[strum(to_string = "equ")]
    Equal,
}

impl CompareOp {
    pub fn holds(self, value: f64, cutoff: f64) -> bool {
        match self {
            CompareOp::Greater => value > cutoff,
            CompareOp::GreaterOrEqual => value >= cutoff,
            CompareOp::Less => value < cutoff,
            CompareOp::LessOrEqual => value <= cutoff,
            CompareOp::NotEqual => value != cutoff,
            CompareOp::Equal => value == cutoff,
        }
    }
}

impl FromStr for CompareOp {
    type Err = LoggerError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code {
            "grt" => Ok(CompareOp::Greater),
            "geq" => Ok(CompareOp::GreaterOrEqual),
            "les" => Ok(CompareOp::Less),
            "leq" => Ok(CompareOp::LessOrEqual),
            "neq" => Ok(CompareOp::NotEqual),
            "equ" => Ok(CompareOp::Equal),
            other => Err(LoggerError::UnknownOperator(other.to_string())),
        }
    }
}

/// Fires when strictly more than `period` has passed since the last fire.
#[derive(Debug, Clone)]
pub struct PeriodicTrigger {
    period: Duration,
    last_fire: Option<Duration>,
}

impl PeriodicTrigger {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_fire: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn check(&mut self, now: Duration) -> bool {
        let due = match self.last_fire {
            None => true,
            Some(last) => now.saturating_sub(last) > self.period,
        };
        if due {
            self.last_fire = Some(now);
        }
        due
    }
}

/// Edge-triggered: fires when the trigger tag differs from its last reading.
#[derive(Debug, Clone)]
pub struct ChangeTrigger {
    tag: String,
    previous: Option<TagValue>,
}

impl ChangeTrigger {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            previous: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Feeds one reading. The first reading only seeds the baseline.
    pub fn observe(&mut self, current: TagValue) -> bool {
        let fired = match &self.previous {
            Some(previous) => *previous != current,
            None => false,
        };
        self.previous = Some(current);
        fired
    }

    async fn read<R: TagReader + ?Sized>(&self, reader: &mut R) -> Result<TagValue, LoggerError> {
        reader.read(&self.tag).await?.into_value_for(&self.tag)
    }
}

/// Level-triggered: fires on every reading where `value <op> cutoff` holds.
#[derive(Debug, Clone)]
pub struct CompareTrigger {
    tag: String,
    op: CompareOp,
    cutoff: f64,
}

impl CompareTrigger {
    pub fn new(tag: impl Into<String>, op: CompareOp, cutoff: f64) -> Self {
        Self {
            tag: tag.into(),
            op,
            cutoff,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn op(&self) -> CompareOp {
        self.op
    }

    pub fn check(&self, value: &TagValue) -> Result<bool, LoggerError> {
        let numeric = value
            .as_f64()
            .ok_or_else(|| LoggerError::tag_read(&self.tag, format!("non-numeric value {:?}", value)))?;
        Ok(self.op.holds(numeric, self.cutoff))
    }
}

/// The active trigger mode for a run.
#[derive(Debug, Clone)]
pub enum Trigger {
    Periodic(PeriodicTrigger),
    Change(ChangeTrigger),
    Compare(CompareTrigger),
}

impl Trigger {
    /// Resolves the configured mode and its parameters. Nothing is read from
    /// the controller here.
    pub fn from_config(config: &LoggerConfig) -> Result<Self, LoggerError> {
        let trigger_tag = || {
            config
                .trigger_tag
                .clone()
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| {
                    LoggerError::Config(format!("trigger_tag is required for {} trigger", config.trigger_type))
                })
        };

        match config.trigger_type.as_str() {
            "periodic" => {
                let seconds = config
                    .period_time
                    .ok_or_else(|| LoggerError::Config("period_time is required for periodic trigger".to_string()))?;
                let period = Duration::try_from_secs_f64(seconds)
                    .map_err(|_| LoggerError::Config(format!("invalid period_time {}", seconds)))?;
                Ok(Trigger::Periodic(PeriodicTrigger::new(period)))
            }
            "change" => Ok(Trigger::Change(ChangeTrigger::new(trigger_tag()?))),
            "compare" => {
                let code = config.compare_condition.as_deref().ok_or_else(|| {
                    LoggerError::Config("compare_condition is required for compare trigger".to_string())
                })?;
                let op = code.parse::<CompareOp>()?;
                let cutoff = config.compare_cutoff.ok_or_else(|| {
                    LoggerError::Config("compare_cutoff is required for compare trigger".to_string())
                })?;
                Ok(Trigger::Compare(CompareTrigger::new(trigger_tag()?, op, cutoff)))
            }
            other => Err(LoggerError::UnknownMode(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Periodic(_) => "periodic",
            Trigger::Change(_) => "change",
            Trigger::Compare(_) => "compare",
        }
    }

    /// Mode and parameters, for the startup banner and logs.
    pub fn describe(&self) -> String {
        let detail = match self {
            Trigger::Periodic(periodic) => format!("every {:?}", periodic.period()),
            Trigger::Change(change) => format!("on {}", change.tag()),
            Trigger::Compare(compare) => format!("{} {} {}", compare.tag(), compare.op(), compare.cutoff),
        };
        format!("{} {}", self.name(), detail)
    }

    /// Runs once before the loop. Change mode takes its seed reading here.
    pub async fn prime<R: TagReader + ?Sized>(&mut self, reader: &mut R) -> Result<(), LoggerError> {
        if let Trigger::Change(change) = self {
            let seed = change.read(reader).await?;
            debug!(tag = %change.tag, value = %seed, "Seeded change trigger");
            change.observe(seed);
        }
        Ok(())
    }

    /// Decides whether `now` qualifies for a sample.
    pub async fn evaluate<R: TagReader + ?Sized>(&mut self, now: Duration, reader: &mut R) -> Result<bool, LoggerError> {
        match self {
            Trigger::Periodic(periodic) => Ok(periodic.check(now)),
            Trigger::Change(change) => {
                let current = change.read(reader).await?;
                let fired = change.observe(current);
                if fired {
                    trace!(tag = %change.tag, "Trigger tag changed");
                }
                Ok(fired)
            }
            Trigger::Compare(compare) => {
                let value = reader.read(&compare.tag).await?.into_value_for(&compare.tag)?;
                compare.check(&value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_fires_first_then_after_strictly_more_than_period() {
        let mut trigger = PeriodicTrigger::new(Duration::from_secs(1));
        let fires: Vec<bool> = [0.0, 0.5, 1.2, 1.3]
            .into_iter()
            .map(|t| trigger.check(Duration::from_secs_f64(t)))
            .collect();
        assert_eq!(fires, vec![true, false, true, false]);
    }

    #[test]
    fn periodic_exact_period_does_not_fire() {
        let mut trigger = PeriodicTrigger::new(Duration::from_secs(1));
        assert!(trigger.check(Duration::from_secs(5)));
        assert!(!trigger.check(Duration::from_secs(6)));
        assert!(trigger.check(Duration::from_millis(6001)));
    }

    #[test]
    fn change_fires_on_transitions_only() {
        let mut trigger = ChangeTrigger::new("Trig");
        let fires: Vec<bool> = [5, 5, 7, 7, 3]
            .into_iter()
            .map(|v| trigger.observe(TagValue::Int(v)))
            .collect();
        assert_eq!(fires, vec![false, false, true, false, true]);
    }

    #[test]
    fn compare_grt_is_level_triggered() {
        let trigger = CompareTrigger::new("Level", CompareOp::Greater, 10.0);
        let fires: Vec<bool> = [9, 10, 11, 10, 12]
            .into_iter()
            .map(|v| trigger.check(&TagValue::Int(v)).unwrap())
            .collect();
        assert_eq!(fires, vec![false, false, true, false, true]);
    }

    #[test]
    fn operator_table() {
        let cases = [
            ("grt", 11.0, true),
            ("geq", 10.0, true),
            ("les", 10.0, false),
            ("leq", 10.0, true),
            ("neq", 10.0, false),
            ("equ", 10.0, true),
        ];
        for (code, value, expected) in cases {
            let op: CompareOp = code.parse().unwrap();
            assert_eq!(op.to_string(), code);
            assert_eq!(op.holds(value, 10.0), expected, "{code}");
        }
    }

    #[test]
    fn unknown_operator_is_reported_verbatim() {
        let err = "gt".parse::<CompareOp>().unwrap_err();
        assert!(matches!(err, LoggerError::UnknownOperator(ref op) if op == "gt"));
        assert_eq!(err.kind(), "UnknownOperatorError");
    }

    #[test]
    fn describe_names_mode_and_parameters() {
        let periodic = Trigger::Periodic(PeriodicTrigger::new(Duration::from_millis(1500)));
        assert_eq!(periodic.describe(), "periodic every 1.5s");
        assert_eq!(Trigger::Change(ChangeTrigger::new("Trig")).describe(), "change on Trig");
        let compare = Trigger::Compare(CompareTrigger::new("Level", CompareOp::GreaterOrEqual, 2.5));
        assert_eq!(compare.describe(), "compare Level geq 2.5");
    }

    #[test]
    fn compare_rejects_text_values() {
        let trigger = CompareTrigger::new("Name", CompareOp::Equal, 0.0);
        let err = trigger.check(&TagValue::Text("x".into())).unwrap_err();
        assert!(matches!(err, LoggerError::TagRead { ref tag, .. } if tag == "Name"));
    }
}
