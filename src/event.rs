use crate::time::Timestamp;
use crate::Show;

/// The default relation along which events within a trace are ordered.
pub const TIME_RELATION: &str = "t";

/// A label identifying a class of events. Labels are equatable, hashable and
/// ordered, so they can be used as keys in the miner's count tables and as
/// deterministic tie-breaks.
///
/// The two sentinel variants bracket every trace; they are injected during
/// graph construction and are never mined over directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// Synthetic type of the shared root node of every trace.
    Initial,
    /// Synthetic type of the shared sink node of every trace.
    Terminal,
    /// A plain string label, used for totally ordered logs.
    Label(String),
    /// A process-tagged label, used for distributed (partially ordered) logs.
    Distributed {
        /// The event label proper.
        label: String,
        /// The process the event was observed on.
        process: String,
    },
}

impl EventType {
    /// Creates a plain label type.
    pub fn label(label: impl Into<String>) -> Self {
        EventType::Label(label.into())
    }

    /// Creates a process-tagged label type.
    pub fn distributed(label: impl Into<String>, process: impl Into<String>) -> Self {
        EventType::Distributed {
            label: label.into(),
            process: process.into(),
        }
    }

    /// Whether this is one of the two reserved sentinel types.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, EventType::Initial | EventType::Terminal)
    }
}

impl Show for EventType {
    fn show(&self) -> String {
        match self {
            EventType::Initial => "INITIAL".to_string(),
            EventType::Terminal => "TERMINAL".to_string(),
            EventType::Label(label) => label.clone(),
            EventType::Distributed { label, process } => format!("{process}.{label}"),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.show())
    }
}

/// A single observation in a log: an [`EventType`] plus an optional timestamp
/// and an optional numeric payload captured alongside the event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    etype: EventType,
    time: Option<Timestamp>,
    payload: Option<f64>,
}

impl Event {
    /// Creates an event of the given type without time or payload.
    pub fn new(etype: EventType) -> Self {
        Self {
            etype,
            time: None,
            payload: None,
        }
    }

    /// Creates an event with a plain string label.
    pub fn with_label(label: impl Into<String>) -> Self {
        Self::new(EventType::label(label))
    }

    /// Attaches a timestamp.
    pub fn at(mut self, time: Timestamp) -> Self {
        self.time = Some(time);
        self
    }

    /// Attaches a numeric payload.
    pub fn with_payload(mut self, payload: f64) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The type of this event.
    pub fn etype(&self) -> &EventType {
        &self.etype
    }

    /// The timestamp, if the log carried one.
    pub fn time(&self) -> Option<&Timestamp> {
        self.time.as_ref()
    }

    /// The numeric payload, if the log carried one.
    pub fn payload(&self) -> Option<f64> {
        self.payload
    }

    pub(crate) fn set_time(&mut self, time: Timestamp) {
        self.time = Some(time);
    }
}
