//! Time-series datapoint collection.
//!
//! The sink is append-only; out-of-scope exporters turn the collected
//! points into report files. Series names are stable across runs so
//! that two runs with the same seed produce byte-identical streams.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

/// Value of a datapoint: numeric samples or string labels (used for
/// state transitions).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DataValue {
    Float(f64),
    Label(String),
}

/// A single `(series, time, value)` sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub series: String,
    pub time: f64,
    pub value: DataValue,
}

/// Append-only datapoint storage shared by all reporters of a run.
#[derive(Debug, Default)]
pub struct ReportSink {
    points: Vec<DataPoint>,
}

impl ReportSink {
    pub fn append(&mut self, series: String, time: f64, value: DataValue) {
        self.points.push(DataPoint { series, time, value });
    }

    /// All collected points, in emission order.
    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    /// Points of one series, in emission order.
    pub fn series(&self, name: &str) -> Vec<&DataPoint> {
        self.points.iter().filter(|p| p.series == name).collect()
    }
}

/// Emits datapoints under a common series-name prefix, e.g. `I[api_0]_`
/// for instance-scoped series.
#[derive(Clone)]
pub struct MultiDataPointReporter {
    prefix: String,
    sink: Rc<RefCell<ReportSink>>,
}

impl MultiDataPointReporter {
    pub fn new<S: Into<String>>(prefix: S, sink: Rc<RefCell<ReportSink>>) -> Self {
        Self {
            prefix: prefix.into(),
            sink,
        }
    }

    pub fn add(&self, series: &str, time: f64, value: f64) {
        self.sink
            .borrow_mut()
            .append(format!("{}{}", self.prefix, series), time, DataValue::Float(value));
    }

    pub fn add_label(&self, series: &str, time: f64, label: &str) {
        self.sink.borrow_mut().append(
            format!("{}{}", self.prefix, series),
            time,
            DataValue::Label(label.to_owned()),
        );
    }
}
