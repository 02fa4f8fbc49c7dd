//! Parser for the Prometheus text exposition format.
//!
//! Metrics are parsed once into [`MetricFamilies`], an index from family name to the metrics
//! of that family keyed by their label set. Histogram and summary series (`_bucket`, `_sum`,
//! `_count` and quantiles) are folded into a single [`Metric`] per label set, so consumers
//! look up structured values instead of matching raw series names.
//!
//! ```
//! use dfbench_service::metrics;
//!
//! let families = metrics::parse(
//!     "# TYPE requests counter\nrequests{code=\"200\"} 3\n",
//! ).unwrap();
//! assert_eq!(families.get("requests").unwrap().metrics.len(), 1);
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

/// Label names and values of one metric.
pub type Labels = BTreeMap<String, String>;

/// Error returned for malformed exposition text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid metrics at line {line}: {reason}")]
pub struct MetricsError {
    /// One-based line number of the offending line.
    pub line: usize,
    /// What is wrong with the line.
    pub reason: String,
}

/// The declared type of a metric family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing value.
    Counter,
    /// A value that can go up and down.
    Gauge,
    /// Observations counted into cumulative buckets.
    Histogram,
    /// Observations summarized into quantiles.
    Summary,
    /// No `# TYPE` line was given.
    Untyped,
}

impl MetricKind {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "counter" => MetricKind::Counter,
            "gauge" => MetricKind::Gauge,
            "histogram" => MetricKind::Histogram,
            "summary" => MetricKind::Summary,
            "untyped" => MetricKind::Untyped,
            _ => return None,
        })
    }
}

/// A cumulative histogram bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    /// Inclusive upper bound (`le`) of the bucket.
    pub upper_bound: f64,
    /// Number of observations less than or equal to the bound.
    pub cumulative_count: u64,
}

/// The value of a histogram metric.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Histogram {
    /// Total number of observations.
    pub sample_count: u64,
    /// Sum of all observed values.
    pub sample_sum: f64,
    /// Buckets in exposition order.
    pub buckets: Vec<Bucket>,
}

/// A summary quantile.
#[derive(Clone, Debug, PartialEq)]
pub struct Quantile {
    /// The quantile, between 0 and 1.
    pub quantile: f64,
    /// The observed value at the quantile.
    pub value: f64,
}

/// The value of a summary metric.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Summary {
    /// Total number of observations.
    pub sample_count: u64,
    /// Sum of all observed values.
    pub sample_sum: f64,
    /// Quantiles in exposition order.
    pub quantiles: Vec<Quantile>,
}

/// The value of one metric.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// Value of a counter.
    Counter(f64),
    /// Value of a gauge.
    Gauge(f64),
    /// Value of an untyped metric.
    Untyped(f64),
    /// Value of a histogram.
    Histogram(Histogram),
    /// Value of a summary.
    Summary(Summary),
}

/// A metric within a family, identified by its labels.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    /// Labels of the metric, without `le` and `quantile`.
    pub labels: Labels,
    /// The value of the metric.
    pub value: MetricValue,
}

/// A named group of metrics sharing a type.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricFamily {
    /// Name of the family.
    pub name: String,
    /// Docstring from the `# HELP` line.
    pub help: Option<String>,
    /// Declared type of the family.
    pub kind: MetricKind,
    /// The metrics in order of first appearance.
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    fn new(name: &str, kind: MetricKind) -> Self {
        Self {
            name: name.to_owned(),
            help: None,
            kind,
            metrics: Vec::new(),
        }
    }

    fn metric_mut(&mut self, labels: Labels) -> &mut Metric {
        let index = match self.metrics.iter().position(|m| m.labels == labels) {
            Some(index) => index,
            None => {
                let value = match self.kind {
                    MetricKind::Counter => MetricValue::Counter(0.0),
                    MetricKind::Gauge => MetricValue::Gauge(0.0),
                    MetricKind::Untyped => MetricValue::Untyped(0.0),
                    MetricKind::Histogram => MetricValue::Histogram(Histogram::default()),
                    MetricKind::Summary => MetricValue::Summary(Summary::default()),
                };
                self.metrics.push(Metric { labels, value });
                self.metrics.len() - 1
            }
        };
        &mut self.metrics[index]
    }
}

/// All metric families scraped from one endpoint, keyed by family name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricFamilies {
    families: BTreeMap<String, MetricFamily>,
}

impl MetricFamilies {
    /// Returns the family with the given name.
    pub fn get(&self, name: &str) -> Option<&MetricFamily> {
        self.families.get(name)
    }

    /// Returns the number of families.
    pub fn len(&self) -> usize {
        self.families.len()
    }

    /// Returns `true` if no family was exposed.
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Iterates over all families ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &MetricFamily> {
        self.families.values()
    }

    /// Returns the histograms of `family` whose `label` equals `value`.
    ///
    /// Yields nothing if the family does not exist or is not a histogram.
    pub fn histograms<'a>(
        &'a self,
        family: &str,
        label: &'a str,
        value: &'a str,
    ) -> impl Iterator<Item = (&'a Labels, &'a Histogram)> + 'a {
        self.families
            .get(family)
            .into_iter()
            .flat_map(|family| family.metrics.iter())
            .filter(move |metric| metric.labels.get(label).map(String::as_str) == Some(value))
            .filter_map(|metric| match &metric.value {
                MetricValue::Histogram(histogram) => Some((&metric.labels, histogram)),
                _ => None,
            })
    }
}

/// Parses metrics in the Prometheus text exposition format.
pub fn parse(text: &str) -> Result<MetricFamilies, MetricsError> {
    let mut parser = Parser::default();
    for (index, line) in text.lines().enumerate() {
        parser.line(line.trim()).map_err(|reason| MetricsError {
            line: index + 1,
            reason,
        })?;
    }
    Ok(MetricFamilies {
        families: parser.families,
    })
}

#[derive(Default)]
struct Parser {
    families: BTreeMap<String, MetricFamily>,
}

impl Parser {
    fn line(&mut self, line: &str) -> Result<(), String> {
        if line.is_empty() {
            return Ok(());
        }
        match line.strip_prefix('#') {
            Some(comment) => self.comment(comment.trim_start()),
            None => self.sample(line),
        }
    }

    fn comment(&mut self, comment: &str) -> Result<(), String> {
        let mut parts = comment.splitn(3, char::is_whitespace);
        let keyword = parts.next().unwrap_or_default();
        let (Some(name), rest) = (parts.next(), parts.next().unwrap_or_default()) else {
            return Ok(());
        };

        match keyword {
            "HELP" => {
                let help = unescape(rest.trim(), false)?;
                self.family(name).help = Some(help);
            }
            "TYPE" => {
                let kind = MetricKind::parse(rest.trim())
                    .ok_or_else(|| format!("unknown metric type {:?}", rest.trim()))?;
                match self.families.get_mut(name) {
                    Some(family) if !family.metrics.is_empty() => {
                        return Err(format!("TYPE for {name} after its samples"));
                    }
                    Some(family) => family.kind = kind,
                    None => {
                        self.families
                            .insert(name.to_owned(), MetricFamily::new(name, kind));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn family(&mut self, name: &str) -> &mut MetricFamily {
        self.families
            .entry(name.to_owned())
            .or_insert_with(|| MetricFamily::new(name, MetricKind::Untyped))
    }

    /// Resolves the family a series belongs to, along with the series suffix.
    fn resolve<'n>(&self, name: &'n str) -> (&'n str, &'n str) {
        for suffix in ["_bucket", "_sum", "_count"] {
            let Some(base) = name.strip_suffix(suffix) else {
                continue;
            };
            let kind = self.families.get(base).map(|family| family.kind);
            match (kind, suffix) {
                (Some(MetricKind::Histogram), _) => return (base, suffix),
                (Some(MetricKind::Summary), "_sum" | "_count") => return (base, suffix),
                _ => {}
            }
        }
        (name, "")
    }

    fn sample(&mut self, line: &str) -> Result<(), String> {
        let (name, rest) = split_name(line)?;
        let (mut labels, rest) = parse_labels(rest.trim_start())?;

        let mut tokens = rest.split_whitespace();
        let value = tokens
            .next()
            .ok_or_else(|| format!("missing value for {name}"))
            .and_then(parse_float)?;
        if let Some(timestamp) = tokens.next() {
            timestamp
                .parse::<i64>()
                .map_err(|_| format!("invalid timestamp {timestamp:?}"))?;
        }
        if let Some(extra) = tokens.next() {
            return Err(format!("unexpected token {extra:?}"));
        }

        let (family_name, suffix) = self.resolve(name);
        let family = self.family(family_name);

        match family.kind {
            MetricKind::Histogram => {
                let bound = match suffix {
                    "_bucket" => Some(
                        labels
                            .remove("le")
                            .ok_or("histogram bucket without le label")
                            .map_err(String::from)
                            .and_then(|le| parse_float(&le))?,
                    ),
                    _ => None,
                };
                let MetricValue::Histogram(histogram) = &mut family.metric_mut(labels).value else {
                    unreachable!("histogram families only hold histograms");
                };
                match (suffix, bound) {
                    ("_bucket", Some(upper_bound)) => histogram.buckets.push(Bucket {
                        upper_bound,
                        cumulative_count: parse_count(value)?,
                    }),
                    ("_sum", _) => histogram.sample_sum = value,
                    ("_count", _) => histogram.sample_count = parse_count(value)?,
                    _ => return Err(format!("unexpected histogram series {name}")),
                }
            }
            MetricKind::Summary => {
                let quantile = match suffix {
                    "" => Some(
                        labels
                            .remove("quantile")
                            .ok_or("summary sample without quantile label")
                            .map_err(String::from)
                            .and_then(|q| parse_float(&q))?,
                    ),
                    _ => None,
                };
                let MetricValue::Summary(summary) = &mut family.metric_mut(labels).value else {
                    unreachable!("summary families only hold summaries");
                };
                match (suffix, quantile) {
                    ("", Some(quantile)) => summary.quantiles.push(Quantile { quantile, value }),
                    ("_sum", _) => summary.sample_sum = value,
                    ("_count", _) => summary.sample_count = parse_count(value)?,
                    _ => return Err(format!("unexpected summary series {name}")),
                }
            }
            MetricKind::Counter | MetricKind::Gauge | MetricKind::Untyped => {
                let kind = family.kind;
                let metric = family.metric_mut(labels);
                metric.value = match kind {
                    MetricKind::Counter => MetricValue::Counter(value),
                    MetricKind::Gauge => MetricValue::Gauge(value),
                    _ => MetricValue::Untyped(value),
                };
            }
        }

        Ok(())
    }
}

fn is_name_char(c: char, first: bool) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':' || (!first && c.is_ascii_digit())
}

fn split_name(line: &str) -> Result<(&str, &str), String> {
    let end = line
        .char_indices()
        .find(|&(i, c)| !is_name_char(c, i == 0))
        .map_or(line.len(), |(i, _)| i);
    if end == 0 {
        return Err(format!("invalid metric name in {line:?}"));
    }
    Ok(line.split_at(end))
}

fn parse_labels(rest: &str) -> Result<(Labels, &str), String> {
    let mut labels = Labels::new();
    let Some(mut rest) = rest.strip_prefix('{') else {
        return Ok((labels, rest));
    };

    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let end = rest
            .char_indices()
            .find(|&(i, c)| c == ':' || !is_name_char(c, i == 0))
            .map_or(rest.len(), |(i, _)| i);
        if end == 0 {
            return Err(format!("invalid label name in {rest:?}"));
        }
        let (name, after) = rest.split_at(end);

        let after = after
            .trim_start()
            .strip_prefix('=')
            .ok_or_else(|| format!("expected '=' after label {name}"))?;
        let after = after
            .trim_start()
            .strip_prefix('"')
            .ok_or_else(|| format!("expected quoted value for label {name}"))?;

        let close = closing_quote(after).ok_or_else(|| format!("unterminated value for label {name}"))?;
        let value = unescape(&after[..close], true)?;
        if labels.insert(name.to_owned(), value).is_some() {
            return Err(format!("duplicate label {name}"));
        }

        rest = after[close + 1..].trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        } else if !rest.starts_with('}') {
            return Err(format!("expected ',' or '}}' after label {name}"));
        }
    }
}

/// Returns the byte index of the first unescaped `"`.
fn closing_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(i),
            _ => {}
        }
    }
    None
}

fn unescape(s: &str, quoted: bool) -> Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('"') if quoted => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => return Err("trailing escape character".to_owned()),
        }
    }
    Ok(out)
}

fn parse_float(s: &str) -> Result<f64, String> {
    match s {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => s.parse().map_err(|_| format!("invalid value {s:?}")),
    }
}

fn parse_count(value: f64) -> Result<u64, String> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Ok(value as u64)
    } else {
        Err(format!("invalid count {value}"))
    }
}
