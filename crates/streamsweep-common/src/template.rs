//! Address templates with bracketed numeric range markers.
//!
//! A template such as `http://239.1.[1-20].[001-100]:5002` denotes the
//! cartesian product of its markers. Expansion is streamed in caller-sized
//! batches so that templates with millions of combinations never have to be
//! materialized at once.
//!
//! Bracketed IPv6 literals (`http://[fe80::1]:8080/`) are kept verbatim and
//! never treated as ranges.

use crate::{Error, Result};
use std::fmt;

/// One `[start-end]` range marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RangeMarker {
    start: u64,
    end: u64,
    /// Digit width of the `start` literal, used for zero padding.
    width: usize,
}

impl RangeMarker {
    fn len(&self) -> u128 {
        u128::from(self.end - self.start) + 1
    }
}

/// A parsed address template.
///
/// `literals` always holds one more entry than `markers`: the address is
/// `literals[0] + marker[0] + literals[1] + ... + literals[k]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressTemplate {
    source: String,
    literals: Vec<String>,
    markers: Vec<RangeMarker>,
}

impl AddressTemplate {
    /// Parse a template, rejecting malformed range markers up front.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTemplate`] for nested brackets, non-numeric
    /// bounds, bounds that overflow `u64`, or `start > end`.
    pub fn parse(template: &str) -> Result<Self> {
        let mut literals = Vec::new();
        let mut markers = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while let Some(open) = rest.find('[') {
            literal.push_str(&rest[..open]);
            let after_open = &rest[open + 1..];

            let Some(close) = after_open.find(']') else {
                // Unterminated bracket: the remainder is plain text.
                literal.push_str(&rest[open..]);
                rest = "";
                break;
            };

            let inner = &after_open[..close];
            if inner.contains('[') {
                return Err(Error::invalid_template(
                    template,
                    format!("nested or overlapping range marker near '[{inner}]'"),
                ));
            }

            if is_ipv6_literal(inner) || !inner.contains('-') {
                literal.push('[');
                literal.push_str(inner);
                literal.push(']');
            } else {
                markers.push(parse_marker(template, inner)?);
                literals.push(std::mem::take(&mut literal));
            }

            rest = &after_open[close + 1..];
        }

        literal.push_str(rest);
        literals.push(literal);

        Ok(Self {
            source: template.to_string(),
            literals,
            markers,
        })
    }

    /// The template text as given.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of range markers found.
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Whether the template expands to more than itself.
    pub fn has_ranges(&self) -> bool {
        !self.markers.is_empty()
    }

    /// Total number of addresses the template expands to, or `None` if the
    /// product does not fit in a `u128`.
    pub fn combinations(&self) -> Option<u128> {
        self.markers
            .iter()
            .try_fold(1u128, |acc, m| acc.checked_mul(m.len()))
    }

    /// Lazily expand the template into batches of at most `batch_size`
    /// addresses (a size of zero is treated as one).
    pub fn batches(&self, batch_size: usize) -> AddressBatches {
        AddressBatches {
            cursor: Some(self.markers.iter().map(|m| m.start).collect()),
            template: self.clone(),
            batch_size: batch_size.max(1),
        }
    }

    fn render(&self, values: &[u64]) -> String {
        let mut out = String::with_capacity(self.source.len());
        for (i, marker) in self.markers.iter().enumerate() {
            out.push_str(&self.literals[i]);
            out.push_str(&format!("{:0width$}", values[i], width = marker.width));
        }
        if let Some(last) = self.literals.last() {
            out.push_str(last);
        }
        out
    }
}

impl fmt::Display for AddressTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Streaming iterator over batches of expanded addresses.
///
/// The product is enumerated left to right with the rightmost marker varying
/// fastest. The iterator is finite and cannot be restarted; call
/// [`AddressTemplate::batches`] again for a fresh pass.
#[derive(Debug, Clone)]
pub struct AddressBatches {
    template: AddressTemplate,
    cursor: Option<Vec<u64>>,
    batch_size: usize,
}

impl AddressBatches {
    /// Advance the odometer; returns `false` once every combination was produced.
    fn advance(&mut self) -> bool {
        let Some(values) = self.cursor.as_mut() else {
            return false;
        };

        for (i, marker) in self.template.markers.iter().enumerate().rev() {
            if values[i] < marker.end {
                values[i] += 1;
                return true;
            }
            values[i] = marker.start;
        }

        self.cursor = None;
        false
    }
}

impl Iterator for AddressBatches {
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::new();

        while batch.len() < self.batch_size {
            let Some(values) = self.cursor.as_ref() else {
                break;
            };
            batch.push(self.template.render(values));
            if !self.advance() {
                break;
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

fn parse_marker(template: &str, inner: &str) -> Result<RangeMarker> {
    let (start_str, end_str) = inner
        .split_once('-')
        .ok_or_else(|| Error::invalid_template(template, format!("'[{inner}]' is not a range")))?;

    let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !is_number(start_str) || !is_number(end_str) {
        return Err(Error::invalid_template(
            template,
            format!("range '[{inner}]' has non-numeric bounds"),
        ));
    }

    let parse = |s: &str| {
        s.parse::<u64>().map_err(|_| {
            Error::invalid_template(template, format!("range bound '{s}' is too large"))
        })
    };
    let start = parse(start_str)?;
    let end = parse(end_str)?;

    if start > end {
        return Err(Error::invalid_template(
            template,
            format!("start {start} is greater than end {end}"),
        ));
    }

    Ok(RangeMarker {
        start,
        end,
        width: start_str.len(),
    })
}

/// Whether bracket contents look like an IPv6 address literal, optionally
/// with a `%zone` suffix.
fn is_ipv6_literal(inner: &str) -> bool {
    let addr = inner.split_once('%').map_or(inner, |(addr, _zone)| addr);
    addr.contains(':')
        && addr
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.')
}
