//! Table and JSON rendering of counter dumps.

use std::collections::BTreeMap;
use std::io::Write;

use serde::Serialize;

use crate::error::CounterResult;
use crate::record::{CounterIndex, CounterRecord, Hook};
use crate::rule_map::{PolicyRuleCounterKey, PolicyRuleCounters};

/// Output style for dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable aligned table.
    #[default]
    Table,
    /// One JSON document per interface (or per rule dump), newline separated.
    Json,
}

/// Aggregated counters of both hooks of one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub iface: String,
    pub ingress: CounterRecord,
    pub egress: CounterRecord,
}

impl InterfaceCounters {
    /// Returns the record for `hook`.
    pub fn hook(&self, hook: Hook) -> &CounterRecord {
        match hook {
            Hook::Ingress => &self.ingress,
            Hook::Egress => &self.egress,
        }
    }
}

/// Rows of the interface table, in display order.
const TABLE_ROWS: &[(&str, CounterIndex)] = &[
    ("Total packets", CounterIndex::TotalPackets),
    ("Accepted by policy", CounterIndex::AcceptedByPolicy),
    ("Dropped by policy", CounterIndex::DroppedByPolicy),
    ("Dropped short packets", CounterIndex::ErrShortPacket),
];

/// Writes the counters of one interface.
pub fn write_interface(
    out: &mut dyn Write,
    counters: &InterfaceCounters,
    format: OutputFormat,
) -> CounterResult<()> {
    match format {
        OutputFormat::Table => write_interface_table(out, counters),
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &InterfaceView::from(counters))
                .map_err(std::io::Error::from)?;
            writeln!(out)?;
            Ok(())
        }
    }
}

fn write_interface_table(out: &mut dyn Write, counters: &InterfaceCounters) -> CounterResult<()> {
    writeln!(out, "===== Interface: {} =====", counters.iface)?;
    writeln!(out, "{:<26}{:>14}{:>14}", "", "ingress", "egress")?;
    for (label, index) in TABLE_ROWS {
        writeln!(
            out,
            "{:<26}{:>14}{:>14}",
            format!("{}:", label),
            counters.ingress.get(*index),
            counters.egress.get(*index)
        )?;
    }
    Ok(())
}

/// Writes a rule counter snapshot, sorted by key.
pub fn write_rules(
    out: &mut dyn Write,
    rules: &PolicyRuleCounters,
    format: OutputFormat,
) -> CounterResult<()> {
    let sorted = rules.sorted();
    match format {
        OutputFormat::Table => {
            writeln!(
                out,
                "{:<16}{:<9}{:<40}{:>6}{:>8}{:>14}",
                "IFACE", "HOOK", "POLICY", "RULE", "ACTION", "PACKETS"
            )?;
            for (key, packets) in sorted {
                writeln!(
                    out,
                    "{:<16}{:<9}{:<40}{:>6}{:>8}{:>14}",
                    key.iface, key.hook, key.policy, key.rule_index, key.action, packets
                )?;
            }
        }
        OutputFormat::Json => {
            let rows: Vec<RuleView<'_>> = sorted
                .into_iter()
                .map(|(key, packets)| RuleView { key, packets })
                .collect();
            serde_json::to_writer(&mut *out, &rows).map_err(std::io::Error::from)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct RecordView<'a> {
    #[serde(flatten)]
    named: BTreeMap<&'static str, u64>,
    raw: &'a [u64],
}

impl<'a> From<&'a CounterRecord> for RecordView<'a> {
    fn from(record: &'a CounterRecord) -> Self {
        Self {
            named: CounterIndex::all()
                .iter()
                .map(|idx| (idx.as_str(), record.get(*idx)))
                .collect(),
            raw: record.values(),
        }
    }
}

#[derive(Serialize)]
struct InterfaceView<'a> {
    iface: &'a str,
    ingress: RecordView<'a>,
    egress: RecordView<'a>,
}

impl<'a> From<&'a InterfaceCounters> for InterfaceView<'a> {
    fn from(counters: &'a InterfaceCounters) -> Self {
        Self {
            iface: &counters.iface,
            ingress: RecordView::from(&counters.ingress),
            egress: RecordView::from(&counters.egress),
        }
    }
}

#[derive(Serialize)]
struct RuleView<'a> {
    #[serde(flatten)]
    key: &'a PolicyRuleCounterKey,
    packets: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MAX_COUNTER_NUMBER;
    use crate::rule_map::RuleAction;

    fn sample() -> InterfaceCounters {
        let mut ingress = vec![0; MAX_COUNTER_NUMBER];
        ingress[CounterIndex::TotalPackets.position()] = 20;
        ingress[CounterIndex::AcceptedByPolicy.position()] = 10;
        ingress[CounterIndex::DroppedByPolicy.position()] = 10;
        let mut egress = vec![0; MAX_COUNTER_NUMBER];
        egress[CounterIndex::ErrShortPacket.position()] = 3;
        InterfaceCounters {
            iface: "eth0".to_string(),
            ingress: CounterRecord::from_values(ingress),
            egress: CounterRecord::from_values(egress),
        }
    }

    #[test]
    fn test_table_rows() {
        let mut out = Vec::new();
        write_interface(&mut out, &sample(), OutputFormat::Table).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "===== Interface: eth0 =====");
        assert_eq!(lines.len(), 2 + TABLE_ROWS.len());
        assert!(lines[2].starts_with("Total packets:"));
        assert!(lines[2].trim_end().ends_with("20             0"));
        assert!(lines[3].starts_with("Accepted by policy:"));
        assert!(lines[3].contains("10"));
        assert!(lines[5].trim_end().ends_with("0             3"));
    }

    #[test]
    fn test_json_interface() {
        let mut out = Vec::new();
        write_interface(&mut out, &sample(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(value["iface"], "eth0");
        assert_eq!(value["ingress"]["total_packets"], 20);
        assert_eq!(value["ingress"]["accepted_by_policy"], 10);
        assert_eq!(value["egress"]["err_short_packet"], 3);
        assert_eq!(
            value["egress"]["raw"].as_array().unwrap().len(),
            MAX_COUNTER_NUMBER
        );
    }

    #[test]
    fn test_rules_table_and_json() {
        let rules: PolicyRuleCounters = vec![(
            PolicyRuleCounterKey::new("cali1", Hook::Egress, "default.p", 2, RuleAction::Deny),
            10,
        )]
        .into_iter()
        .collect();

        let mut table = Vec::new();
        write_rules(&mut table, &rules, OutputFormat::Table).unwrap();
        let text = String::from_utf8(table).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().contains("default.p"));

        let mut json = Vec::new();
        write_rules(&mut json, &rules, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value[0]["hook"], "egress");
        assert_eq!(value[0]["action"], "deny");
        assert_eq!(value[0]["rule_index"], 2);
        assert_eq!(value[0]["packets"], 10);
    }
}
